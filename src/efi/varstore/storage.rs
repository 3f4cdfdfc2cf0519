//! In-memory flash image
//!
//! A store image is assembled in a [`FlashImage`] before it is persisted.
//! The buffer simulates a freshly erased NOR flash part:
//! - Every byte starts as 0xFF
//! - Writes are bounds checked against the image size
//! - Records are appended at a cursor that may not cross a region limit
//!
//! The image has a fixed size; nothing ever grows it.

use super::{Result, VarStoreError};

/// Erased flash byte
pub const ERASED_BYTE: u8 = 0xFF;

/// Fixed-size erased flash buffer with an append cursor
pub struct FlashImage {
    /// Image data
    data: Vec<u8>,
    /// Next append offset
    cursor: usize,
    /// Appends may not extend past this offset
    limit: usize,
}

impl FlashImage {
    /// Create an erased image of `size` bytes
    pub fn erased(size: usize) -> Self {
        Self {
            data: vec![ERASED_BYTE; size],
            cursor: 0,
            limit: size,
        }
    }

    /// Total image size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Current append offset
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Restrict appends to `[cursor, limit)`
    pub fn set_append_region(&mut self, cursor: usize, limit: usize) {
        self.cursor = cursor;
        self.limit = limit.min(self.data.len());
    }

    /// Write bytes at an absolute offset
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(VarStoreError::CapacityExceeded {
                needed: offset.saturating_add(bytes.len()),
                available: self.data.len(),
            })?;

        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Append bytes at the cursor, returning the offset they start at
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize> {
        let start = self.cursor;
        let end = start + bytes.len();
        if end > self.limit {
            return Err(VarStoreError::CapacityExceeded {
                needed: end,
                available: self.limit,
            });
        }

        self.data[start..end].copy_from_slice(bytes);
        self.cursor = end;
        Ok(start)
    }

    /// Pad with erased bytes until the cursor is a multiple of `alignment`
    ///
    /// Padding stops at the region limit; the next append reports the
    /// capacity error if there is no room left.
    pub fn pad_to_alignment(&mut self, alignment: usize) {
        while self.cursor % alignment != 0 && self.cursor < self.limit {
            self.data[self.cursor] = ERASED_BYTE;
            self.cursor += 1;
        }
    }

    /// Borrow the image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take the image bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
