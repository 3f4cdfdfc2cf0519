//! EFI utility functions
//!
//! Common utility functions used across EFI modules.

// ============================================================================
// UCS-2 String Utilities
// ============================================================================

/// Get the effective length of a UCS-2 string slice (not including null terminator)
///
/// Returns the position of the first null terminator, or the slice length if no null found.
#[inline]
pub fn ucs2_len(s: &[u16]) -> usize {
    s.iter().position(|&c| c == 0).unwrap_or(s.len())
}

/// Size in bytes of a variable name as stored on the wire
///
/// This is the UTF-16 code unit count times two, plus two bytes for the
/// null terminator. It is the `NameSize` field firmware expects.
#[inline]
pub fn ucs2_wire_size(name: &str) -> u32 {
    (name.encode_utf16().count() as u32) * 2 + 2
}

/// Encode a name as UTF-16LE into exactly `size` bytes
///
/// The name is followed by zero bytes up to `size`, which covers the null
/// terminator. A `size` smaller than the encoded name is widened so the
/// name is never truncated.
pub fn ucs2_encode(name: &str, size: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let size = size.max(bytes.len());
    bytes.resize(size, 0);
    bytes
}

/// Decode a UTF-16LE name up to its first null terminator
///
/// Returns `None` if the byte length is odd or the code units are not
/// valid UTF-16.
pub fn ucs2_decode(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    String::from_utf16(&units[..ucs2_len(&units)]).ok()
}
