//! EDK2-compatible UEFI Firmware Volume variable store format
//!
//! This module implements the on-disk format OVMF uses for its authenticated
//! variable store: the firmware volume header, the variable store header,
//! the authenticated variable records, and the fault-tolerant-write working
//! block descriptor that follows the variable region.
//!
//! # On-disk layout
//!
//! ```text
//! +--------------------------------------------+ offset 0x00000
//! |  EFI_FIRMWARE_VOLUME_HEADER  (72 bytes)    |
//! +--------------------------------------------+ offset 0x00048
//! |  VARIABLE_STORE_HEADER       (28 bytes)    |
//! +--------------------------------------------+ offset 0x00064
//! |  Variable Record #1 (header + name + data) |
//! |  (padded to 4-byte alignment)              |
//! +--------------------------------------------+
//! |  ...                                       |
//! +--------------------------------------------+
//! |  Free space (0xFF)                         |
//! +--------------------------------------------+ offset 0x40000
//! |  (0xFF)                                    |
//! +--------------------------------------------+ offset 0x41000
//! |  FTW working block descriptor (32 bytes)   |
//! +--------------------------------------------+
//! |  (0xFF)                                    |
//! +--------------------------------------------+ offset 0x84000
//! ```

use r_efi::efi::Guid;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{Result, StoreLayout, VarStoreError};
use crate::efi::auth::{EfiTime, guid_to_bytes};
use crate::efi::utils::{ucs2_decode, ucs2_encode};

// ============================================================================
// Constants
// ============================================================================

/// EFI Firmware Volume Header signature: "_FVH"
const FV_SIGNATURE: u32 = 0x4856_465F;

/// FV header revision
const FV_REVISION: u8 = 0x02;

/// Standard NV variable store FV attributes
const FV_ATTRIBUTES: u32 = 0x0004_FEFF;

/// Firmware Volume header length (including one block map entry + terminator)
pub const FV_HEADER_LENGTH: usize = 0x48; // 72 bytes

/// Variable Store header length
pub const VS_HEADER_LENGTH: usize = 0x1C; // 28 bytes

/// Offset where variable records begin (FV header + VS header)
pub const VARIABLE_DATA_OFFSET: usize = FV_HEADER_LENGTH + VS_HEADER_LENGTH;

/// Variable record start marker
const VARIABLE_DATA: u16 = 0x55AA;

/// Variable record alignment
pub const HEADER_ALIGNMENT: usize = 4;

/// Variable store format byte: formatted
const VARIABLE_STORE_FORMATTED: u8 = 0x5A;

/// Variable store state byte: healthy
const VARIABLE_STORE_HEALTHY: u8 = 0xFE;

// Variable states as stored on flash (bits cleared from 0xFF):
/// Variable is fully valid (bits 7 and 6 cleared)
pub const VAR_ADDED: u8 = 0x3F;
/// Header written, data may not be complete (bit 7 cleared)
pub const VAR_HEADER_VALID_ONLY: u8 = 0x7F;
/// Variable is being deleted (bit 0 cleared)
pub const VAR_IN_DELETED_TRANSITION: u8 = 0xFE;
/// Variable is deleted (bit 1 cleared)
pub const VAR_DELETED: u8 = 0xFD;

/// Logical variable state bits
///
/// The logical state is the complement of the on-flash state byte, so each
/// transition sets a bit instead of clearing one.
pub mod state {
    /// Header has been written
    pub const HEADER_VALID: u8 = !super::VAR_HEADER_VALID_ONLY;
    /// Variable data is complete and active
    pub const ADDED: u8 = !super::VAR_ADDED & !super::VAR_HEADER_VALID_ONLY;
    /// Variable has been deleted
    pub const DELETED: u8 = !super::VAR_DELETED;
    /// Variable is being replaced by a newer copy
    pub const IN_DELETED_TRANSITION: u8 = !super::VAR_IN_DELETED_TRANSITION;
}

/// Authenticated variable header size
pub const AUTH_VAR_HEADER_SIZE: usize = 60;

/// FTW working block header written at the descriptor offset
///
/// `EDKII_WORKING_BLOCK_SIGNATURE_GUID`, header CRC, `WorkingBlockValid`
/// state, reserved bytes and a `WriteQueueSize` of 0xFE0. OVMF refuses the
/// region unless it finds exactly these bytes.
pub const WORKING_BLOCK_DESCRIPTOR: [u8; 32] = [
    0x2b, 0x29, 0x58, 0x9e, 0x68, 0x7c, 0x7d, 0x49, 0xa0, 0xce, 0x65, 0x00, 0xfd, 0x9f, 0x1b, 0x95,
    0x2c, 0xaf, 0x2c, 0x64, 0xfe, 0xff, 0xff, 0xff, 0xe0, 0x0f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

// ============================================================================
// GUID constants (as raw LE bytes)
// ============================================================================

/// EFI System NV Data FV GUID: {fff12b8d-7696-4c8b-a985-2747075b4f50}
/// Used in the Firmware Volume header's FileSystemGuid field.
const EFI_SYSTEM_NV_DATA_FV_GUID: [u8; 16] = [
    0x8d, 0x2b, 0xf1, 0xff, 0x96, 0x76, 0x8b, 0x4c, 0xa9, 0x85, 0x27, 0x47, 0x07, 0x5b, 0x4f, 0x50,
];

/// EFI Authenticated Variable GUID: {aaf32c78-947b-439a-a180-2e144ec37792}
/// Indicates the variable store uses authenticated variable headers.
const EFI_AUTH_VARIABLE_GUID: [u8; 16] = [
    0x78, 0x2c, 0xf3, 0xaa, 0x7b, 0x94, 0x9a, 0x43, 0xa1, 0x80, 0x2e, 0x14, 0x4e, 0xc3, 0x77, 0x92,
];

// ============================================================================
// On-disk structures
// ============================================================================

/// EFI_FV_BLOCK_MAP_ENTRY
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FvBlockMapEntry {
    pub num_blocks: u32,
    pub length: u32,
}

/// EFI_FIRMWARE_VOLUME_HEADER with one block map entry and its terminator
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FirmwareVolumeHeader {
    pub zero_vector: [u8; 16],
    pub file_system_guid: [u8; 16],
    pub fv_length: u64,
    pub signature: u32,
    pub attributes: u32,
    pub header_length: u16,
    pub checksum: u16,
    pub ext_header_offset: u16,
    pub reserved: u8,
    pub revision: u8,
    pub block_map: [FvBlockMapEntry; 2],
}

/// VARIABLE_STORE_HEADER
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct VariableStoreHeader {
    pub signature: [u8; 16],
    /// Size of the variable store including this header
    pub size: u32,
    pub format: u8,
    pub state: u8,
    pub reserved: u16,
    pub reserved1: u32,
}

/// AUTHENTICATED_VARIABLE_HEADER
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct AuthVariableHeader {
    pub start_id: u16,
    pub state: u8,
    pub reserved: u8,
    pub attributes: u32,
    pub monotonic_count: u64,
    pub time_stamp: EfiTime,
    pub pub_key_index: u32,
    pub name_size: u32,
    pub data_size: u32,
    pub vendor_guid: [u8; 16],
}

const _: () = assert!(core::mem::size_of::<FirmwareVolumeHeader>() == FV_HEADER_LENGTH);
const _: () = assert!(core::mem::size_of::<VariableStoreHeader>() == VS_HEADER_LENGTH);
const _: () = assert!(core::mem::size_of::<AuthVariableHeader>() == AUTH_VAR_HEADER_SIZE);

/// The two headers at the start of a store image
#[derive(Debug, Clone, Copy)]
pub struct Headers {
    pub fv: FirmwareVolumeHeader,
    pub vs: VariableStoreHeader,
}

impl Headers {
    /// Absolute offset one past the end of the variable region
    pub fn variable_region_end(&self) -> usize {
        let header_length = self.fv.header_length as usize;
        let size = self.vs.size as usize;
        header_length + size
    }
}

/// One authenticated variable record as it appears on the wire
#[derive(Debug, Clone)]
pub struct VariableRecord {
    pub vendor: Guid,
    pub name: String,
    /// NameSize field: bytes of UTF-16LE name including the terminator
    pub name_size: u32,
    pub data: Vec<u8>,
    /// On-flash state byte
    pub state: u8,
    pub attributes: u32,
    pub monotonic_count: u64,
    pub timestamp: EfiTime,
    pub pub_key_index: u32,
}

// ============================================================================
// Header construction / decoding
// ============================================================================

/// Build the canonical Firmware Volume header + Variable Store header.
///
/// Returns `VARIABLE_DATA_OFFSET` bytes to be placed at offset 0 of the image.
pub fn build_fv_headers(layout: &StoreLayout) -> Result<Vec<u8>> {
    let mut fv = FirmwareVolumeHeader {
        zero_vector: [0; 16],
        file_system_guid: EFI_SYSTEM_NV_DATA_FV_GUID,
        fv_length: layout.image_size as u64,
        signature: FV_SIGNATURE,
        attributes: FV_ATTRIBUTES,
        header_length: FV_HEADER_LENGTH as u16,
        checksum: 0,
        ext_header_offset: 0,
        reserved: 0,
        revision: FV_REVISION,
        block_map: [
            FvBlockMapEntry {
                num_blocks: layout.num_blocks()?,
                length: layout.block_size,
            },
            FvBlockMapEntry {
                num_blocks: 0,
                length: 0,
            },
        ],
    };
    fv.checksum = compute_fv_checksum(fv.as_bytes());

    let vs = VariableStoreHeader {
        signature: EFI_AUTH_VARIABLE_GUID,
        size: layout.variable_store_size()?,
        format: VARIABLE_STORE_FORMATTED,
        state: VARIABLE_STORE_HEALTHY,
        reserved: 0,
        reserved1: 0,
    };

    let mut buf = Vec::with_capacity(VARIABLE_DATA_OFFSET);
    buf.extend_from_slice(fv.as_bytes());
    buf.extend_from_slice(vs.as_bytes());
    Ok(buf)
}

/// Compute the 16-bit checksum for the FV header.
///
/// Returns the value to store at the Checksum field such that the sum of
/// all u16 words across the header equals 0.
fn compute_fv_checksum(header: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for i in (0..header.len()).step_by(2) {
        if i == 0x32 {
            continue; // skip the checksum field itself
        }
        let lo = header[i] as u16;
        let hi = header.get(i + 1).copied().unwrap_or(0) as u16;
        sum = sum.wrapping_add(lo | (hi << 8));
    }
    0u16.wrapping_sub(sum)
}

/// Sum of all u16 words of a header; zero for a valid checksum
fn fv_word_sum(header: &[u8]) -> u16 {
    header
        .chunks(2)
        .map(|c| c[0] as u16 | (c.get(1).copied().unwrap_or(0) as u16) << 8)
        .fold(0u16, u16::wrapping_add)
}

/// Cursor over a store image used by the record decoder
pub struct RecordStream<'a> {
    image: &'a [u8],
    offset: usize,
    end: usize,
}

impl<'a> RecordStream<'a> {
    /// Start a stream at offset 0 of `image`
    pub fn new(image: &'a [u8]) -> Self {
        Self {
            image,
            offset: 0,
            end: image.len(),
        }
    }

    /// Current absolute offset
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn malformed(&self, reason: &str) -> VarStoreError {
        VarStoreError::MalformedStore {
            offset: self.offset,
            reason: reason.to_string(),
        }
    }
}

/// Decode the FV header and variable store header at the start of `stream`.
///
/// On success the stream is positioned at the first variable record and
/// bounded by the variable region the headers describe.
pub fn decode_headers(stream: &mut RecordStream<'_>) -> Result<Headers> {
    let (fv, _) = FirmwareVolumeHeader::read_from_prefix(&stream.image[stream.offset..])
        .map_err(|_| stream.malformed("truncated firmware volume header"))?;

    if { fv.signature } != FV_SIGNATURE {
        return Err(stream.malformed("firmware volume signature mismatch"));
    }

    let header_length = fv.header_length as usize;
    if header_length < FV_HEADER_LENGTH || header_length > stream.image.len() {
        return Err(stream.malformed("firmware volume header length out of range"));
    }
    if fv_word_sum(&stream.image[..header_length]) != 0 {
        log::warn!("FV header checksum mismatch, continuing");
    }

    stream.offset = header_length;
    let (vs, _) = VariableStoreHeader::read_from_prefix(&stream.image[stream.offset..])
        .map_err(|_| stream.malformed("truncated variable store header"))?;

    if vs.signature != EFI_AUTH_VARIABLE_GUID {
        return Err(stream.malformed("variable store is not in authenticated format"));
    }
    if vs.format != VARIABLE_STORE_FORMATTED {
        return Err(stream.malformed("variable store is not formatted"));
    }

    let headers = Headers { fv, vs };
    stream.offset += VS_HEADER_LENGTH;
    stream.end = headers.variable_region_end().min(stream.image.len());

    log::debug!(
        "variable store headers decoded: fv_length={:#x}, records end at {:#x}",
        { fv.fv_length },
        stream.end
    );

    Ok(headers)
}

// ============================================================================
// Variable record reading
// ============================================================================

/// Decode the next variable record.
///
/// Returns `Ok(None)` at the end of the store: when no full header fits in
/// the remaining region or the next slot does not start with the record
/// marker (erased flash). Deleted records are returned too; callers filter.
pub fn decode_record(stream: &mut RecordStream<'_>) -> Result<Option<VariableRecord>> {
    stream.offset = align_up(stream.offset, HEADER_ALIGNMENT);
    if stream.offset + AUTH_VAR_HEADER_SIZE > stream.end {
        return Ok(None);
    }

    let (hdr, _) = AuthVariableHeader::read_from_prefix(&stream.image[stream.offset..stream.end])
        .map_err(|_| stream.malformed("truncated variable header"))?;

    if { hdr.start_id } != VARIABLE_DATA {
        return Ok(None);
    }

    let name_size = hdr.name_size;
    let data_size = hdr.data_size;
    let name_offset = stream.offset + AUTH_VAR_HEADER_SIZE;
    let data_offset = name_offset
        .checked_add(name_size as usize)
        .ok_or_else(|| stream.malformed("variable name size overflows"))?;
    let record_end = data_offset
        .checked_add(data_size as usize)
        .ok_or_else(|| stream.malformed("variable data size overflows"))?;

    if record_end > stream.end {
        return Err(stream.malformed("variable record extends past the variable store"));
    }

    let name = ucs2_decode(&stream.image[name_offset..data_offset])
        .ok_or_else(|| stream.malformed("variable name is not valid UTF-16"))?;

    let record = VariableRecord {
        vendor: Guid::from_bytes(&hdr.vendor_guid),
        name,
        name_size,
        data: stream.image[data_offset..record_end].to_vec(),
        state: hdr.state,
        attributes: hdr.attributes,
        monotonic_count: hdr.monotonic_count,
        timestamp: hdr.time_stamp,
        pub_key_index: hdr.pub_key_index,
    };

    stream.offset = record_end;
    Ok(Some(record))
}

// ============================================================================
// Variable record writing
// ============================================================================

/// Encode an authenticated variable record (header + name bytes + data).
///
/// The returned bytes are not padded; the caller aligns the next record.
pub fn encode_record(record: &VariableRecord) -> Vec<u8> {
    let name_bytes = ucs2_encode(&record.name, record.name_size as usize);

    let hdr = AuthVariableHeader {
        start_id: VARIABLE_DATA,
        state: record.state,
        reserved: 0,
        attributes: record.attributes,
        monotonic_count: record.monotonic_count,
        time_stamp: record.timestamp,
        pub_key_index: record.pub_key_index,
        name_size: name_bytes.len() as u32,
        data_size: record.data.len() as u32,
        vendor_guid: guid_to_bytes(&record.vendor),
    };

    let mut buf = Vec::with_capacity(AUTH_VAR_HEADER_SIZE + name_bytes.len() + record.data.len());
    buf.extend_from_slice(hdr.as_bytes());
    buf.extend_from_slice(&name_bytes);
    buf.extend_from_slice(&record.data);
    buf
}

/// Check whether an on-flash state byte describes a visible variable.
///
/// The variable must carry the added bit and must not be deleted.
pub fn is_var_added(raw_state: u8) -> bool {
    let logical = raw_state ^ 0xFF;
    logical & state::ADDED != 0 && logical & state::DELETED == 0
}

// ============================================================================
// Helpers
// ============================================================================

/// Align a value up to the given alignment (must be a power of 2).
pub fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
