//! UEFI Authenticated Variable Support
//!
//! This module holds the pieces of the UEFI Specification Chapter 8 that the
//! variable store needs to understand authenticated variables: the attribute
//! bits, the well-known vendor GUIDs, the `EFI_TIME` timestamp layout and the
//! capability decoding of a variable's attribute field.
//!
//! Signature verification is not performed here. Authenticated payloads are
//! stored and returned exactly as supplied.

pub mod flags;
mod structures;

pub use flags::{Capabilities, decode as decode_attributes};
pub use structures::*;

use r_efi::efi::Guid;

// ============================================================================
// GUID Helper Functions
// ============================================================================

/// Convert a Guid to raw bytes (mixed-endian, as stored on disk)
pub fn guid_to_bytes(guid: &Guid) -> [u8; 16] {
    let bytes = guid.as_bytes();
    let mut result = [0u8; 16];
    result.copy_from_slice(bytes);
    result
}

/// Format a Guid as canonical lowercase hyphenated text
pub fn guid_to_string(guid: &Guid) -> String {
    uuid::Uuid::from_bytes_le(guid_to_bytes(guid))
        .hyphenated()
        .to_string()
}

/// Parse canonical GUID text into a Guid
pub fn guid_from_str(text: &str) -> Result<Guid, uuid::Error> {
    let uuid = uuid::Uuid::parse_str(text)?;
    Ok(Guid::from_bytes(&uuid.to_bytes_le()))
}

// ============================================================================
// Variable Attributes
// ============================================================================

/// Variable attributes (EFI_VARIABLE_*)
pub mod attributes {
    /// Variable is non-volatile (persists across resets)
    pub const NON_VOLATILE: u32 = 0x00000001;

    /// Variable is accessible during Boot Services
    pub const BOOTSERVICE_ACCESS: u32 = 0x00000002;

    /// Variable is accessible at Runtime (after ExitBootServices)
    pub const RUNTIME_ACCESS: u32 = 0x00000004;

    /// Variable contains hardware error record
    pub const HARDWARE_ERROR_RECORD: u32 = 0x00000008;

    /// Variable is authenticated with a monotonic count (deprecated)
    pub const AUTHENTICATED_WRITE_ACCESS: u32 = 0x00000010;

    /// Variable uses time-based authenticated write access
    /// When set, data must be prefixed with EFI_VARIABLE_AUTHENTICATION_2
    pub const TIME_BASED_AUTHENTICATED_WRITE_ACCESS: u32 = 0x00000020;

    /// Append data to existing variable (for signature databases)
    pub const APPEND_WRITE: u32 = 0x00000040;

    /// Every bit consumed by capability decoding
    pub const CAPABILITY_MASK: u32 = NON_VOLATILE
        | BOOTSERVICE_ACCESS
        | RUNTIME_ACCESS
        | HARDWARE_ERROR_RECORD
        | AUTHENTICATED_WRITE_ACCESS
        | TIME_BASED_AUTHENTICATED_WRITE_ACCESS
        | APPEND_WRITE;
}

// ============================================================================
// Well-known Vendor GUIDs
// ============================================================================

/// EFI Global Variable GUID
/// Used for: Boot####, BootOrder, PK, KEK, SetupMode, SecureBoot, etc.
pub const EFI_GLOBAL_VARIABLE_GUID: Guid = Guid::from_fields(
    0x8BE4DF61,
    0x93CA,
    0x11D2,
    0xAA,
    0x0D,
    &[0x00, 0xE0, 0x98, 0x03, 0x2B, 0x8C],
);

/// EFI Image Security Database GUID
/// Used for: db, dbx, dbt, dbr
pub const EFI_IMAGE_SECURITY_DATABASE_GUID: Guid = Guid::from_fields(
    0xD719B2CB,
    0x3D3A,
    0x4596,
    0xA3,
    0xBC,
    &[0xDA, 0xD0, 0x0E, 0x67, 0x65, 0x6F],
);

/// Shim lock GUID (MokList, SbatLevel, ...)
pub const SHIM_LOCK_GUID: Guid = Guid::from_fields(
    0x605DAB50,
    0xE046,
    0x4300,
    0xAB,
    0xB6,
    &[0x3D, 0xD8, 0x10, 0xDD, 0x8B, 0x23],
);

/// EDK2 SecureBootEnable variable GUID
pub const EFI_SECURE_BOOT_ENABLE_DISABLE_GUID: Guid = Guid::from_fields(
    0xF0A30BC7,
    0xAF08,
    0x4556,
    0x99,
    0xC4,
    &[0x00, 0x10, 0x09, 0xC9, 0x3A, 0x44],
);

/// EDK2 CustomMode variable GUID
pub const EFI_CUSTOM_MODE_ENABLE_GUID: Guid = Guid::from_fields(
    0xC076EC0C,
    0x7028,
    0x4399,
    0xA0,
    0x72,
    &[0x71, 0xEE, 0x5C, 0x44, 0x8B, 0x9F],
);

/// EDK2 VendorKeysNv variable GUID
pub const EFI_VENDOR_KEYS_NV_GUID: Guid = Guid::from_fields(
    0x9073E4E0,
    0x60EC,
    0x4B6E,
    0x99,
    0x03,
    &[0x4C, 0x22, 0x3C, 0x26, 0x0F, 0x3C],
);

/// EDK2 memory type information GUID
pub const EFI_MEMORY_TYPE_INFORMATION_GUID: Guid = Guid::from_fields(
    0x4C19049F,
    0x4137,
    0x4DD3,
    0x9C,
    0x10,
    &[0x8B, 0x97, 0xA8, 0x3F, 0xFD, 0xFA],
);

/// EDK2 monotonic counter vendor GUID (MTC)
pub const MTC_VENDOR_GUID: Guid = Guid::from_fields(
    0xEB704011,
    0x1402,
    0x11D3,
    0x8E,
    0x77,
    &[0x00, 0xA0, 0xC9, 0x69, 0x72, 0x3B],
);

/// OVMF platform configuration GUID
pub const OVMF_PLATFORM_CONFIG_GUID: Guid = Guid::from_fields(
    0x7235C51C,
    0x0C80,
    0x4CAB,
    0x87,
    0xAC,
    &[0x3B, 0x08, 0x4A, 0x63, 0x04, 0xB1],
);

/// systemd-boot loader variables GUID
pub const LOADER_VARIABLE_GUID: Guid = Guid::from_fields(
    0x4A67B082,
    0x0A4C,
    0x41CF,
    0xB6,
    0xC7,
    &[0x44, 0x0B, 0x29, 0xBB, 0x8C, 0x4F],
);

/// Microsoft vendor GUID (signature owner of Microsoft keys)
pub const MICROSOFT_VENDOR_GUID: Guid = Guid::from_fields(
    0x77FA9ABD,
    0x0359,
    0x4D32,
    0xBD,
    0x60,
    &[0x28, 0xF4, 0xE7, 0x8F, 0x78, 0x4B],
);

/// Well-known vendor GUIDs and the names EDK2 gives them
pub const KNOWN_VENDORS: &[(Guid, &str)] = &[
    (EFI_GLOBAL_VARIABLE_GUID, "EfiGlobalVariable"),
    (EFI_IMAGE_SECURITY_DATABASE_GUID, "EfiImageSecurityDatabase"),
    (SHIM_LOCK_GUID, "ShimLock"),
    (EFI_SECURE_BOOT_ENABLE_DISABLE_GUID, "EfiSecureBootEnableDisable"),
    (EFI_CUSTOM_MODE_ENABLE_GUID, "EfiCustomModeEnable"),
    (EFI_VENDOR_KEYS_NV_GUID, "EfiVendorKeysNv"),
    (EFI_MEMORY_TYPE_INFORMATION_GUID, "EfiMemoryTypeInformation"),
    (MTC_VENDOR_GUID, "MtcVendor"),
    (OVMF_PLATFORM_CONFIG_GUID, "OvmfPlatformConfig"),
    (LOADER_VARIABLE_GUID, "LoaderVariable"),
    (MICROSOFT_VENDOR_GUID, "MicrosoftVendor"),
];

/// Resolve a vendor GUID to a human readable name
///
/// Well-known GUIDs resolve to their EDK2 names; anything else resolves to
/// its canonical text form.
pub fn resolve_vendor_name(guid: &Guid) -> String {
    let bytes = guid_to_bytes(guid);
    KNOWN_VENDORS
        .iter()
        .find(|(known, _)| guid_to_bytes(known) == bytes)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| guid_to_string(guid))
}
