//! UEFI Variable Store
//!
//! This module manages an OVMF authenticated variable store image kept in a
//! file on the host. The image is the NVRAM flash region the firmware sees,
//! laid out in the EDK2 format described in [`edk2`].
//!
//! # Storage Architecture
//!
//! The image is never patched in place. Every write reads the current
//! variables, merges in the new ones, assembles a complete fresh image in
//! memory and atomically replaces the file:
//!
//! ```text
//! read(path) ──> Store ──merge(additions)──> Store
//!                                              │
//!                   FlashImage <──assemble─────┘
//!                       │
//!                       └──> temp file ──rename──> path
//! ```
//!
//! Rebuilding the full image keeps the headers and the working block
//! descriptor at their fixed offsets and drops deleted records from the file.
//!
//! # Concurrency
//!
//! Every entry point first checks a [`MachineState`] and refuses to touch the
//! image while the consuming machine runs. The check is advisory: callers
//! serialize access to a given path themselves.

pub mod document;
pub mod edk2;
pub mod guard;
pub mod persistence;
pub mod storage;
pub mod variable;

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use r_efi::efi::Guid;
use serde::{Deserialize, Serialize};

use crate::efi::auth::{self, guid_to_bytes};

pub use guard::{MachineState, assert_inactive};
pub use persistence::{EfiVars, create_empty, read, write};
pub use variable::{AuthenticatedVariable, NewVariable};

/// Default image size: 528 KiB, the OVMF variable flash region
pub const DEFAULT_IMAGE_SIZE: u32 = 528 * 1024;

/// Flash block size used in the FV block map
pub const DEFAULT_BLOCK_SIZE: u32 = 0x1000;

/// Size of the variable region from offset 0 (FV header + variable store)
pub const DEFAULT_VARIABLE_REGION_SIZE: u32 = 0x40000;

/// Absolute offset of the FTW working block descriptor
pub const DEFAULT_DESCRIPTOR_OFFSET: u32 = 0x41000;

/// Error types for variable store operations
#[derive(Debug)]
pub enum VarStoreError {
    /// A store already exists where an empty one was to be created
    StoreExists,
    /// The consuming machine is running
    ConcurrentAccess,
    /// The image could not be decoded
    MalformedStore { offset: usize, reason: String },
    /// A record did not start on a 4-byte boundary (internal bug)
    AlignmentInvariantViolated { offset: usize },
    /// The variables do not fit into the variable region
    CapacityExceeded { needed: usize, available: usize },
    /// An external variable document could not be parsed
    InvalidDocument(String),
    /// A store layout is inconsistent
    InvalidLayout(String),
    /// A variable name cannot be stored (embedded NUL)
    InvalidName(String),
    /// Filesystem error
    Io(io::Error),
}

impl fmt::Display for VarStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarStoreError::StoreExists => write!(f, "variable store already exists"),
            VarStoreError::ConcurrentAccess => write!(
                f,
                "machine is currently running; concurrent access to the variable store is unsupported"
            ),
            VarStoreError::MalformedStore { offset, reason } => {
                write!(f, "malformed variable store at {:#x}: {}", offset, reason)
            }
            VarStoreError::AlignmentInvariantViolated { offset } => {
                write!(f, "variable record at {:#x} is not 4-byte aligned", offset)
            }
            VarStoreError::CapacityExceeded { needed, available } => write!(
                f,
                "variable store full: need {} bytes, region ends at {}",
                needed, available
            ),
            VarStoreError::InvalidDocument(reason) => {
                write!(f, "invalid variable document: {}", reason)
            }
            VarStoreError::InvalidLayout(reason) => {
                write!(f, "invalid store layout: {}", reason)
            }
            VarStoreError::InvalidName(name) => {
                write!(f, "variable name {:?} contains a NUL character", name)
            }
            VarStoreError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for VarStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VarStoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for VarStoreError {
    fn from(error: io::Error) -> Self {
        VarStoreError::Io(error)
    }
}

/// Result type for variable store operations
pub type Result<T> = core::result::Result<T, VarStoreError>;

/// Geometry of a store image
///
/// The default is the OVMF 528 KiB variable flash: 0x84 blocks of 4 KiB,
/// variables in the first 256 KiB, the working block at 0x41000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    /// Total image size in bytes
    pub image_size: u32,
    /// FV block size
    pub block_size: u32,
    /// End of the variable region, measured from offset 0
    pub variable_region_size: u32,
    /// Offset of the FTW working block descriptor
    pub descriptor_offset: u32,
}

impl StoreLayout {
    /// The OVMF 528 KiB layout
    pub const OVMF_528K: Self = Self {
        image_size: DEFAULT_IMAGE_SIZE,
        block_size: DEFAULT_BLOCK_SIZE,
        variable_region_size: DEFAULT_VARIABLE_REGION_SIZE,
        descriptor_offset: DEFAULT_DESCRIPTOR_OFFSET,
    };

    /// Check that the regions of the layout fit together
    ///
    /// The block map must tile the image, the variable region must hold both
    /// headers and end before the working block descriptor, and the
    /// descriptor must fit inside the image.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(invalid_layout("block size is zero".to_string()));
        }
        if self.image_size % self.block_size != 0 {
            return Err(invalid_layout(format!(
                "image size {:#x} is not a multiple of the block size {:#x}",
                self.image_size, self.block_size
            )));
        }
        if (self.variable_region_size as usize) < edk2::VARIABLE_DATA_OFFSET {
            return Err(invalid_layout(format!(
                "variable region {:#x} is smaller than the store headers",
                self.variable_region_size
            )));
        }
        if self.variable_region_size > self.descriptor_offset {
            return Err(invalid_layout(format!(
                "variable region end {:#x} overlaps the descriptor at {:#x}",
                self.variable_region_size, self.descriptor_offset
            )));
        }
        let descriptor_end =
            self.descriptor_offset as usize + edk2::WORKING_BLOCK_DESCRIPTOR.len();
        if descriptor_end > self.image_size as usize {
            return Err(invalid_layout(format!(
                "descriptor end {:#x} is past the image end {:#x}",
                descriptor_end, self.image_size
            )));
        }
        Ok(())
    }

    /// Number of blocks in the FV block map
    pub fn num_blocks(&self) -> Result<u32> {
        self.image_size
            .checked_div(self.block_size)
            .ok_or_else(|| invalid_layout("block size is zero".to_string()))
    }

    /// `Size` field of the variable store header
    pub fn variable_store_size(&self) -> Result<u32> {
        self.variable_region_size
            .checked_sub(edk2::FV_HEADER_LENGTH as u32)
            .ok_or_else(|| {
                invalid_layout(format!(
                    "variable region {:#x} is smaller than the FV header",
                    self.variable_region_size
                ))
            })
    }
}

fn invalid_layout(reason: String) -> VarStoreError {
    VarStoreError::InvalidLayout(reason)
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::OVMF_528K
    }
}

/// Serialized EFI_TIME structure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
    pub timezone: i16,
    pub daylight: u8,
}

/// Identity of a variable within a store: vendor GUID plus name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableKey {
    vendor: [u8; 16],
    name: String,
}

impl VariableKey {
    /// Create a key from a vendor GUID and name
    pub fn new(vendor: &Guid, name: &str) -> Self {
        Self {
            vendor: guid_to_bytes(vendor),
            name: name.to_string(),
        }
    }

    /// The vendor GUID
    pub fn vendor(&self) -> Guid {
        Guid::from_bytes(&self.vendor)
    }

    /// The variable name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The visible variables of a store image
///
/// Keyed by (vendor, name); inserting an existing key replaces the previous
/// variable. Iteration order is by vendor GUID bytes, then name.
#[derive(Debug, Clone, Default)]
pub struct Store {
    variables: BTreeMap<VariableKey, AuthenticatedVariable>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable, returning the one it replaced
    pub fn insert(&mut self, variable: AuthenticatedVariable) -> Option<AuthenticatedVariable> {
        self.variables.insert(variable.key(), variable)
    }

    /// Insert every variable in order; later ones win
    pub fn merge(&mut self, additions: impl IntoIterator<Item = AuthenticatedVariable>) {
        for variable in additions {
            self.insert(variable);
        }
    }

    /// Get a variable by vendor GUID and name
    pub fn get(&self, vendor: &Guid, name: &str) -> Option<&AuthenticatedVariable> {
        self.variables.get(&VariableKey::new(vendor, name))
    }

    /// Get a variable by resolved vendor name (see [`auth::resolve_vendor_name`]) and name
    pub fn get_by_vendor_name(&self, vendor: &str, name: &str) -> Option<&AuthenticatedVariable> {
        self.variables
            .values()
            .find(|v| v.name() == name && auth::resolve_vendor_name(v.vendor()) == vendor)
    }

    /// Remove a variable
    pub fn remove(&mut self, vendor: &Guid, name: &str) -> Option<AuthenticatedVariable> {
        self.variables.remove(&VariableKey::new(vendor, name))
    }

    /// Iterate over all variables in store order
    pub fn iter(&self) -> impl Iterator<Item = &AuthenticatedVariable> {
        self.variables.values()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Check if the store holds no variables
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Number of distinct vendors owning at least one variable
    pub fn vendor_count(&self) -> usize {
        self.by_vendor().len()
    }

    /// Group variables by resolved vendor name, then by variable name
    pub fn by_vendor(&self) -> BTreeMap<String, BTreeMap<&str, &AuthenticatedVariable>> {
        let mut grouped: BTreeMap<String, BTreeMap<&str, &AuthenticatedVariable>> =
            BTreeMap::new();
        for variable in self.variables.values() {
            grouped
                .entry(auth::resolve_vendor_name(variable.vendor()))
                .or_default()
                .insert(variable.name(), variable);
        }
        grouped
    }
}

impl IntoIterator for Store {
    type Item = AuthenticatedVariable;
    type IntoIter = std::collections::btree_map::IntoValues<VariableKey, AuthenticatedVariable>;

    fn into_iter(self) -> Self::IntoIter {
        self.variables.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efi::auth::{EFI_GLOBAL_VARIABLE_GUID, EFI_IMAGE_SECURITY_DATABASE_GUID};

    fn var(vendor: Guid, name: &str, data: &[u8]) -> AuthenticatedVariable {
        AuthenticatedVariable::new(NewVariable {
            vendor: Some(vendor),
            name: Some(name.to_string()),
            data: Some(data.to_vec()),
            ..NewVariable::default()
        })
    }

    #[test]
    fn test_insert_replaces_same_key() {
        let mut store = Store::new();
        assert!(store.insert(var(EFI_GLOBAL_VARIABLE_GUID, "BootOrder", &[1])).is_none());
        let old = store
            .insert(var(EFI_GLOBAL_VARIABLE_GUID, "BootOrder", &[2]))
            .unwrap();
        assert_eq!(old.data(), [1]);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&EFI_GLOBAL_VARIABLE_GUID, "BootOrder").unwrap().data(),
            [2]
        );
    }

    #[test]
    fn test_same_name_different_vendor_are_distinct() {
        let mut store = Store::new();
        store.merge([
            var(EFI_GLOBAL_VARIABLE_GUID, "db", &[1]),
            var(EFI_IMAGE_SECURITY_DATABASE_GUID, "db", &[2]),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.vendor_count(), 2);
    }

    #[test]
    fn test_by_vendor_groups_by_resolved_name() {
        let mut store = Store::new();
        store.merge([
            var(EFI_GLOBAL_VARIABLE_GUID, "PK", &[1]),
            var(EFI_GLOBAL_VARIABLE_GUID, "KEK", &[2]),
            var(EFI_IMAGE_SECURITY_DATABASE_GUID, "db", &[3]),
        ]);

        let grouped = store.by_vendor();
        assert_eq!(grouped.len(), 2);
        let global = &grouped["EfiGlobalVariable"];
        assert_eq!(global.keys().copied().collect::<Vec<_>>(), ["KEK", "PK"]);
        assert_eq!(grouped["EfiImageSecurityDatabase"]["db"].data(), [3]);

        assert_eq!(
            store.get_by_vendor_name("EfiGlobalVariable", "PK").unwrap().data(),
            [1]
        );
        assert!(store.get_by_vendor_name("ShimLock", "PK").is_none());
    }

    #[test]
    fn test_remove() {
        let mut store = Store::new();
        store.insert(var(EFI_GLOBAL_VARIABLE_GUID, "Timeout", &[5]));
        assert!(store.remove(&EFI_GLOBAL_VARIABLE_GUID, "Timeout").is_some());
        assert!(store.is_empty());
        assert_eq!(store.vendor_count(), 0);
    }

    #[test]
    fn test_layout_defaults() {
        let layout = StoreLayout::default();
        assert_eq!(layout.image_size, 540_672);
        assert!(layout.validate().is_ok());
        assert_eq!(layout.num_blocks().unwrap(), 0x84);
        assert_eq!(layout.variable_store_size().unwrap(), 0x3FFB8);
    }

    fn assert_invalid(layout: StoreLayout) {
        assert!(matches!(
            layout.validate(),
            Err(VarStoreError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_zero_block_size_is_rejected() {
        let layout = StoreLayout {
            block_size: 0,
            ..StoreLayout::default()
        };
        assert_invalid(layout);
        assert!(layout.num_blocks().is_err());
    }

    #[test]
    fn test_block_size_must_tile_image() {
        assert_invalid(StoreLayout {
            block_size: 0x7000,
            ..StoreLayout::default()
        });
    }

    #[test]
    fn test_variable_region_must_hold_headers() {
        let layout = StoreLayout {
            variable_region_size: 0x10,
            ..StoreLayout::default()
        };
        assert_invalid(layout);
        assert!(layout.variable_store_size().is_err());

        assert_invalid(StoreLayout {
            variable_region_size: edk2::VARIABLE_DATA_OFFSET as u32 - 4,
            ..StoreLayout::default()
        });
    }

    #[test]
    fn test_variable_region_may_not_cover_descriptor() {
        assert_invalid(StoreLayout {
            variable_region_size: 0x50000,
            ..StoreLayout::default()
        });
        assert!(
            StoreLayout {
                variable_region_size: DEFAULT_DESCRIPTOR_OFFSET,
                ..StoreLayout::default()
            }
            .validate()
            .is_ok()
        );
    }

    #[test]
    fn test_descriptor_must_fit_in_image() {
        assert_invalid(StoreLayout {
            descriptor_offset: DEFAULT_IMAGE_SIZE - 16,
            ..StoreLayout::default()
        });
    }

    #[test]
    fn test_error_display() {
        let err = VarStoreError::MalformedStore {
            offset: 0x64,
            reason: "bad".to_string(),
        };
        assert_eq!(err.to_string(), "malformed variable store at 0x64: bad");
        assert!(VarStoreError::ConcurrentAccess.to_string().contains("running"));
    }
}
