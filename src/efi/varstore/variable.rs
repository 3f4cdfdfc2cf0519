//! Authenticated variable model
//!
//! There are two ways to get an [`AuthenticatedVariable`], and they treat the
//! attribute field differently:
//!
//! - **Construction** ([`AuthenticatedVariable::new`]) stores the caller's raw
//!   attribute value verbatim. No capabilities are decoded.
//! - **Loading** ([`AuthenticatedVariable::load`], from a store image or a
//!   document) decodes the capabilities once and keeps only the residual
//!   attribute bits.
//!
//! A constructed variable is decoded on the next read of the store it was
//! written to.

use r_efi::efi::Guid;

use super::VariableKey;
use super::edk2::{self, VariableRecord};
use crate::efi::auth::{Capabilities, EfiTime, decode_attributes};
use crate::efi::utils::ucs2_wire_size;

/// Fields of a new variable; anything left unset defaults to zero/empty
#[derive(Debug, Clone, Default)]
pub struct NewVariable {
    pub vendor: Option<Guid>,
    pub name: Option<String>,
    pub data: Option<Vec<u8>>,
    /// Logical state (e.g. `state::HEADER_VALID | state::ADDED`)
    pub state: Option<u8>,
    /// Raw attribute bits, stored without decoding
    pub attributes: Option<u32>,
}

/// One authenticated variable
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedVariable {
    vendor: Guid,
    name: String,
    name_size: u32,
    data: Vec<u8>,
    monotonic_count: u64,
    timestamp: EfiTime,
    pub_key_index: u32,
    /// On-flash state byte
    state: u8,
    /// Raw attributes, or the residual once capabilities were decoded
    attributes: u32,
    capabilities: Option<Capabilities>,
}

impl AuthenticatedVariable {
    /// Construct a new variable
    ///
    /// A supplied state is the logical state and is stored complemented. An
    /// unset state means a header-valid, added variable (on-flash `VAR_ADDED`)
    /// so the firmware sees it. The name's wire size is its UTF-16 length in
    /// bytes plus the terminator.
    pub fn new(fields: NewVariable) -> Self {
        let name_size = fields.name.as_deref().map_or(0, ucs2_wire_size);
        let name = fields.name.unwrap_or_default();
        let state = fields
            .state
            .unwrap_or(edk2::state::HEADER_VALID | edk2::state::ADDED);

        Self {
            vendor: fields.vendor.unwrap_or(Guid::from_bytes(&[0; 16])),
            name,
            name_size,
            data: fields.data.unwrap_or_default(),
            monotonic_count: 0,
            timestamp: EfiTime::zero(),
            pub_key_index: 0,
            state: state ^ 0xFF,
            attributes: fields.attributes.unwrap_or(0),
            capabilities: None,
        }
    }

    /// Load a variable decoded from a store image or document
    ///
    /// Capabilities are decoded here and the consumed attribute bits cleared.
    pub fn load(record: VariableRecord) -> Self {
        Self {
            vendor: record.vendor,
            name: record.name,
            name_size: record.name_size,
            data: record.data,
            monotonic_count: record.monotonic_count,
            timestamp: record.timestamp,
            pub_key_index: record.pub_key_index,
            state: record.state,
            attributes: record.attributes,
            capabilities: None,
        }
        .decoded()
    }

    /// Decode capabilities unless that already happened
    fn decoded(mut self) -> Self {
        if self.capabilities.is_none() {
            let (capabilities, residual) = decode_attributes(self.attributes);
            self.capabilities = Some(capabilities);
            self.attributes = residual;
        }
        self
    }

    /// Set the monotonic counter
    pub fn with_monotonic_count(mut self, count: u64) -> Self {
        self.monotonic_count = count;
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: EfiTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the public key index
    pub fn with_pub_key_index(mut self, index: u32) -> Self {
        self.pub_key_index = index;
        self
    }

    pub fn vendor(&self) -> &Guid {
        &self.vendor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire size of the name (UTF-16LE bytes including terminator)
    pub fn name_size(&self) -> u32 {
        self.name_size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn monotonic_count(&self) -> u64 {
        self.monotonic_count
    }

    pub fn timestamp(&self) -> &EfiTime {
        &self.timestamp
    }

    pub fn pub_key_index(&self) -> u32 {
        self.pub_key_index
    }

    /// On-flash state byte
    pub fn state(&self) -> u8 {
        self.state
    }

    /// Raw attributes as constructed, or the residual after decoding
    pub fn attributes(&self) -> u32 {
        self.attributes
    }

    /// Decoded capabilities; `None` for a variable that was never loaded
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Attribute value to write to disk
    ///
    /// For a loaded variable the decoded capability bits are merged back into
    /// the residual so that the next load sees the same capabilities.
    pub fn wire_attributes(&self) -> u32 {
        match &self.capabilities {
            Some(capabilities) => self.attributes | capabilities.to_raw(),
            None => self.attributes,
        }
    }

    /// Check whether the variable is logically deleted
    ///
    /// A variable is visible only while its logical state has `ADDED` set and
    /// `DELETED` clear; either condition failing hides it.
    pub fn is_deleted(&self) -> bool {
        !edk2::is_var_added(self.state)
    }

    /// Store key of this variable
    pub fn key(&self) -> VariableKey {
        VariableKey::new(&self.vendor, &self.name)
    }

    /// Wire record for the codec
    pub fn to_record(&self) -> VariableRecord {
        VariableRecord {
            vendor: self.vendor,
            name: self.name.clone(),
            name_size: self.name_size,
            data: self.data.clone(),
            state: self.state,
            attributes: self.wire_attributes(),
            monotonic_count: self.monotonic_count,
            timestamp: self.timestamp,
            pub_key_index: self.pub_key_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efi::auth::{EFI_GLOBAL_VARIABLE_GUID, guid_to_bytes};
    use crate::efi::varstore::edk2::{VAR_ADDED, VAR_DELETED, state};

    #[test]
    fn test_unset_fields_default() {
        let var = AuthenticatedVariable::new(NewVariable::default());
        assert_eq!(guid_to_bytes(var.vendor()), [0; 16]);
        assert_eq!(var.name(), "");
        assert_eq!(var.name_size(), 0);
        assert!(var.data().is_empty());
        assert_eq!(var.attributes(), 0);
        assert_eq!(var.state(), VAR_ADDED);
        assert!(!var.is_deleted());
    }

    #[test]
    fn test_name_size_is_utf16_plus_terminator() {
        let var = AuthenticatedVariable::new(NewVariable {
            name: Some("Boot0000".to_string()),
            ..NewVariable::default()
        });
        assert_eq!(var.name_size(), 18);
    }

    #[test]
    fn test_state_is_stored_complemented() {
        let var = AuthenticatedVariable::new(NewVariable {
            state: Some(state::HEADER_VALID | state::ADDED | state::DELETED),
            ..NewVariable::default()
        });
        assert_eq!(var.state(), VAR_ADDED & VAR_DELETED);
        assert!(var.is_deleted());

        let var = AuthenticatedVariable::new(NewVariable {
            state: Some(0x12),
            ..NewVariable::default()
        });
        assert_eq!(var.state(), 0xED);
    }

    #[test]
    fn test_construction_keeps_raw_attributes() {
        let var = AuthenticatedVariable::new(NewVariable {
            attributes: Some(0x27),
            ..NewVariable::default()
        });
        assert_eq!(var.attributes(), 0x27);
        assert!(var.capabilities().is_none());
        assert_eq!(var.wire_attributes(), 0x27);
    }

    #[test]
    fn test_load_decodes_and_clears_bits() {
        let constructed = AuthenticatedVariable::new(NewVariable {
            vendor: Some(EFI_GLOBAL_VARIABLE_GUID),
            name: Some("SecureBoot".to_string()),
            data: Some(vec![1]),
            attributes: Some(0x0001_0026),
            ..NewVariable::default()
        });
        let loaded = AuthenticatedVariable::load(constructed.to_record());

        assert_eq!(loaded.attributes(), 0x0001_0000);
        let caps = loaded.capabilities().unwrap();
        assert!(caps.volatile);
        assert!(caps.boot_access);
        assert!(caps.runtime_access);
        assert!(caps.time_based_authenticated_write_access);
        assert!(!caps.append_write);
        assert_eq!(loaded.wire_attributes(), 0x0001_0026);
    }

    #[test]
    fn test_decoding_twice_keeps_capabilities() {
        let loaded = AuthenticatedVariable::load(
            AuthenticatedVariable::new(NewVariable {
                attributes: Some(0x7),
                ..NewVariable::default()
            })
            .to_record(),
        );
        let again = loaded.clone().decoded();
        assert_eq!(again, loaded);
        assert!(again.capabilities().unwrap().boot_access);
        assert!(!again.capabilities().unwrap().volatile);
    }

    #[test]
    fn test_reloading_a_loaded_variable_is_stable() {
        let loaded = AuthenticatedVariable::load(
            AuthenticatedVariable::new(NewVariable {
                name: Some("dbx".to_string()),
                attributes: Some(0x67),
                ..NewVariable::default()
            })
            .with_monotonic_count(9)
            .with_pub_key_index(2)
            .to_record(),
        );
        let reloaded = AuthenticatedVariable::load(loaded.to_record());
        assert_eq!(reloaded, loaded);
        assert_eq!(reloaded.monotonic_count(), 9);
        assert_eq!(reloaded.pub_key_index(), 2);
    }
}
