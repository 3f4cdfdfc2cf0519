//! JSON variable documents
//!
//! A document describes variables outside of a store image, grouped by
//! vendor and then by name:
//!
//! ```json
//! {
//!   "EfiGlobalVariable": {
//!     "BootOrder": { "attributes": 7, "data": "0000" }
//!   }
//! }
//! ```
//!
//! Vendor keys are either a well-known vendor name or GUID text. Payloads are
//! hex strings. Every other field is optional and defaults to zero.
//!
//! Importing a document has load semantics: capabilities are decoded once,
//! exactly as for a variable read from a store image.

use std::collections::BTreeMap;

use r_efi::efi::Guid;
use serde::{Deserialize, Serialize};

use super::edk2::{VAR_ADDED, VariableRecord};
use super::{AuthenticatedVariable, Result, SerializedTime, Store, VarStoreError};
use crate::efi::auth::{self, EfiTime};
use crate::efi::utils::ucs2_wire_size;

/// One variable in a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDocument {
    /// Attribute bits, capability bits included
    #[serde(default)]
    pub attributes: u32,
    /// Payload
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub monotonic_count: u64,
    #[serde(default)]
    pub pub_key_index: u32,
    #[serde(default)]
    pub timestamp: SerializedTime,
}

/// Vendor -> name -> variable
pub type StoreDocument = BTreeMap<String, BTreeMap<String, VariableDocument>>;

mod hex_bytes {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text.trim()).map_err(D::Error::custom)
    }
}

/// Resolve a document vendor key to a GUID
///
/// Well-known vendor names are tried first, then GUID text.
pub fn parse_vendor(vendor: &str) -> Result<Guid> {
    if let Some((guid, _)) = auth::KNOWN_VENDORS
        .iter()
        .find(|(_, name)| *name == vendor)
    {
        return Ok(*guid);
    }

    auth::guid_from_str(vendor)
        .map_err(|e| VarStoreError::InvalidDocument(format!("vendor {:?}: {}", vendor, e)))
}

/// Reconstruct a variable from its document form
pub fn from_document(vendor: &str, name: &str, doc: &VariableDocument) -> Result<AuthenticatedVariable> {
    if name.contains('\0') {
        return Err(VarStoreError::InvalidDocument(format!(
            "variable name {:?} contains a NUL character",
            name
        )));
    }

    let record = VariableRecord {
        vendor: parse_vendor(vendor)?,
        name: name.to_string(),
        name_size: ucs2_wire_size(name),
        data: doc.data.clone(),
        state: VAR_ADDED,
        attributes: doc.attributes,
        monotonic_count: doc.monotonic_count,
        timestamp: EfiTime::from_serialized(&doc.timestamp),
        pub_key_index: doc.pub_key_index,
    };

    Ok(AuthenticatedVariable::load(record))
}

/// Document form of a variable
pub fn to_variable_document(variable: &AuthenticatedVariable) -> VariableDocument {
    VariableDocument {
        attributes: variable.wire_attributes(),
        data: variable.data().to_vec(),
        monotonic_count: variable.monotonic_count(),
        pub_key_index: variable.pub_key_index(),
        timestamp: variable.timestamp().to_serialized(),
    }
}

/// Parse a JSON document into variables, in document order
pub fn parse_document(json: &str) -> Result<Vec<AuthenticatedVariable>> {
    let document: StoreDocument =
        serde_json::from_str(json).map_err(|e| VarStoreError::InvalidDocument(e.to_string()))?;

    let mut variables = Vec::new();
    for (vendor, entries) in &document {
        for (name, doc) in entries {
            variables.push(from_document(vendor, name, doc)?);
        }
    }

    log::debug!(
        "Parsed variable document: {} vendors, {} variables",
        document.len(),
        variables.len()
    );
    Ok(variables)
}

/// Document form of a store, keyed by resolved vendor name
pub fn to_document(store: &Store) -> StoreDocument {
    store
        .by_vendor()
        .into_iter()
        .map(|(vendor, variables)| {
            let entries = variables
                .into_iter()
                .map(|(name, variable)| (name.to_string(), to_variable_document(variable)))
                .collect();
            (vendor, entries)
        })
        .collect()
}

/// Serialize a store as a pretty-printed JSON document
pub fn to_json(store: &Store) -> Result<String> {
    serde_json::to_string_pretty(&to_document(store))
        .map_err(|e| VarStoreError::InvalidDocument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efi::auth::{EFI_GLOBAL_VARIABLE_GUID, EFI_IMAGE_SECURITY_DATABASE_GUID};
    use crate::efi::varstore::NewVariable;

    #[test]
    fn test_import_decodes_capabilities() {
        let json = r#"{
            "EfiGlobalVariable": {
                "BootOrder": { "attributes": 7, "data": "0100" }
            }
        }"#;

        let variables = parse_document(json).unwrap();
        assert_eq!(variables.len(), 1);
        let boot_order = &variables[0];
        assert_eq!(boot_order.vendor(), &EFI_GLOBAL_VARIABLE_GUID);
        assert_eq!(boot_order.name(), "BootOrder");
        assert_eq!(boot_order.name_size(), 20);
        assert_eq!(boot_order.data(), [1, 0]);
        assert_eq!(boot_order.attributes(), 0);
        assert!(!boot_order.is_deleted());

        let caps = boot_order.capabilities().unwrap();
        assert!(!caps.volatile);
        assert!(caps.boot_access);
        assert!(caps.runtime_access);
        assert!(!caps.append_write);
    }

    #[test]
    fn test_import_accepts_guid_text() {
        let json = r#"{
            "d719b2cb-3d3a-4596-a3bc-dad00e67656f": {
                "db": { "attributes": 39, "data": "AABB", "monotonic_count": 3 }
            }
        }"#;

        let variables = parse_document(json).unwrap();
        assert_eq!(variables[0].vendor(), &EFI_IMAGE_SECURITY_DATABASE_GUID);
        assert_eq!(variables[0].data(), [0xAA, 0xBB]);
        assert_eq!(variables[0].monotonic_count(), 3);
        assert!(
            variables[0]
                .capabilities()
                .unwrap()
                .time_based_authenticated_write_access
        );
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            parse_document("not json"),
            Err(VarStoreError::InvalidDocument(_))
        ));
        assert!(matches!(
            parse_document(r#"{ "NoSuchVendor": { "X": {} } }"#),
            Err(VarStoreError::InvalidDocument(_))
        ));
        assert!(matches!(
            parse_document(r#"{ "EfiGlobalVariable": { "X": { "data": "zz" } } }"#),
            Err(VarStoreError::InvalidDocument(_))
        ));
        assert!(matches!(
            parse_document(r#"{ "EfiGlobalVariable": { "A\u0000B": {} } }"#),
            Err(VarStoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_export_then_import_preserves_decoded_values() {
        let constructed = AuthenticatedVariable::new(NewVariable {
            vendor: Some(EFI_GLOBAL_VARIABLE_GUID),
            name: Some("Lang".to_string()),
            data: Some(b"eng".to_vec()),
            attributes: Some(0x0001_0003),
            ..NewVariable::default()
        });
        let mut store = Store::new();
        store.insert(AuthenticatedVariable::load(constructed.to_record()));

        let json = to_json(&store).unwrap();
        assert!(json.contains("\"EfiGlobalVariable\""));
        assert!(json.contains("\"656e67\""));

        let imported = parse_document(&json).unwrap();
        let original = store.get(&EFI_GLOBAL_VARIABLE_GUID, "Lang").unwrap();
        assert_eq!(&imported[0], original);
        assert_eq!(imported[0].attributes(), 0x0001_0000);
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let variables = parse_document(r#"{ "EfiGlobalVariable": { "Empty": {} } }"#).unwrap();
        assert!(variables[0].data().is_empty());
        assert_eq!(variables[0].pub_key_index(), 0);
        assert_eq!(variables[0].timestamp(), &EfiTime::zero());
        assert!(variables[0].capabilities().unwrap().volatile);
    }
}
