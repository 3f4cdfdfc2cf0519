//! ovmf-varstore - OVMF authenticated variable store images
//!
//! This library reads, creates and rewrites the NVRAM image a QEMU/OVMF
//! virtual machine keeps its UEFI variables in. The image is only touched
//! while the machine is stopped.
//!
//! ```no_run
//! use ovmf_varstore::{AuthenticatedVariable, EfiVars, NewVariable};
//! use ovmf_varstore::efi::auth::EFI_GLOBAL_VARIABLE_GUID;
//!
//! let vars = EfiVars::new("OVMF_VARS.fd", || false);
//! vars.create_empty()?;
//! vars.write(vec![AuthenticatedVariable::new(NewVariable {
//!     vendor: Some(EFI_GLOBAL_VARIABLE_GUID),
//!     name: Some("Timeout".to_string()),
//!     data: Some(vec![5, 0]),
//!     attributes: Some(0x7),
//!     ..NewVariable::default()
//! })])?;
//! # Ok::<(), ovmf_varstore::VarStoreError>(())
//! ```

pub mod efi;

pub use efi::auth::Capabilities;
pub use efi::varstore::{
    AuthenticatedVariable, EfiVars, MachineState, NewVariable, Result, Store, StoreLayout,
    VarStoreError, create_empty, read, write,
};
