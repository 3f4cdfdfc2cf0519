//! EFI variable storage
//!
//! This module provides the EFI-side pieces of the crate: GUIDs and attribute
//! handling in [`auth`], UCS-2 helpers in [`utils`] and the variable store
//! image itself in [`varstore`].

pub mod auth;
pub mod utils;
pub mod varstore;
