//! Variable attribute capability decoding
//!
//! A variable's attribute field is a bitfield. Loading a variable turns the
//! seven low bits into a [`Capabilities`] set and keeps whatever remains as a
//! residual raw value. The transform is one-way: the residual has every
//! consumed bit cleared, whether or not it was set, so it no longer matches
//! the original attribute value.
//!
//! Note the inverted polarity of bit 0: the bit marks a variable as
//! non-volatile, so its *absence* sets [`Capabilities::volatile`].

use serde::{Deserialize, Serialize};

use super::attributes::{
    APPEND_WRITE, AUTHENTICATED_WRITE_ACCESS, BOOTSERVICE_ACCESS, CAPABILITY_MASK,
    HARDWARE_ERROR_RECORD, NON_VOLATILE, RUNTIME_ACCESS, TIME_BASED_AUTHENTICATED_WRITE_ACCESS,
};

/// Decoded capability set of a variable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    /// `NON_VOLATILE` was absent
    pub volatile: bool,
    /// `BOOTSERVICE_ACCESS`
    pub boot_access: bool,
    /// `RUNTIME_ACCESS`
    pub runtime_access: bool,
    /// `HARDWARE_ERROR_RECORD`
    pub hardware_error_record: bool,
    /// `AUTHENTICATED_WRITE_ACCESS`
    pub authenticated_write_access: bool,
    /// `TIME_BASED_AUTHENTICATED_WRITE_ACCESS`
    pub time_based_authenticated_write_access: bool,
    /// `APPEND_WRITE`
    pub append_write: bool,
}

impl Capabilities {
    /// Re-encode the capability set into its attribute bits
    ///
    /// Only the seven capability bits are produced; OR the result with a
    /// residual to rebuild a full attribute value.
    pub fn to_raw(&self) -> u32 {
        let mut raw = 0;
        if !self.volatile {
            raw |= NON_VOLATILE;
        }
        if self.boot_access {
            raw |= BOOTSERVICE_ACCESS;
        }
        if self.runtime_access {
            raw |= RUNTIME_ACCESS;
        }
        if self.hardware_error_record {
            raw |= HARDWARE_ERROR_RECORD;
        }
        if self.authenticated_write_access {
            raw |= AUTHENTICATED_WRITE_ACCESS;
        }
        if self.time_based_authenticated_write_access {
            raw |= TIME_BASED_AUTHENTICATED_WRITE_ACCESS;
        }
        if self.append_write {
            raw |= APPEND_WRITE;
        }
        raw
    }
}

/// Decode an attribute field
///
/// Returns the capability set and the residual raw value with all seven
/// capability bits cleared. Bits above `APPEND_WRITE` pass through.
pub fn decode(raw: u32) -> (Capabilities, u32) {
    let capabilities = Capabilities {
        volatile: raw & NON_VOLATILE == 0,
        boot_access: raw & BOOTSERVICE_ACCESS != 0,
        runtime_access: raw & RUNTIME_ACCESS != 0,
        hardware_error_record: raw & HARDWARE_ERROR_RECORD != 0,
        authenticated_write_access: raw & AUTHENTICATED_WRITE_ACCESS != 0,
        time_based_authenticated_write_access: raw & TIME_BASED_AUTHENTICATED_WRITE_ACCESS != 0,
        append_write: raw & APPEND_WRITE != 0,
    };

    (capabilities, raw & !CAPABILITY_MASK)
}
