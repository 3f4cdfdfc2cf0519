//! UEFI Authentication Data Structures
//!
//! This module defines the data structures used for UEFI authenticated variables
//! as specified in the UEFI Specification Chapter 8.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::efi::varstore::SerializedTime;

// ============================================================================
// EFI_TIME Structure
// ============================================================================

/// EFI_TIME structure for timestamps
///
/// Stored in every authenticated variable header. Time-based authenticated
/// variables record the timestamp of their last signed update here.
#[repr(C, packed)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct EfiTime {
    /// Year (1900 - 9999)
    pub year: u16,
    /// Month (1 - 12)
    pub month: u8,
    /// Day (1 - 31)
    pub day: u8,
    /// Hour (0 - 23)
    pub hour: u8,
    /// Minute (0 - 59)
    pub minute: u8,
    /// Second (0 - 59)
    pub second: u8,
    /// Padding
    pub pad1: u8,
    /// Nanoseconds (0 - 999,999,999)
    pub nanosecond: u32,
    /// Timezone (-1440 to 1440, or 2047 for unspecified)
    pub timezone: i16,
    /// Daylight savings flags
    pub daylight: u8,
    /// Padding
    pub pad2: u8,
}

impl EfiTime {
    /// Create a zero-initialized EFI_TIME
    pub const fn zero() -> Self {
        Self {
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            pad1: 0,
            nanosecond: 0,
            timezone: 0,
            daylight: 0,
            pad2: 0,
        }
    }

    /// Convert from SerializedTime (document form)
    pub fn from_serialized(st: &SerializedTime) -> Self {
        Self {
            year: st.year,
            month: st.month,
            day: st.day,
            hour: st.hour,
            minute: st.minute,
            second: st.second,
            pad1: 0,
            nanosecond: st.nanosecond,
            timezone: st.timezone,
            daylight: st.daylight,
            pad2: 0,
        }
    }

    /// Convert to SerializedTime (document form)
    pub fn to_serialized(&self) -> SerializedTime {
        SerializedTime {
            year: self.year,
            month: self.month,
            day: self.day,
            hour: self.hour,
            minute: self.minute,
            second: self.second,
            nanosecond: self.nanosecond,
            timezone: self.timezone,
            daylight: self.daylight,
        }
    }
}

impl Default for EfiTime {
    fn default() -> Self {
        Self::zero()
    }
}
