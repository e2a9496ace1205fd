//! 128-bit identifiers used for requests, traces and bus packets
//!
//! The text form is four dash-separated lowercase hex groups without
//! leading zeros, most significant group first (`1-2a-0-ff`).

use crate::error::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 128-bit identifier split into two 64-bit halves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Guid {
    /// Most significant half
    pub first: u64,
    /// Least significant half
    pub second: u64,
}

impl Guid {
    /// Size of the binary form in bytes
    pub const SIZE: usize = 16;

    pub const fn new(first: u64, second: u64) -> Self {
        Self { first, second }
    }

    /// Random identifier backed by a v4 uuid
    pub fn create() -> Self {
        Self::from_u128(uuid::Uuid::new_v4().as_u128())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self {
            first: (value >> 64) as u64,
            second: value as u64,
        }
    }

    pub const fn as_u128(&self) -> u128 {
        ((self.first as u128) << 64) | self.second as u128
    }

    pub const fn is_empty(&self) -> bool {
        self.first == 0 && self.second == 0
    }

    /// Little-endian binary form: `first` then `second`
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..8].copy_from_slice(&self.first.to_le_bytes());
        out[8..].copy_from_slice(&self.second.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&bytes[..8]);
        second.copy_from_slice(&bytes[8..]);
        Self {
            first: u64::from_le_bytes(first),
            second: u64::from_le_bytes(second),
        }
    }

    /// Hex dump of the binary form, handy in packet traces
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}-{:x}-{:x}-{:x}",
            self.first >> 32,
            self.first & 0xffff_ffff,
            self.second >> 32,
            self.second & 0xffff_ffff
        )
    }
}

impl FromStr for Guid {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TypesError::InvalidGuid {
            input: s.to_string(),
        };

        let mut parts = [0u64; 4];
        let mut count = 0;
        for group in s.split('-') {
            if count == 4 || group.is_empty() || group.len() > 8 {
                return Err(invalid());
            }
            parts[count] = u64::from_str_radix(group, 16).map_err(|_| invalid())?;
            count += 1;
        }
        if count != 4 {
            return Err(invalid());
        }

        Ok(Self {
            first: (parts[0] << 32) | parts[1],
            second: (parts[2] << 32) | parts[3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form() {
        let guid = Guid::new(0x0000_0001_0000_002a, 0x0000_0000_0000_00ff);
        assert_eq!(guid.to_string(), "1-2a-0-ff");
        assert_eq!("1-2a-0-ff".parse::<Guid>().unwrap(), guid);
    }

    #[test]
    fn test_rejects_malformed_text() {
        assert!("1-2-3".parse::<Guid>().is_err());
        assert!("1-2-3-4-5".parse::<Guid>().is_err());
        assert!("1--3-4".parse::<Guid>().is_err());
        assert!("123456789-0-0-0".parse::<Guid>().is_err());
        assert!("xyz-0-0-0".parse::<Guid>().is_err());
    }

    #[test]
    fn test_created_ids_are_distinct() {
        let a = Guid::create();
        let b = Guid::create();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_u128_and_bytes() {
        let guid = Guid::from_u128(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10);
        assert_eq!(guid.as_u128(), 0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10);
        assert_eq!(Guid::from_bytes(guid.to_bytes()), guid);
        assert_eq!(guid.to_hex().len(), 32);
    }
}
