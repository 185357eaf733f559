//! Device identifiers.
//!
//! Linux and Windows identify BLE devices by MAC address, macOS by a
//! per-host UUID. Both forms are accepted.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

const MAC_LEN: usize = 17;
const UUID_LEN: usize = 36;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid address: {0}")]
pub struct AddressError(pub String);

/// A validated device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    /// `AA:BB:CC:DD:EE:FF` or `AA-BB-CC-DD-EE-FF`.
    Mac([u8; 6]),
    /// Hyphenated 36 character UUID.
    Uuid(Uuid),
}

impl DeviceAddress {
    /// Shorthand for `s.parse().is_ok()`.
    pub fn is_valid(s: &str) -> bool {
        s.parse::<DeviceAddress>().is_ok()
    }

    fn parse_mac(s: &str) -> Option<[u8; 6]> {
        if s.len() != MAC_LEN {
            return None;
        }
        let bytes = s.as_bytes();
        let mut mac = [0u8; 6];
        for (i, octet) in mac.iter_mut().enumerate() {
            let at = i * 3;
            if i > 0 && !matches!(bytes[at - 1], b':' | b'-') {
                return None;
            }
            let pair = s.get(at..at + 2)?;
            if !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            *octet = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(mac)
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(mac) = Self::parse_mac(s) {
            return Ok(DeviceAddress::Mac(mac));
        }
        // Uuid::parse_str also takes simple and braced forms; only the
        // hyphenated one is an accepted identifier.
        if s.len() == UUID_LEN
            && let Ok(uuid) = Uuid::parse_str(s)
        {
            return Ok(DeviceAddress::Uuid(uuid));
        }
        Err(AddressError(s.to_string()))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Mac(b) => write!(
                f,
                "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            ),
            DeviceAddress::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_addresses() {
        assert_eq!(
            "AA:BB:CC:DD:EE:FF".parse(),
            Ok(DeviceAddress::Mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
        );
        assert!(DeviceAddress::is_valid("24-6f-28-ae-f6-b6"));
        assert!(DeviceAddress::is_valid("24:6f-28:ae-f6:b6"));
    }

    #[test]
    fn test_uuid_addresses() {
        let addr: DeviceAddress = "B9EA5233-37EF-4DD6-87A8-2A875E821C46".parse().unwrap();
        assert!(matches!(addr, DeviceAddress::Uuid(_)));
        assert_eq!(addr.to_string(), "b9ea5233-37ef-4dd6-87a8-2a875e821c46");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "not-an-address",
            "",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "AA:BB:CC:DD:EE:GG",
            "AA.BB.CC.DD.EE.FF",
            "AABBCCDDEEFF",
            "b9ea523337ef4dd687a82a875e821c46",
            "{b9ea5233-37ef-4dd6-87a8-2a875e821c46}",
            "b9ea5233-37ef-4dd6-87a8-2a875e821c4z",
        ] {
            assert!(!DeviceAddress::is_valid(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_display_normalises_mac() {
        let addr: DeviceAddress = "24-6f-28-ae-f6-b6".parse().unwrap();
        assert_eq!(addr.to_string(), "24:6F:28:AE:F6:B6");
    }
}
