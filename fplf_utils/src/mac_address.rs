use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 48-bit Ethernet MAC address.
///
/// Stored as raw octets so it can be used directly as a map key and
/// written into OpenFlow match fields without conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// The all-ones broadcast address.
    pub const fn broadcast() -> Self {
        Self([0xff; 6])
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    /// Group bit set - includes broadcast and all multicast addresses.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 {
                return Err(MacParseError::WrongLength(s.to_string()));
            }
            octets[count] = u8::from_str_radix(part, 16)
                .map_err(|_| MacParseError::BadOctet(s.to_string()))?;
            count += 1;
        }
        if count != 6 {
            return Err(MacParseError::WrongLength(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Error, Debug)]
pub enum MacParseError {
    #[error("MAC address must have six colon-separated octets: {0}")]
    WrongLength(String),
    #[error("MAC address contains a non-hex octet: {0}")]
    BadOctet(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let mac: MacAddr = "00:00:00:00:00:01".parse().unwrap();
        assert_eq!(mac.octets(), [0, 0, 0, 0, 0, 1]);
        assert_eq!(mac.to_string(), "00:00:00:00:00:01");
    }

    #[test]
    fn parse_upper_case() {
        let mac: MacAddr = "DE:AD:BE:EF:00:0A".parse().unwrap();
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:0a");
    }

    #[test]
    fn reject_short_address() {
        assert!("00:00:00:00:01".parse::<MacAddr>().is_err());
    }

    #[test]
    fn reject_long_address() {
        assert!("00:00:00:00:00:00:01".parse::<MacAddr>().is_err());
    }

    #[test]
    fn reject_bad_octet() {
        assert!("00:00:zz:00:00:01".parse::<MacAddr>().is_err());
    }

    #[test]
    fn broadcast_detection() {
        assert!(MacAddr::broadcast().is_broadcast());
        assert!(MacAddr::broadcast().is_multicast());
        let unicast: MacAddr = "02:00:00:00:00:01".parse().unwrap();
        assert!(!unicast.is_broadcast());
        assert!(!unicast.is_multicast());
    }
}
