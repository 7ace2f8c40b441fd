//! MAC address type.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// Ordered byte-wise so it can key sorted tables.
///
/// ```
/// use ipstack_types::MacAddress;
///
/// let mac: MacAddress = "aa:bb:cc:dd:ee:01".parse().unwrap();
/// assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01");
/// assert!(mac.is_unicast());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// ff:ff:ff:ff:ff:ff
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// 00:00:00:00:00:00
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Builds an address from a netlink attribute payload. The payload must be
    /// exactly six bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(bytes).ok().map(MacAddress)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Group bit set in the first octet.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub const fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Returns the IPv4 multicast group this MAC was derived from, when the
    /// address is of the form `01:00:5e:0x:xx:xx` with bit 0x10 of the fourth
    /// octet clear.
    ///
    /// The IP-to-MAC mapping only keeps the low 23 bits of the group, so the
    /// five collapsed bits are assumed zero: the result always lies in
    /// 224.0.0.0 - 224.127.255.255.
    pub fn ipv4_multicast_group(&self) -> Option<Ipv4Addr> {
        let b = &self.0;
        if b[0] != 0x01 || b[1] != 0x00 || b[2] != 0x5e || b[3] & 0x10 != 0 {
            return None;
        }
        Some(Ipv4Addr::new(224, b[3] & 0x7f, b[4], b[5]))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains('-') { '-' } else { ':' };
        let mut bytes = [0u8; 6];
        let mut count = 0;

        for part in s.split(separator) {
            if count == 6 || part.len() != 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[count] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
            count += 1;
        }

        if count != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }
        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_and_display() {
        let mac: MacAddress = "AA-BB-CC-DD-EE-01".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn test_invalid_format() {
        assert!("aa:bb:cc:dd:ee".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:01:02".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:dd:ee:01".parse::<MacAddress>().is_err());
        assert!("aab:bb:cc:dd:ee:0".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_from_slice_requires_six_bytes() {
        assert!(MacAddress::from_slice(&[1, 2, 3, 4, 5]).is_none());
        assert_eq!(
            MacAddress::from_slice(&[1, 2, 3, 4, 5, 6]),
            Some(MacAddress::new([1, 2, 3, 4, 5, 6]))
        );
    }

    #[test]
    fn test_ipv4_multicast_group() {
        let mac: MacAddress = "01:00:5e:00:00:fb".parse().unwrap();
        assert_eq!(mac.ipv4_multicast_group(), Some(Ipv4Addr::new(224, 0, 0, 251)));

        let mac: MacAddress = "01:00:5e:7f:01:02".parse().unwrap();
        assert_eq!(mac.ipv4_multicast_group(), None);

        let mac: MacAddress = "01:00:5e:0f:01:02".parse().unwrap();
        assert_eq!(mac.ipv4_multicast_group(), Some(Ipv4Addr::new(224, 15, 1, 2)));

        assert_eq!(MacAddress::BROADCAST.ipv4_multicast_group(), None);
        assert_eq!("33:33:00:00:00:01".parse::<MacAddress>().unwrap().ipv4_multicast_group(), None);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = MacAddress::new([0, 0, 0, 0, 0, 1]);
        let b = MacAddress::new([0, 0, 0, 0, 1, 0]);
        assert!(a < b);
        assert!(b < MacAddress::BROADCAST);
    }

    #[test]
    fn test_broadcast_is_multicast() {
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress::ZERO.is_zero());
    }
}
