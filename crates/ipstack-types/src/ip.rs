//! IP network types.
//!
//! A network here is an address plus a prefix length. The address is stored
//! as given, not masked: an interface address such as `10.0.0.1/24` keeps its
//! host bits, while a route destination reported by the kernel is already the
//! network address. Use [`Ipv4Network::network`] / [`Ipv6Network::network`]
//! when the masked form is needed.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

impl IpFamily {
    pub const fn max_prefix_len(self) -> u8 {
        match self {
            IpFamily::Ipv4 => 32,
            IpFamily::Ipv6 => 128,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::Ipv4,
            IpAddr::V6(_) => IpFamily::Ipv6,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::Ipv4 => f.write_str("ipv4"),
            IpFamily::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// An IPv4 address with prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Network {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Network {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > 32 {
            return Err(ParseError::InvalidPrefixLength { len: prefix_len, max: 32 });
        }
        Ok(Ipv4Network { addr, prefix_len })
    }

    /// A /32 for `addr`.
    pub const fn host(addr: Ipv4Addr) -> Self {
        Ipv4Network { addr, prefix_len: 32 }
    }

    pub const fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(prefix_mask_u32(self.prefix_len))
    }

    /// Same prefix with the host bits cleared.
    pub fn network(&self) -> Self {
        Ipv4Network {
            addr: Ipv4Addr::from(u32::from(self.addr) & prefix_mask_u32(self.prefix_len)),
            prefix_len: self.prefix_len,
        }
    }

    /// Directed broadcast address: `addr | !mask`.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !prefix_mask_u32(self.prefix_len))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = prefix_mask_u32(self.prefix_len);
        u32::from(self.addr) & mask == u32::from(ip) & mask
    }

    /// 169.254.0.0/16 is never routed.
    pub fn is_link_local(&self) -> bool {
        self.addr.is_link_local()
    }

    pub fn is_routable(&self) -> bool {
        !self.is_link_local()
    }
}

fn prefix_mask_u32(len: u8) -> u32 {
    if len == 0 { 0 } else { u32::MAX << (32 - u32::from(len.min(32))) }
}

fn prefix_mask_u128(len: u8) -> u128 {
    if len == 0 { 0 } else { u128::MAX << (128 - u32::from(len.min(128))) }
}

impl fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for Ipv4Network {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = split_prefix(s)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| ParseError::InvalidNetwork(s.to_string()))?;
        Ipv4Network::new(addr, len)
    }
}

impl TryFrom<String> for Ipv4Network {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Network> for String {
    fn from(n: Ipv4Network) -> String {
        n.to_string()
    }
}

/// An IPv6 address with prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv6Network {
    addr: Ipv6Addr,
    prefix_len: u8,
}

impl Ipv6Network {
    pub fn new(addr: Ipv6Addr, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > 128 {
            return Err(ParseError::InvalidPrefixLength { len: prefix_len, max: 128 });
        }
        Ok(Ipv6Network { addr, prefix_len })
    }

    /// A /128 for `addr`.
    pub const fn host(addr: Ipv6Addr) -> Self {
        Ipv6Network { addr, prefix_len: 128 }
    }

    pub const fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn network(&self) -> Self {
        Ipv6Network {
            addr: Ipv6Addr::from(u128::from(self.addr) & prefix_mask_u128(self.prefix_len)),
            prefix_len: self.prefix_len,
        }
    }

    pub fn contains(&self, ip: Ipv6Addr) -> bool {
        let mask = prefix_mask_u128(self.prefix_len);
        u128::from(self.addr) & mask == u128::from(ip) & mask
    }

    /// fe80::/10
    pub fn is_link_local(&self) -> bool {
        is_ipv6_link_local(&self.addr)
    }

    /// ff00::/8
    pub fn is_multicast(&self) -> bool {
        self.addr.is_multicast()
    }

    pub fn is_routable(&self) -> bool {
        !self.is_link_local()
    }
}

/// fe80::/10
fn is_ipv6_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

impl fmt::Display for Ipv6Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for Ipv6Network {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = split_prefix(s)?;
        let addr: Ipv6Addr = addr.parse().map_err(|_| ParseError::InvalidNetwork(s.to_string()))?;
        Ipv6Network::new(addr, len)
    }
}

impl TryFrom<String> for Ipv6Network {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv6Network> for String {
    fn from(n: Ipv6Network) -> String {
        n.to_string()
    }
}

fn split_prefix(s: &str) -> Result<(&str, u8), ParseError> {
    let (addr, len) = s
        .rsplit_once('/')
        .ok_or_else(|| ParseError::InvalidNetwork(s.to_string()))?;
    let len = len.parse().map_err(|_| ParseError::InvalidNetwork(s.to_string()))?;
    Ok((addr, len))
}

/// Either family of network. IPv4 networks order before IPv6 ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpNetwork {
    V4(Ipv4Network),
    V6(Ipv6Network),
}

impl IpNetwork {
    /// Builds a network from an address of either family.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        match addr {
            IpAddr::V4(a) => Ipv4Network::new(a, prefix_len).map(IpNetwork::V4),
            IpAddr::V6(a) => Ipv6Network::new(a, prefix_len).map(IpNetwork::V6),
        }
    }

    /// Full-width host prefix for `addr`.
    pub fn host(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => IpNetwork::V4(Ipv4Network::host(a)),
            IpAddr::V6(a) => IpNetwork::V6(Ipv6Network::host(a)),
        }
    }

    pub fn family(&self) -> IpFamily {
        match self {
            IpNetwork::V4(_) => IpFamily::Ipv4,
            IpNetwork::V6(_) => IpFamily::Ipv6,
        }
    }

    pub fn addr(&self) -> IpAddr {
        match self {
            IpNetwork::V4(n) => IpAddr::V4(n.addr()),
            IpNetwork::V6(n) => IpAddr::V6(n.addr()),
        }
    }

    pub fn prefix_len(&self) -> u8 {
        match self {
            IpNetwork::V4(n) => n.prefix_len(),
            IpNetwork::V6(n) => n.prefix_len(),
        }
    }

    pub fn is_routable(&self) -> bool {
        match self {
            IpNetwork::V4(n) => n.is_routable(),
            IpNetwork::V6(n) => n.is_routable(),
        }
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpNetwork::V4(n) => n.fmt(f),
            IpNetwork::V6(n) => n.fmt(f),
        }
    }
}

impl FromStr for IpNetwork {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            s.parse().map(IpNetwork::V6)
        } else {
            s.parse().map(IpNetwork::V4)
        }
    }
}

impl From<Ipv4Network> for IpNetwork {
    fn from(n: Ipv4Network) -> Self {
        IpNetwork::V4(n)
    }
}

impl From<Ipv6Network> for IpNetwork {
    fn from(n: Ipv6Network) -> Self {
        IpNetwork::V6(n)
    }
}
