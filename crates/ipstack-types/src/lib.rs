//! Shared value types for the switch IP stack.
//!
//! These are the primitives every layer of the stack agrees on, from the
//! netlink decoders up to the hardware programming API:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses, including the
//!   IPv4-multicast MAC mapping used for CPU trap decisions
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`Ipv4Network`], [`Ipv6Network`], [`IpNetwork`]: address plus prefix
//!   length, with containment and routability checks
//! - [`IpFamily`]: address family discriminant

mod ip;
mod mac;
mod vlan;

pub use ip::{IpFamily, IpNetwork, Ipv4Network, Ipv6Network};
pub use mac::MacAddress;
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP network: {0}")]
    InvalidNetwork(String),

    #[error("invalid prefix length {len} (maximum {max})")]
    InvalidPrefixLength { len: u8, max: u8 },

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),
}
