//! Canonical records held by the snapshot tables.

use bitflags::bitflags;
use ipstack_types::{IpNetwork, Ipv4Network, Ipv6Network, MacAddress, VlanId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Internal interface handle.
///
/// Only interfaces following the switch naming convention get a handle;
/// everything else the kernel reports is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfIndex {
    /// Routed VLAN interface.
    Vlan(VlanId),
    /// CPU/system interface; tracked but never programmed in hardware.
    Cpu(u16),
}

impl IfIndex {
    pub fn vlan(&self) -> Option<VlanId> {
        match self {
            IfIndex::Vlan(vid) => Some(*vid),
            IfIndex::Cpu(_) => None,
        }
    }
}

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IfIndex::Vlan(vid) => write!(f, "vlan {}", vid),
            IfIndex::Cpu(n) => write!(f, "cpu {}", n),
        }
    }
}

bitflags! {
    /// Link flags as reported by the kernel, plus the IPv6 RA bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
    pub struct LinkFlags: u32 {
        const UP = 1 << 0;
        const BROADCAST = 1 << 1;
        const LOOPBACK = 1 << 2;
        const NOARP = 1 << 3;
        const PROMISC = 1 << 4;
        const MULTICAST = 1 << 5;
        const IPV6_RA_MANAGED = 1 << 6;
        const IPV6_RA_OTHER = 1 << 7;
    }
}

impl LinkFlags {
    pub const RA_MASK: LinkFlags = LinkFlags::IPV6_RA_MANAGED.union(LinkFlags::IPV6_RA_OTHER);
}

/// Link table value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub os_ifindex: u32,
    pub mac: MacAddress,
    pub broadcast: MacAddress,
    pub mtu: u32,
    pub flags: LinkFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ipv4AddrKey {
    pub ifindex: IfIndex,
    /// Interface address with its prefix length; host bits kept.
    pub network: Ipv4Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Ipv4AddrInfo {
    pub broadcast: Option<Ipv4Addr>,
}

bitflags! {
    /// IPv6 address state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
    pub struct Ipv6AddrFlags: u32 {
        const TENTATIVE = 1 << 0;
        /// Duplicate address detection failed.
        const DUPLICATED = 1 << 1;
        const DEPRECATED = 1 << 2;
        const NODAD = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ipv6AddrKey {
    pub ifindex: IfIndex,
    pub network: Ipv6Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Ipv6AddrInfo {
    pub os_ifindex: u32,
    pub flags: Ipv6AddrFlags,
}

/// Origin of a route (`rtm_protocol`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteProtocol {
    Kernel,
    Boot,
    Static,
    Dhcp,
    Ospf,
    Rip,
    Other(u8),
}

impl RouteProtocol {
    pub fn from_rtm(protocol: u8) -> Self {
        use crate::netlink::consts::*;
        match protocol {
            RTPROT_KERNEL => RouteProtocol::Kernel,
            RTPROT_BOOT => RouteProtocol::Boot,
            RTPROT_STATIC => RouteProtocol::Static,
            RTPROT_DHCP => RouteProtocol::Dhcp,
            RTPROT_OSPF => RouteProtocol::Ospf,
            RTPROT_RIP => RouteProtocol::Rip,
            other => RouteProtocol::Other(other),
        }
    }

    /// Administrative distance.
    pub fn distance(&self) -> u8 {
        match self {
            RouteProtocol::Kernel => 0,
            RouteProtocol::Boot | RouteProtocol::Static => 1,
            RouteProtocol::Ospf => 110,
            RouteProtocol::Rip => 120,
            RouteProtocol::Dhcp => 254,
            RouteProtocol::Other(_) => 255,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
    pub struct RouteFlags: u32 {
        /// Installed in the kernel FIB.
        const FIB = 1 << 0;
        const ACTIVE = 1 << 1;
        /// No gateway: the destination is on the link.
        const CONNECTED = 1 << 2;
        const BLACKHOLE = 1 << 3;
        const UNREACHABLE = 1 << 4;
        const ONLINK = 1 << 5;
    }
}

/// Route table key.
///
/// `next_hop` is unspecified for connected routes and all-ones for
/// blackholes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteKey {
    pub network: IpNetwork,
    pub protocol: RouteProtocol,
    pub next_hop: IpAddr,
    pub egress: Option<IfIndex>,
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.network, self.next_hop)?;
        if let Some(egress) = self.egress {
            write!(f, " dev {}", egress)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RouteInfo {
    pub distance: u8,
    pub metric: u32,
    pub flags: RouteFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NeighborKey {
    pub ip: IpAddr,
    pub ifindex: IfIndex,
}

impl fmt::Display for NeighborKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.ip, self.ifindex)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
    pub struct NeighborFlags: u32 {
        /// Address and link-layer address both decoded.
        const VALID = 1 << 0;
        const ROUTER = 1 << 1;
        const PERMANENT = 1 << 2;
        /// Programmed in hardware. Never set by the decoder.
        const HARDWARE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NeighborStatus {
    pub mac: MacAddress,
    pub flags: NeighborFlags,
    /// Needed to ask the kernel to delete the entry.
    pub os_ifindex: u32,
}

/// One dynamic MAC subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VidMac {
    pub vlan: VlanId,
    pub mac: MacAddress,
}

impl fmt::Display for VidMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vlan {}", self.mac, self.vlan)
    }
}

bitflags! {
    /// Domains that need re-polling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollFlags: u32 {
        const LINK = 1 << 0;
        const MAC_LIST = 1 << 1;
        const IPV4_ADDR = 1 << 2;
        const IPV6_ADDR = 1 << 3;
        const IPV4_ROUTE = 1 << 4;
        const IPV6_ROUTE = 1 << 5;
        const IPV4_NEIGHBOR = 1 << 6;
        const IPV6_NEIGHBOR = 1 << 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ifindex_order_and_vlan() {
        let v1 = IfIndex::Vlan(VlanId::new(1).unwrap());
        let v2 = IfIndex::Vlan(VlanId::new(2).unwrap());
        assert!(v1 < v2);
        assert!(v2 < IfIndex::Cpu(0));
        assert_eq!(IfIndex::Cpu(1).vlan(), None);
        assert_eq!(v1.to_string(), "vlan 1");
    }

    #[test]
    fn test_route_protocol_distance() {
        assert_eq!(RouteProtocol::from_rtm(2), RouteProtocol::Kernel);
        assert_eq!(RouteProtocol::from_rtm(4).distance(), 1);
        assert_eq!(RouteProtocol::from_rtm(188).distance(), 110);
        assert_eq!(RouteProtocol::from_rtm(42), RouteProtocol::Other(42));
    }

    #[test]
    fn test_ra_mask() {
        let flags = LinkFlags::UP | LinkFlags::IPV6_RA_OTHER;
        assert_eq!(flags & LinkFlags::RA_MASK, LinkFlags::IPV6_RA_OTHER);
    }
}
