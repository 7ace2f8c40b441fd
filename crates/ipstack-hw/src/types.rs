//! Entries handed to the hardware.

use ipstack_types::{Ipv4Network, Ipv6Network, MacAddress, VlanId};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// A hardware route.
///
/// IPv6 routes carry the egress VLAN so that link-local next hops, which are
/// only unique per interface, can be resolved by the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HwRoute {
    Ipv4 {
        network: Ipv4Network,
        next_hop: Ipv4Addr,
    },
    Ipv6 {
        network: Ipv6Network,
        next_hop: Ipv6Addr,
        vlan: Option<VlanId>,
    },
}

impl HwRoute {
    /// All-ones next hop: the chip drops matching traffic.
    pub const IPV4_BLACKHOLE: Ipv4Addr = Ipv4Addr::BROADCAST;
    pub const IPV6_BLACKHOLE: Ipv6Addr = Ipv6Addr::new(
        0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff,
    );

    /// Host route pointing at the neighbor itself, installed alongside a
    /// neighbor entry.
    pub fn host(ip: IpAddr, vlan: VlanId) -> Self {
        match ip {
            IpAddr::V4(a) => HwRoute::Ipv4 {
                network: Ipv4Network::host(a),
                next_hop: a,
            },
            IpAddr::V6(a) => HwRoute::Ipv6 {
                network: Ipv6Network::host(a),
                next_hop: a,
                vlan: Some(vlan),
            },
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, HwRoute::Ipv4 { .. })
    }

    pub fn is_blackhole(&self) -> bool {
        match self {
            HwRoute::Ipv4 { next_hop, .. } => *next_hop == Self::IPV4_BLACKHOLE,
            HwRoute::Ipv6 { next_hop, .. } => *next_hop == Self::IPV6_BLACKHOLE,
        }
    }
}

impl fmt::Display for HwRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwRoute::Ipv4 { network, next_hop } => write!(f, "{} via {}", network, next_hop),
            HwRoute::Ipv6 {
                network,
                next_hop,
                vlan: Some(vlan),
            } => write!(f, "{} via {} vlan {}", network, next_hop, vlan),
            HwRoute::Ipv6 {
                network, next_hop, ..
            } => write!(f, "{} via {}", network, next_hop),
        }
    }
}

/// A hardware neighbor (ARP / ND) entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HwNeighbor {
    pub vlan: VlanId,
    pub ip: IpAddr,
    pub mac: MacAddress,
}

impl fmt::Display for HwNeighbor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vlan {} mac {}", self.ip, self.vlan, self.mac)
    }
}

/// Handle of an installed ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AceId(pub u32);

impl fmt::Display for AceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ace-{}", self.0)
    }
}

/// An ACL entry that copies IPv4 traffic to a multicast group on a VLAN to
/// the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IpTrapRule {
    pub id: AceId,
    pub vlan: VlanId,
    pub dip: Ipv4Addr,
}

/// CPU queue receiving frames for a subscribed MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CpuQueue {
    Broadcast,
    Management,
}

impl CpuQueue {
    /// Broadcast frames go to the broadcast queue, everything else to
    /// management.
    pub fn for_mac(mac: &MacAddress) -> Self {
        if mac.as_bytes()[0] == 0xff {
            CpuQueue::Broadcast
        } else {
            CpuQueue::Management
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_host_route() {
        let vlan = VlanId::new(10).unwrap();
        let r = HwRoute::host("192.0.2.5".parse().unwrap(), vlan);
        assert_eq!(r.to_string(), "192.0.2.5/32 via 192.0.2.5");

        let r = HwRoute::host("2001:db8::5".parse().unwrap(), vlan);
        assert_eq!(r.to_string(), "2001:db8::5/128 via 2001:db8::5 vlan 10");
    }

    #[test]
    fn test_blackhole() {
        let r = HwRoute::Ipv4 {
            network: "10.0.0.0/8".parse().unwrap(),
            next_hop: HwRoute::IPV4_BLACKHOLE,
        };
        assert!(r.is_blackhole());
        let r = HwRoute::Ipv6 {
            network: "2001:db8::/32".parse().unwrap(),
            next_hop: "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff".parse().unwrap(),
            vlan: None,
        };
        assert!(r.is_blackhole());
    }

    #[test]
    fn test_cpu_queue() {
        assert_eq!(CpuQueue::for_mac(&MacAddress::BROADCAST), CpuQueue::Broadcast);
        assert_eq!(
            CpuQueue::for_mac(&"00:01:c1:00:00:01".parse().unwrap()),
            CpuQueue::Management
        );
    }
}
