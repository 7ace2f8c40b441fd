//! Read-only status surface.
//!
//! Everything here reads committed snapshots; nothing blocks a poll pass
//! for longer than one table copy.

use crate::decode::{DecodeStats, Domain};
use crate::engine::SyncEngine;
use crate::types::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Global notification state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalNotification {
    /// Set once the hardware route table has overflowed. Stays set until
    /// restart.
    pub hw_routing_table_depleted: bool,
}

/// Receives link events that other subsystems (for instance a DHCPv6
/// client) react to.
pub trait LinkObserver: Send + Sync {
    /// The IPv6 router advertisement bits of `ifindex` changed; `flags`
    /// holds only the new RA bits.
    fn ra_flags_changed(&self, ifindex: IfIndex, flags: LinkFlags);
}

/// Engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Cumulative decode counts per domain.
    pub decode: BTreeMap<Domain, DecodeStats>,
    pub resyncs: u64,
    pub socket_resets: u64,
    pub poll_errors: u64,
}

/// One table row in serialized form. Keys are structured, so tables are
/// emitted as row lists rather than JSON objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

fn rows<K: Clone, V: Clone>(map: BTreeMap<K, V>) -> Vec<Entry<K, V>> {
    map.into_iter().map(|(key, value)| Entry { key, value }).collect()
}

/// Point-in-time copy of every table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub global: GlobalNotification,
    pub links: Vec<Entry<IfIndex, LinkStatus>>,
    pub ipv4_addresses: Vec<Entry<Ipv4AddrKey, Ipv4AddrInfo>>,
    pub ipv6_addresses: Vec<Entry<Ipv6AddrKey, Ipv6AddrInfo>>,
    pub ipv4_routes: Vec<Entry<RouteKey, RouteInfo>>,
    pub ipv6_routes: Vec<Entry<RouteKey, RouteInfo>>,
    pub ipv4_neighbors: Vec<Entry<NeighborKey, NeighborStatus>>,
    pub ipv6_neighbors: Vec<Entry<NeighborKey, NeighborStatus>>,
    pub mac_subscriptions: Vec<VidMac>,
    pub diagnostics: Diagnostics,
}

impl SyncEngine {
    pub fn global_notification(&self) -> GlobalNotification {
        GlobalNotification {
            hw_routing_table_depleted: self.chip.is_depleted(),
        }
    }

    pub fn add_link_observer(&self, observer: Arc<dyn LinkObserver>) {
        self.observers.write().push(observer);
    }

    pub fn link_status(&self, ifindex: IfIndex) -> Option<LinkStatus> {
        self.links.get(&ifindex)
    }

    pub fn links(&self) -> BTreeMap<IfIndex, LinkStatus> {
        self.links.snapshot()
    }

    pub fn ipv4_addresses(&self) -> BTreeMap<Ipv4AddrKey, Ipv4AddrInfo> {
        self.ipv4_addrs.snapshot()
    }

    pub fn ipv6_addresses(&self) -> BTreeMap<Ipv6AddrKey, Ipv6AddrInfo> {
        self.ipv6_addrs.snapshot()
    }

    pub fn ipv4_routes(&self) -> BTreeMap<RouteKey, RouteInfo> {
        self.ipv4_routes.snapshot()
    }

    pub fn ipv6_routes(&self) -> BTreeMap<RouteKey, RouteInfo> {
        self.ipv6_routes.snapshot()
    }

    pub fn ipv4_neighbors(&self) -> BTreeMap<NeighborKey, NeighborStatus> {
        self.ipv4_neighbors.snapshot()
    }

    pub fn ipv6_neighbors(&self) -> BTreeMap<NeighborKey, NeighborStatus> {
        self.ipv6_neighbors.snapshot()
    }

    pub fn mac_subscriptions(&self) -> BTreeSet<VidMac> {
        self.chip.mac_subscriptions()
    }

    /// Resolves a kernel interface index the way the decoders do: a VLAN
    /// interface whose router leg could not be created is not resolvable.
    pub fn os_ifindex_to_ifindex(&self, os_ifindex: u32) -> Option<IfIndex> {
        self.index.lock().interfaces.get(&os_ifindex).copied()
    }

    pub fn os_ifindex_from_ifindex(&self, ifindex: IfIndex) -> Option<u32> {
        self.links.get(&ifindex).map(|status| status.os_ifindex)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.lock().clone()
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            global: self.global_notification(),
            links: rows(self.links()),
            ipv4_addresses: rows(self.ipv4_addresses()),
            ipv6_addresses: rows(self.ipv6_addresses()),
            ipv4_routes: rows(self.ipv4_routes()),
            ipv6_routes: rows(self.ipv6_routes()),
            ipv4_neighbors: rows(self.ipv4_neighbors()),
            ipv6_neighbors: rows(self.ipv6_neighbors()),
            mac_subscriptions: self.mac_subscriptions().into_iter().collect(),
            diagnostics: self.diagnostics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_diagnostics_serialize_domain_keys() {
        let mut diag = Diagnostics::default();
        diag.decode.insert(
            Domain::Ipv4Route,
            DecodeStats {
                accepted: 3,
                filtered: 1,
                malformed: 0,
            },
        );
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["decode"]["ipv4_route"]["accepted"], 3);
        assert_eq!(json["resyncs"], 0);
    }

    #[test]
    fn test_global_notification_json() {
        let json = serde_json::to_string(&GlobalNotification {
            hw_routing_table_depleted: true,
        })
        .unwrap();
        assert_eq!(json, r#"{"hw_routing_table_depleted":true}"#);
    }
}
