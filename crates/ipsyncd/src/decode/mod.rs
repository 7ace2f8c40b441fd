//! Attribute decoders.
//!
//! Each decoder turns the reply to one kernel dump into the canonical
//! records of one domain. Decoding is pure: the only inputs are the
//! messages, the interface naming rules and the index maps in a
//! [`DecodeContext`].
//!
//! A record is either accepted, filtered (a policy decision such as an
//! interface we do not own or a non-main routing table) or malformed. Only
//! the malformed record is dropped; decoding always continues with the next
//! message.

pub mod addr;
pub mod link;
pub mod mac_list;
pub mod neighbor;
pub mod route;

use crate::netlink::DecodeError;
use crate::types::IfIndex;
use ipstack_types::Ipv6Network;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use tracing::debug;

/// Snapshot domains, in the order a full resync polls them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Link,
    MacList,
    Ipv4Addr,
    Ipv6Addr,
    Ipv4Route,
    Ipv6Route,
    Ipv4Neighbor,
    Ipv6Neighbor,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Domain::Link => "link",
            Domain::MacList => "mac-list",
            Domain::Ipv4Addr => "ipv4-addr",
            Domain::Ipv6Addr => "ipv6-addr",
            Domain::Ipv4Route => "ipv4-route",
            Domain::Ipv6Route => "ipv6-route",
            Domain::Ipv4Neighbor => "ipv4-neighbor",
            Domain::Ipv6Neighbor => "ipv6-neighbor",
        };
        f.write_str(name)
    }
}

/// Per-domain record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub accepted: u64,
    pub filtered: u64,
    pub malformed: u64,
}

impl AddAssign for DecodeStats {
    fn add_assign(&mut self, other: Self) {
        self.accepted += other.accepted;
        self.filtered += other.filtered;
        self.malformed += other.malformed;
    }
}

/// Output of one decoder run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<K, V> {
    pub entries: BTreeMap<K, V>,
    pub stats: DecodeStats,
}

impl<K, V> Default for Decoded<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            stats: DecodeStats::default(),
        }
    }
}

impl<K: Ord, V> Decoded<K, V> {
    pub(crate) fn accept(&mut self, key: K, value: V) {
        self.stats.accepted += 1;
        self.entries.insert(key, value);
    }

    pub(crate) fn filter(&mut self) {
        self.stats.filtered += 1;
    }

    pub(crate) fn malformed(&mut self, domain: Domain, err: &DecodeError) {
        debug!(%domain, error = %err, "Dropping malformed record");
        self.stats.malformed += 1;
    }
}

/// Index state the decoders resolve against.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    /// Kernel interface index to interface handle.
    pub interfaces: &'a BTreeMap<u32, IfIndex>,
    /// On-link IPv6 network per interface.
    pub ipv6_networks: &'a BTreeMap<IfIndex, Ipv6Network>,
}

impl DecodeContext<'_> {
    pub fn ifindex(&self, os_ifindex: u32) -> Option<IfIndex> {
        self.interfaces.get(&os_ifindex).copied()
    }

    pub(crate) fn ifindex_i32(&self, os_ifindex: i32) -> Option<IfIndex> {
        u32::try_from(os_ifindex).ok().and_then(|i| self.ifindex(i))
    }
}
