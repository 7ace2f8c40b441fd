//! The reconciler.
//!
//! [`SyncEngine`] owns every snapshot table together with the index state
//! the decoders need. A poll pass dumps one domain from the kernel, decodes
//! it, swaps it into its table and then, with the table lock released,
//! dispatches the resulting changes to the [`ChipProgrammer`].
//!
//! Passes of the same domain are serialized by a per-domain pass lock, so
//! the monitor loop and request callers can both trigger resyncs. Lock
//! order is always pass lock, then table lock (held only for the swap),
//! then index or chip state.

use crate::chip::{ChipProgrammer, MacListOutcome};
use crate::config::{InterfacesConfig, IpsyncConfig, RoutingConfig};
use crate::decode::addr::{decode_ipv4_addrs, decode_ipv6_addrs};
use crate::decode::link::decode_links;
use crate::decode::mac_list::decode_mac_list;
use crate::decode::neighbor::decode_neighbors;
use crate::decode::route::{decode_routes, to_hw};
use crate::decode::{DecodeContext, DecodeStats, Domain};
use crate::error::Result;
use crate::netlink::consts::*;
use crate::netlink::message::{IfAddrMsg, IfInfoMsg, NdMsg, RtMsg};
use crate::netlink::{MessageBuilder, NetlinkMessage, NetlinkTransport};
use crate::status::{Diagnostics, LinkObserver};
use crate::table::{Change, SnapshotTable};
use crate::types::*;
use ipstack_hw::{HwRoute, SwitchApi};
use ipstack_types::{IpFamily, Ipv6Network};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Kernel index state shared by the decoders.
#[derive(Debug, Clone, Default)]
pub(crate) struct IndexState {
    /// Kernel interface index to handle, for interfaces present in hardware
    /// (or CPU interfaces).
    pub(crate) interfaces: BTreeMap<u32, IfIndex>,
    pub(crate) ipv6_networks: BTreeMap<IfIndex, Ipv6Network>,
}

/// Hardware route reference counts of one family.
///
/// Several kernel routes can map onto one hardware entry (they differ only
/// in protocol or egress on IPv4); the entry is added on the first
/// reference and deleted with the last.
type RouteRefs = BTreeMap<HwRoute, u32>;

/// Builds a dump request for one message type and family.
pub(crate) fn dump_request(msg_type: u16, family: u8) -> MessageBuilder {
    let req = MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP);
    match msg_type {
        RTM_GETLINK => req.ifinfo(IfInfoMsg {
            family,
            ..Default::default()
        }),
        RTM_GETADDR => req.ifaddr(IfAddrMsg {
            family,
            ..Default::default()
        }),
        RTM_GETROUTE => req.rtmsg(RtMsg {
            family,
            ..Default::default()
        }),
        _ => req.ndmsg(NdMsg {
            family,
            ..Default::default()
        }),
    }
}

/// Links first: every other domain resolves interfaces through the index
/// map the link pass maintains.
const POLL_ORDER: [(PollFlags, Domain); 8] = [
    (PollFlags::LINK, Domain::Link),
    (PollFlags::MAC_LIST, Domain::MacList),
    (PollFlags::IPV4_ADDR, Domain::Ipv4Addr),
    (PollFlags::IPV6_ADDR, Domain::Ipv6Addr),
    (PollFlags::IPV4_ROUTE, Domain::Ipv4Route),
    (PollFlags::IPV6_ROUTE, Domain::Ipv6Route),
    (PollFlags::IPV4_NEIGHBOR, Domain::Ipv4Neighbor),
    (PollFlags::IPV6_NEIGHBOR, Domain::Ipv6Neighbor),
];

fn af(family: IpFamily) -> u8 {
    match family {
        IpFamily::Ipv4 => AF_INET,
        IpFamily::Ipv6 => AF_INET6,
    }
}

/// Synchronization engine context.
pub struct SyncEngine {
    pub(crate) transport: Arc<dyn NetlinkTransport>,
    pub(crate) chip: ChipProgrammer,
    pub(crate) names: InterfacesConfig,
    pub(crate) routing: RoutingConfig,

    pub(crate) links: SnapshotTable<IfIndex, LinkStatus>,
    pub(crate) ipv4_addrs: SnapshotTable<Ipv4AddrKey, Ipv4AddrInfo>,
    pub(crate) ipv6_addrs: SnapshotTable<Ipv6AddrKey, Ipv6AddrInfo>,
    pub(crate) ipv4_routes: SnapshotTable<RouteKey, RouteInfo>,
    pub(crate) ipv6_routes: SnapshotTable<RouteKey, RouteInfo>,
    pub(crate) ipv4_neighbors: SnapshotTable<NeighborKey, NeighborStatus>,
    pub(crate) ipv6_neighbors: SnapshotTable<NeighborKey, NeighborStatus>,

    pub(crate) index: Mutex<IndexState>,

    link_pass: Mutex<()>,
    mac_list_pass: Mutex<()>,
    ipv4_addr_pass: Mutex<()>,
    ipv6_addr_pass: Mutex<()>,
    ipv4_route_pass: Mutex<RouteRefs>,
    ipv6_route_pass: Mutex<RouteRefs>,
    ipv4_neighbor_pass: Mutex<()>,
    ipv6_neighbor_pass: Mutex<()>,

    pub(crate) observers: RwLock<Vec<Arc<dyn LinkObserver>>>,
    pub(crate) diagnostics: Mutex<Diagnostics>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("chip", &self.chip)
            .field("links", &self.links.len())
            .field("ipv4_routes", &self.ipv4_routes.len())
            .field("ipv6_routes", &self.ipv6_routes.len())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        transport: Arc<dyn NetlinkTransport>,
        hw: Arc<dyn SwitchApi>,
        config: &IpsyncConfig,
    ) -> Self {
        Self {
            transport,
            chip: ChipProgrammer::new(hw),
            names: config.interfaces.clone(),
            routing: config.routing.clone(),
            links: SnapshotTable::new(),
            ipv4_addrs: SnapshotTable::new(),
            ipv6_addrs: SnapshotTable::new(),
            ipv4_routes: SnapshotTable::new(),
            ipv6_routes: SnapshotTable::new(),
            ipv4_neighbors: SnapshotTable::new(),
            ipv6_neighbors: SnapshotTable::new(),
            index: Mutex::new(IndexState::default()),
            link_pass: Mutex::new(()),
            mac_list_pass: Mutex::new(()),
            ipv4_addr_pass: Mutex::new(()),
            ipv6_addr_pass: Mutex::new(()),
            ipv4_route_pass: Mutex::new(RouteRefs::new()),
            ipv6_route_pass: Mutex::new(RouteRefs::new()),
            ipv4_neighbor_pass: Mutex::new(()),
            ipv6_neighbor_pass: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            diagnostics: Mutex::new(Diagnostics::default()),
        }
    }

    pub fn chip(&self) -> &ChipProgrammer {
        &self.chip
    }

    fn dump(&self, msg_type: u16, family: u8) -> Result<Vec<NetlinkMessage>> {
        self.transport.request(&dump_request(msg_type, family))
    }

    fn index_snapshot(&self) -> IndexState {
        self.index.lock().clone()
    }

    fn record(&self, domain: Domain, stats: DecodeStats) {
        *self.diagnostics.lock().decode.entry(domain).or_default() += stats;
    }

    /// Re-polls every domain in `flags`, in dependency order.
    ///
    /// A failing domain does not stop the others; the first error is
    /// returned once all have run.
    pub fn poll(&self, flags: PollFlags) -> Result<()> {
        let mut first = None;
        for (flag, domain) in POLL_ORDER {
            if !flags.contains(flag) {
                continue;
            }
            if let Err(e) = self.poll_domain(domain) {
                warn!(%domain, error = %e, "Poll failed");
                self.diagnostics.lock().poll_errors += 1;
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn poll_domain(&self, domain: Domain) -> Result<()> {
        match domain {
            Domain::Link => self.poll_links(),
            Domain::MacList => self.poll_mac_list(),
            Domain::Ipv4Addr => self.poll_ipv4_addrs(),
            Domain::Ipv6Addr => self.poll_ipv6_addrs(),
            Domain::Ipv4Route => self.poll_routes(IpFamily::Ipv4),
            Domain::Ipv6Route => self.poll_routes(IpFamily::Ipv6),
            Domain::Ipv4Neighbor => self.poll_neighbors(IpFamily::Ipv4),
            Domain::Ipv6Neighbor => self.poll_neighbors(IpFamily::Ipv6),
        }
    }

    /// Polls every domain.
    pub fn full_resync(&self) -> Result<()> {
        self.diagnostics.lock().resyncs += 1;
        self.poll(PollFlags::all())
    }

    #[instrument(skip(self))]
    pub fn poll_links(&self) -> Result<()> {
        let pass = self.link_pass.lock();
        let unspec = self.dump(RTM_GETLINK, AF_UNSPEC)?;
        let inet6 = self.dump(RTM_GETLINK, AF_INET6)?;
        let decoded = decode_links(&unspec, &inet6, &self.names);
        self.record(Domain::Link, decoded.stats);

        let mut ra_changes = Vec::new();
        for change in self.links.replace(decoded.entries) {
            match change {
                Change::Added(ifindex, status) => self.link_added(ifindex, &status),
                Change::Removed(ifindex, status) => self.link_removed(ifindex, &status),
                Change::Modified(ifindex, old, new) => {
                    self.link_modified(ifindex, &old, &new);
                    if (old.flags ^ new.flags).intersects(LinkFlags::RA_MASK) {
                        ra_changes.push((ifindex, new.flags & LinkFlags::RA_MASK));
                    }
                }
            }
        }
        drop(pass);

        if !ra_changes.is_empty() {
            let observers = self.observers.read().clone();
            for (ifindex, flags) in ra_changes {
                debug!(%ifindex, ?flags, "RA flags changed");
                for observer in &observers {
                    observer.ra_flags_changed(ifindex, flags);
                }
            }
        }
        Ok(())
    }

    fn link_added(&self, ifindex: IfIndex, status: &LinkStatus) {
        info!(%ifindex, os_ifindex = status.os_ifindex, mac = %status.mac, "Link added");
        if let IfIndex::Vlan(vlan) = ifindex {
            if self.chip.link_add(vlan, status).is_err() {
                // Without a router leg nothing may reference the interface.
                return;
            }
        }
        self.index.lock().interfaces.insert(status.os_ifindex, ifindex);
    }

    fn link_removed(&self, ifindex: IfIndex, status: &LinkStatus) {
        info!(%ifindex, os_ifindex = status.os_ifindex, "Link removed");
        if let IfIndex::Vlan(vlan) = ifindex {
            self.chip.link_del(vlan, status);
        }
        let mut index = self.index.lock();
        if index.interfaces.get(&status.os_ifindex) == Some(&ifindex) {
            index.interfaces.remove(&status.os_ifindex);
        }
    }

    fn link_modified(&self, ifindex: IfIndex, old: &LinkStatus, new: &LinkStatus) {
        debug!(%ifindex, ?old, ?new, "Link modified");
        if old.os_ifindex != new.os_ifindex {
            let mut index = self.index.lock();
            if index.interfaces.get(&old.os_ifindex) == Some(&ifindex) {
                index.interfaces.remove(&old.os_ifindex);
                index.interfaces.insert(new.os_ifindex, ifindex);
            }
        }
        if let IfIndex::Vlan(vlan) = ifindex {
            // Errors are logged by the chip; the next MAC change retries.
            self.chip.link_mod(vlan, old, new).ok();
        }
    }

    #[instrument(skip(self))]
    pub fn poll_mac_list(&self) -> Result<()> {
        let _pass = self.mac_list_pass.lock();
        let msgs = self.dump(RTM_GETNEIGH, AF_BRIDGE)?;
        let index = self.index_snapshot();
        let ctx = DecodeContext {
            interfaces: &index.interfaces,
            ipv6_networks: &index.ipv6_networks,
        };
        let decoded = decode_mac_list(&msgs, &ctx);
        self.record(Domain::MacList, decoded.stats);

        let next: BTreeSet<VidMac> = decoded.entries.into_keys().collect();
        let outcome = self.chip.sync_mac_list(&next);
        if outcome != MacListOutcome::default() {
            debug!(?outcome, "MAC list synced");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn poll_ipv4_addrs(&self) -> Result<()> {
        let _pass = self.ipv4_addr_pass.lock();
        let msgs = self.dump(RTM_GETADDR, AF_INET)?;
        let index = self.index_snapshot();
        let ctx = DecodeContext {
            interfaces: &index.interfaces,
            ipv6_networks: &index.ipv6_networks,
        };
        let decoded = decode_ipv4_addrs(&msgs, &ctx);
        self.record(Domain::Ipv4Addr, decoded.stats);

        for change in self.ipv4_addrs.replace(decoded.entries) {
            match change {
                Change::Added(key, _) => info!(ifindex = %key.ifindex, address = %key.network, "IPv4 address added"),
                Change::Removed(key, _) => info!(ifindex = %key.ifindex, address = %key.network, "IPv4 address removed"),
                Change::Modified(key, _, new) => {
                    debug!(ifindex = %key.ifindex, address = %key.network, broadcast = ?new.broadcast, "IPv4 address modified")
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn poll_ipv6_addrs(&self) -> Result<()> {
        let _pass = self.ipv6_addr_pass.lock();
        let msgs = self.dump(RTM_GETADDR, AF_INET6)?;
        let index = self.index_snapshot();
        let ctx = DecodeContext {
            interfaces: &index.interfaces,
            ipv6_networks: &index.ipv6_networks,
        };
        let decoded = decode_ipv6_addrs(&msgs, &ctx);
        self.record(Domain::Ipv6Addr, decoded.stats);

        for change in self.ipv6_addrs.replace(decoded.entries) {
            match change {
                Change::Added(key, info) => {
                    info!(ifindex = %key.ifindex, address = %key.network, flags = ?info.flags, "IPv6 address added")
                }
                Change::Removed(key, _) => info!(ifindex = %key.ifindex, address = %key.network, "IPv6 address removed"),
                Change::Modified(key, old, new) => {
                    if new.flags.contains(Ipv6AddrFlags::DUPLICATED)
                        && !old.flags.contains(Ipv6AddrFlags::DUPLICATED)
                    {
                        warn!(ifindex = %key.ifindex, address = %key.network, "Duplicate address detected");
                    } else {
                        debug!(ifindex = %key.ifindex, address = %key.network, flags = ?new.flags, "IPv6 address modified");
                    }
                }
            }
        }
        Ok(())
    }

    fn route_table(&self, family: IpFamily) -> &SnapshotTable<RouteKey, RouteInfo> {
        match family {
            IpFamily::Ipv4 => &self.ipv4_routes,
            IpFamily::Ipv6 => &self.ipv6_routes,
        }
    }

    fn neighbor_table(&self, family: IpFamily) -> &SnapshotTable<NeighborKey, NeighborStatus> {
        match family {
            IpFamily::Ipv4 => &self.ipv4_neighbors,
            IpFamily::Ipv6 => &self.ipv6_neighbors,
        }
    }

    /// Polls one route domain and programs the difference in bulk.
    #[instrument(skip(self))]
    pub fn poll_routes(&self, family: IpFamily) -> Result<()> {
        let (mut refs, domain) = match family {
            IpFamily::Ipv4 => (self.ipv4_route_pass.lock(), Domain::Ipv4Route),
            IpFamily::Ipv6 => (self.ipv6_route_pass.lock(), Domain::Ipv6Route),
        };
        let msgs = self.dump(RTM_GETROUTE, af(family))?;
        let index = self.index_snapshot();
        let ctx = DecodeContext {
            interfaces: &index.interfaces,
            ipv6_networks: &index.ipv6_networks,
        };
        let decoded = decode_routes(&msgs, family, &ctx);
        self.record(domain, decoded.stats);

        let changes = self.route_table(family).replace(decoded.entries);

        // References are taken before any are dropped, so a route whose key
        // changed without changing its hardware form is left alone.
        let mut adds = Vec::new();
        let mut dels = Vec::new();
        for change in &changes {
            if let Change::Added(key, _) = change {
                info!(route = %key, "Route added");
                if let Some(hw) = to_hw(key) {
                    let count = refs.entry(hw).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        adds.push(hw);
                    }
                }
            }
        }
        for change in &changes {
            match change {
                Change::Removed(key, _) => {
                    info!(route = %key, "Route removed");
                    let Some(hw) = to_hw(key) else { continue };
                    if let Some(count) = refs.get_mut(&hw) {
                        *count -= 1;
                        if *count == 0 {
                            refs.remove(&hw);
                            dels.push(hw);
                        }
                    }
                }
                Change::Modified(key, _, new) => {
                    debug!(route = %key, metric = new.metric, "Route modified");
                }
                Change::Added(..) => {}
            }
        }

        self.chip.sync_routes(family, &dels, &adds);
        Ok(())
    }

    /// Polls one neighbor domain and programs the changes one by one.
    #[instrument(skip(self))]
    pub fn poll_neighbors(&self, family: IpFamily) -> Result<()> {
        let (_pass, domain) = match family {
            IpFamily::Ipv4 => (self.ipv4_neighbor_pass.lock(), Domain::Ipv4Neighbor),
            IpFamily::Ipv6 => (self.ipv6_neighbor_pass.lock(), Domain::Ipv6Neighbor),
        };
        let msgs = self.dump(RTM_GETNEIGH, af(family))?;
        let index = self.index_snapshot();
        let ctx = DecodeContext {
            interfaces: &index.interfaces,
            ipv6_networks: &index.ipv6_networks,
        };
        let decoded = decode_neighbors(&msgs, family, &ctx);
        self.record(domain, decoded.stats);

        let table = self.neighbor_table(family);
        let changes = table.replace_with(decoded.entries, |_, old, new| {
            new.flags |= old.flags & NeighborFlags::HARDWARE;
        });

        for change in changes {
            match change {
                Change::Added(key, status) => {
                    info!(neighbor = %key, mac = %status.mac, "Neighbor added");
                    self.program_neighbor(table, &key, &status);
                }
                Change::Removed(key, status) => {
                    info!(neighbor = %key, "Neighbor removed");
                    if status.flags.contains(NeighborFlags::HARDWARE) {
                        self.chip.neighbor_del(&key, &status).ok();
                    }
                }
                Change::Modified(key, old, new) => {
                    if !new.flags.contains(NeighborFlags::HARDWARE) {
                        // Never made it into hardware; any change is a retry.
                        self.program_neighbor(table, &key, &new);
                    } else if old.mac != new.mac {
                        info!(neighbor = %key, old = %old.mac, new = %new.mac, "Neighbor MAC changed");
                        if self.chip.neighbor_update_mac(&key, &new).is_err() {
                            // The switch still holds the old MAC. Withdraw it so
                            // the next change to the entry reprograms it.
                            self.chip.neighbor_del(&key, &old).ok();
                            table.update(&key, |s| s.flags.remove(NeighborFlags::HARDWARE));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn program_neighbor(
        &self,
        table: &SnapshotTable<NeighborKey, NeighborStatus>,
        key: &NeighborKey,
        status: &NeighborStatus,
    ) {
        match self.chip.neighbor_add(key, status) {
            Ok(true) => {
                table.update(key, |s| s.flags |= NeighborFlags::HARDWARE);
            }
            Ok(false) => {}
            Err(e) => error!(neighbor = %key, error = %e, "Neighbor not programmed"),
        }
    }
}
