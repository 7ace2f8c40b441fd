//! Hardware side of the reconciler.
//!
//! [`ChipProgrammer`] turns table changes into switch calls. It owns the two
//! pieces of state that only make sense next to the hardware: the capacity
//! latch and the set of dynamic MAC subscriptions.

use crate::types::{LinkStatus, NeighborKey, NeighborStatus, VidMac};
use ipstack_hw::{BulkError, HwError, HwNeighbor, HwResult, HwRoute, SwitchApi};
use ipstack_types::{IpFamily, Ipv6Network, MacAddress, VlanId};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Message raised once when the route table runs out of room.
pub const TABLE_FULL_MESSAGE: &str =
    "ROUTE-ADD: Hardware FIB has reached its capacity. Packets through some routes will be dropped";

/// Entries consumed by one bulk route sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSyncOutcome {
    pub deleted: usize,
    pub added: usize,
    /// Bulk calls issued, deletes and adds together.
    pub calls: usize,
}

/// Result of one MAC list merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacListOutcome {
    pub subscribed: usize,
    pub unsubscribed: usize,
    pub failed: usize,
}

pub struct ChipProgrammer {
    hw: Arc<dyn SwitchApi>,
    depleted: AtomicBool,
    macs: Mutex<BTreeSet<VidMac>>,
}

impl std::fmt::Debug for ChipProgrammer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChipProgrammer")
            .field("depleted", &self.is_depleted())
            .field("macs", &self.macs.lock().len())
            .finish()
    }
}

/// Companion route of a neighbor entry. IPv6 link-local neighbors have none.
fn host_route(ip: IpAddr, vlan: VlanId) -> Option<HwRoute> {
    match ip {
        IpAddr::V6(v6) if Ipv6Network::host(v6).is_link_local() => None,
        _ => Some(HwRoute::host(ip, vlan)),
    }
}

/// Drives one bulk operation until `routes` is consumed or a call fails.
///
/// A call that succeeds without consuming anything is treated as a failure;
/// retrying it would never terminate.
fn bulk_loop<F>(routes: &[HwRoute], calls: &mut usize, mut op: F) -> (usize, Option<HwError>)
where
    F: FnMut(&[HwRoute]) -> Result<usize, BulkError>,
{
    let mut done = 0;
    while done < routes.len() {
        let rest = &routes[done..];
        *calls += 1;
        match op(rest) {
            Ok(0) => return (done, Some(HwError::internal("bulk call consumed no entries"))),
            Ok(n) => done += n.min(rest.len()),
            Err(e) => {
                done += e.processed.min(rest.len());
                return (done, Some(e.source));
            }
        }
    }
    (done, None)
}

impl ChipProgrammer {
    pub fn new(hw: Arc<dyn SwitchApi>) -> Self {
        Self {
            hw,
            depleted: AtomicBool::new(false),
            macs: Mutex::new(BTreeSet::new()),
        }
    }

    /// Sticky: never cleared for the life of the process.
    pub fn is_depleted(&self) -> bool {
        self.depleted.load(Ordering::Acquire)
    }

    /// Latches capacity exhaustion. Only the first call warns.
    pub fn table_full_report(&self) {
        if !self.depleted.swap(true, Ordering::AcqRel) {
            warn!("Hardware route table depleted");
            error!(target: "syslog", "{}", TABLE_FULL_MESSAGE);
        }
    }

    pub fn routing_enable(&self, enable: bool) -> HwResult<()> {
        self.hw.routing_enable(enable)
    }

    pub fn rleg_ipv4_unicast(&self, vlan: VlanId, enable: bool) -> HwResult<()> {
        self.hw.rleg_ipv4_unicast_set(vlan, enable)
    }

    /// Steers frames for `mac` on `vlan` to the CPU.
    ///
    /// IPv4 multicast MACs become an IP trap rule on the derived group: the
    /// MAC table cannot tell apart the groups that collapse onto one MAC.
    pub fn mac_subscribe(&self, vlan: VlanId, mac: MacAddress) -> HwResult<()> {
        match mac.ipv4_multicast_group() {
            Some(group) => {
                let id = self.hw.ip_trap_add(vlan, group)?;
                debug!(vlan = %vlan, group = %group, ace = %id, "IP trap added");
                Ok(())
            }
            None => self.hw.mac_subscribe(vlan, mac),
        }
    }

    /// Reverses [`mac_subscribe`](Self::mac_subscribe), removing every
    /// matching trap rule.
    pub fn mac_unsubscribe(&self, vlan: VlanId, mac: MacAddress) -> HwResult<()> {
        let Some(group) = mac.ipv4_multicast_group() else {
            return self.hw.mac_unsubscribe(vlan, mac);
        };
        let mut result = Ok(());
        for rule in self.hw.ip_trap_list()? {
            if rule.vlan != vlan || rule.dip != group {
                continue;
            }
            match self.hw.ip_trap_del(rule.id) {
                Ok(()) | Err(HwError::NotFound { .. }) => {
                    debug!(vlan = %vlan, group = %group, ace = %rule.id, "IP trap deleted");
                }
                Err(e) => {
                    error!(vlan = %vlan, group = %group, ace = %rule.id, error = %e, "Failed to delete IP trap");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    /// Programs one pass of route changes: deletes first, then adds.
    ///
    /// A failed delete phase does not stop the add phase. A failed add
    /// latches the capacity flag; the remaining adds are dropped.
    pub fn sync_routes(&self, family: IpFamily, dels: &[HwRoute], adds: &[HwRoute]) -> RouteSyncOutcome {
        let mut outcome = RouteSyncOutcome::default();

        let (deleted, err) = bulk_loop(dels, &mut outcome.calls, |r| self.hw.route_bulk_del(r));
        outcome.deleted = deleted;
        if let Some(e) = err {
            error!(%family, deleted, requested = dels.len(), error = %e, "Bulk route delete failed");
        }

        let (added, err) = bulk_loop(adds, &mut outcome.calls, |r| self.hw.route_bulk_add(r));
        outcome.added = added;
        if let Some(e) = err {
            error!(%family, added, requested = adds.len(), error = %e, "Bulk route add failed");
            self.table_full_report();
        }

        if !dels.is_empty() || !adds.is_empty() {
            debug!(%family, deleted, added, calls = outcome.calls, "Routes synced");
        }
        outcome
    }

    /// Installs a neighbor and its host route. Returns false when the
    /// interface has no hardware presence.
    pub fn neighbor_add(&self, key: &NeighborKey, status: &NeighborStatus) -> HwResult<bool> {
        let Some(vlan) = key.ifindex.vlan() else {
            return Ok(false);
        };
        let entry = HwNeighbor {
            vlan,
            ip: key.ip,
            mac: status.mac,
        };
        let route = host_route(key.ip, vlan);

        if let Some(route) = &route {
            if let Err(e) = self.hw.route_add(route) {
                error!(route = %route, error = %e, "Failed to add host route");
                if e.is_table_full() {
                    self.table_full_report();
                }
                return Err(e);
            }
        }
        if let Err(e) = self.hw.neighbor_add(&entry) {
            error!(neighbor = %entry, error = %e, "Failed to add neighbor");
            if let Some(route) = &route {
                if let Err(e) = self.hw.route_del(route) {
                    error!(route = %route, error = %e, "Failed to roll back host route");
                }
            }
            return Err(e);
        }
        info!(neighbor = %entry, "Neighbor programmed");
        Ok(true)
    }

    /// Removes a neighbor, then its host route. Both steps are attempted.
    pub fn neighbor_del(&self, key: &NeighborKey, status: &NeighborStatus) -> HwResult<()> {
        let Some(vlan) = key.ifindex.vlan() else {
            return Ok(());
        };
        let entry = HwNeighbor {
            vlan,
            ip: key.ip,
            mac: status.mac,
        };
        let mut result = self.hw.neighbor_del(&entry);
        if let Err(e) = &result {
            error!(neighbor = %entry, error = %e, "Failed to delete neighbor");
        }
        if let Some(route) = host_route(key.ip, vlan) {
            if let Err(e) = self.hw.route_del(&route) {
                error!(route = %route, error = %e, "Failed to delete host route");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!(neighbor = %entry, "Neighbor unprogrammed");
        result
    }

    /// Rewrites the MAC of an installed neighbor.
    pub fn neighbor_update_mac(&self, key: &NeighborKey, status: &NeighborStatus) -> HwResult<()> {
        let Some(vlan) = key.ifindex.vlan() else {
            return Ok(());
        };
        let entry = HwNeighbor {
            vlan,
            ip: key.ip,
            mac: status.mac,
        };
        self.hw.neighbor_add(&entry).inspect_err(|e| {
            error!(neighbor = %entry, error = %e, "Failed to update neighbor");
        })
    }

    /// Creates the router leg and subscribes the interface MACs. On failure
    /// everything already done is undone.
    pub fn link_add(&self, vlan: VlanId, status: &LinkStatus) -> HwResult<()> {
        if let Err(e) = self.hw.rleg_add(vlan) {
            error!(vlan = %vlan, error = %e, "Failed to add router leg");
            return Err(e);
        }
        if let Err(e) = self.mac_subscribe(vlan, status.broadcast) {
            error!(vlan = %vlan, mac = %status.broadcast, error = %e, "Failed to subscribe broadcast MAC");
            self.undo_rleg(vlan);
            return Err(e);
        }
        if let Err(e) = self.mac_subscribe(vlan, status.mac) {
            error!(vlan = %vlan, mac = %status.mac, error = %e, "Failed to subscribe MAC");
            if let Err(e) = self.mac_unsubscribe(vlan, status.broadcast) {
                error!(vlan = %vlan, error = %e, "Failed to roll back broadcast MAC");
            }
            self.undo_rleg(vlan);
            return Err(e);
        }
        info!(vlan = %vlan, mac = %status.mac, "Router leg added");
        Ok(())
    }

    fn undo_rleg(&self, vlan: VlanId) {
        if let Err(e) = self.hw.rleg_del(vlan) {
            error!(vlan = %vlan, error = %e, "Failed to roll back router leg");
        }
    }

    /// Moves MAC subscriptions that changed between `old` and `new`.
    pub fn link_mod(&self, vlan: VlanId, old: &LinkStatus, new: &LinkStatus) -> HwResult<()> {
        let mut result = Ok(());
        for (was, now) in [(old.mac, new.mac), (old.broadcast, new.broadcast)] {
            if was == now {
                continue;
            }
            if let Err(e) = self.mac_unsubscribe(vlan, was) {
                error!(vlan = %vlan, mac = %was, error = %e, "Failed to unsubscribe MAC");
            }
            if let Err(e) = self.mac_subscribe(vlan, now) {
                error!(vlan = %vlan, mac = %now, error = %e, "Failed to subscribe MAC");
                if result.is_ok() {
                    result = Err(e);
                }
            } else {
                info!(vlan = %vlan, old = %was, new = %now, "Interface MAC changed");
            }
        }
        result
    }

    /// Tears an interface down: MACs, router leg, then every dynamic MAC
    /// subscription on the VLAN. Returns how many dynamic entries were
    /// purged.
    pub fn link_del(&self, vlan: VlanId, status: &LinkStatus) -> usize {
        for mac in [status.mac, status.broadcast] {
            if let Err(e) = self.mac_unsubscribe(vlan, mac) {
                error!(vlan = %vlan, mac = %mac, error = %e, "Failed to unsubscribe MAC");
            }
        }
        if let Err(e) = self.hw.rleg_del(vlan) {
            error!(vlan = %vlan, error = %e, "Failed to delete router leg");
        }

        let mut macs = self.macs.lock();
        let purge: Vec<VidMac> = macs.iter().filter(|e| e.vlan == vlan).copied().collect();
        for entry in &purge {
            macs.remove(entry);
            if let Err(e) = self.mac_unsubscribe(entry.vlan, entry.mac) {
                error!(entry = %entry, error = %e, "Failed to unsubscribe dynamic MAC");
            }
        }
        info!(vlan = %vlan, purged = purge.len(), "Router leg deleted");
        purge.len()
    }

    /// Merges a fresh bridge MAC list into the subscription set. A failed
    /// subscribe leaves the entry out so the next poll retries it.
    pub fn sync_mac_list(&self, next: &BTreeSet<VidMac>) -> MacListOutcome {
        let mut outcome = MacListOutcome::default();
        let mut macs = self.macs.lock();

        let gone: Vec<VidMac> = macs.difference(next).copied().collect();
        for entry in gone {
            macs.remove(&entry);
            match self.mac_unsubscribe(entry.vlan, entry.mac) {
                Ok(()) => {
                    debug!(entry = %entry, "Dynamic MAC unsubscribed");
                    outcome.unsubscribed += 1;
                }
                Err(e) => {
                    error!(entry = %entry, error = %e, "Failed to unsubscribe dynamic MAC");
                    outcome.failed += 1;
                }
            }
        }

        let new: Vec<VidMac> = next.difference(&macs).copied().collect();
        for entry in new {
            match self.mac_subscribe(entry.vlan, entry.mac) {
                Ok(()) => {
                    debug!(entry = %entry, "Dynamic MAC subscribed");
                    macs.insert(entry);
                    outcome.subscribed += 1;
                }
                Err(e) => {
                    error!(entry = %entry, error = %e, "Failed to subscribe dynamic MAC");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    pub fn mac_subscriptions(&self) -> BTreeSet<VidMac> {
        self.macs.lock().clone()
    }
}
