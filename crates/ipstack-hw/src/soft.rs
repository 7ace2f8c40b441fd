//! In-memory switch model.
//!
//! `SoftSwitch` implements every hardware trait on plain collections. It
//! enforces the same limits a real chip does (router leg and route table
//! capacity, a per-call bulk chunk size, the CPU-subscribable MAC rule) and
//! journals every call so the order of hardware operations can be checked.
//! Faults can be injected per operation kind.

use crate::api::{AclApi, MacTableApi, NeighborApi, RouteApi, RouterLegApi};
use crate::error::{BulkError, HwError, HwResult};
use crate::types::{AceId, CpuQueue, HwNeighbor, HwRoute, IpTrapRule};
use ipstack_types::{MacAddress, VlanId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, trace};

/// Limits of the modeled chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftSwitchConfig {
    pub rleg_capacity: usize,
    pub route_capacity: usize,
    /// Maximum entries consumed by one bulk call.
    pub bulk_chunk: usize,
    /// When set, the only unicast MAC that may be subscribed.
    pub base_mac: Option<MacAddress>,
}

impl Default for SoftSwitchConfig {
    fn default() -> Self {
        Self {
            rleg_capacity: 128,
            route_capacity: 16384,
            bulk_chunk: 4096,
            base_mac: None,
        }
    }
}

/// A journaled hardware call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwOp {
    RlegAdd(VlanId),
    RlegDel(VlanId),
    RlegIpv4Unicast(VlanId, bool),
    RoutingEnable(bool),
    MacSubscribe(VlanId, MacAddress),
    MacUnsubscribe(VlanId, MacAddress),
    IpTrapAdd(VlanId, Ipv4Addr),
    IpTrapDel(AceId),
    RouteAdd(HwRoute),
    RouteDel(HwRoute),
    /// One bulk call: entries offered and entries consumed.
    RouteBulkAdd { offered: usize, processed: usize },
    RouteBulkDel { offered: usize, processed: usize },
    NeighborAdd(HwNeighbor),
    NeighborDel(HwNeighbor),
}

/// Operation kinds that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    RlegAdd,
    RlegDel,
    MacSubscribe,
    MacUnsubscribe,
    IpTrapAdd,
    RouteAdd,
    RouteDel,
    RouteBulkAdd,
    RouteBulkDel,
    NeighborAdd,
    NeighborDel,
}

#[derive(Debug, Default)]
struct SoftState {
    rlegs: BTreeMap<VlanId, bool>,
    routing_enabled: bool,
    macs: BTreeMap<(VlanId, MacAddress), CpuQueue>,
    traps: Vec<IpTrapRule>,
    next_ace: u32,
    routes: BTreeSet<HwRoute>,
    neighbors: BTreeMap<(VlanId, IpAddr), MacAddress>,
    journal: Vec<HwOp>,
    faults: HashSet<Fault>,
}

impl SoftState {
    fn check(&self, fault: Fault) -> HwResult<()> {
        if self.faults.contains(&fault) {
            return Err(HwError::internal(format!("injected fault {:?}", fault)));
        }
        Ok(())
    }
}

/// In-memory switch.
#[derive(Debug, Default)]
pub struct SoftSwitch {
    config: SoftSwitchConfig,
    state: Mutex<SoftState>,
}

impl SoftSwitch {
    pub fn new(config: SoftSwitchConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SoftState::default()),
        }
    }

    pub fn config(&self) -> &SoftSwitchConfig {
        &self.config
    }

    /// Makes every subsequent call of `fault`'s kind fail.
    pub fn fail_on(&self, fault: Fault) {
        self.state.lock().faults.insert(fault);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    pub fn journal(&self) -> Vec<HwOp> {
        self.state.lock().journal.clone()
    }

    /// Returns the journal and starts a new one.
    pub fn take_journal(&self) -> Vec<HwOp> {
        std::mem::take(&mut self.state.lock().journal)
    }

    pub fn rlegs(&self) -> Vec<VlanId> {
        self.state.lock().rlegs.keys().copied().collect()
    }

    pub fn rleg_ipv4_unicast(&self, vlan: VlanId) -> Option<bool> {
        self.state.lock().rlegs.get(&vlan).copied()
    }

    pub fn routing_enabled(&self) -> bool {
        self.state.lock().routing_enabled
    }

    pub fn macs(&self) -> Vec<(VlanId, MacAddress, CpuQueue)> {
        self.state
            .lock()
            .macs
            .iter()
            .map(|(&(vlan, mac), &queue)| (vlan, mac, queue))
            .collect()
    }

    pub fn routes(&self) -> Vec<HwRoute> {
        self.state.lock().routes.iter().copied().collect()
    }

    pub fn route_count(&self) -> usize {
        self.state.lock().routes.len()
    }

    pub fn neighbors(&self) -> Vec<HwNeighbor> {
        self.state
            .lock()
            .neighbors
            .iter()
            .map(|(&(vlan, ip), &mac)| HwNeighbor { vlan, ip, mac })
            .collect()
    }

    fn subscribable(&self, mac: &MacAddress) -> bool {
        match self.config.base_mac {
            Some(base) => *mac == base || mac.is_multicast(),
            None => true,
        }
    }
}

impl RouterLegApi for SoftSwitch {
    fn rleg_add(&self, vlan: VlanId) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::RlegAdd(vlan));
        st.check(Fault::RlegAdd)?;
        if st.rlegs.contains_key(&vlan) {
            return Err(HwError::already_exists(format!("rleg vlan {}", vlan)));
        }
        if st.rlegs.len() >= self.config.rleg_capacity {
            return Err(HwError::table_full("rleg"));
        }
        st.rlegs.insert(vlan, false);
        debug!(vlan = %vlan, "rleg added");
        Ok(())
    }

    fn rleg_del(&self, vlan: VlanId) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::RlegDel(vlan));
        st.check(Fault::RlegDel)?;
        st.rlegs
            .remove(&vlan)
            .map(|_| ())
            .ok_or_else(|| HwError::not_found(format!("rleg vlan {}", vlan)))
    }

    fn rleg_ipv4_unicast_set(&self, vlan: VlanId, enable: bool) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::RlegIpv4Unicast(vlan, enable));
        match st.rlegs.get_mut(&vlan) {
            Some(uc) => {
                *uc = enable;
                Ok(())
            }
            None => Err(HwError::not_found(format!("rleg vlan {}", vlan))),
        }
    }

    fn routing_enable(&self, enable: bool) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::RoutingEnable(enable));
        st.routing_enabled = enable;
        Ok(())
    }
}

impl MacTableApi for SoftSwitch {
    fn mac_subscribe(&self, vlan: VlanId, mac: MacAddress) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::MacSubscribe(vlan, mac));
        st.check(Fault::MacSubscribe)?;
        if !self.subscribable(&mac) {
            return Err(HwError::invalid_parameter(format!(
                "mac {} is neither the base mac nor multicast",
                mac
            )));
        }
        let queue = CpuQueue::for_mac(&mac);
        st.macs.insert((vlan, mac), queue);
        trace!(vlan = %vlan, mac = %mac, ?queue, "mac subscribed");
        Ok(())
    }

    fn mac_unsubscribe(&self, vlan: VlanId, mac: MacAddress) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::MacUnsubscribe(vlan, mac));
        st.check(Fault::MacUnsubscribe)?;
        st.macs
            .remove(&(vlan, mac))
            .map(|_| ())
            .ok_or_else(|| HwError::not_found(format!("mac {} vlan {}", mac, vlan)))
    }
}

impl AclApi for SoftSwitch {
    fn ip_trap_add(&self, vlan: VlanId, dip: Ipv4Addr) -> HwResult<AceId> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::IpTrapAdd(vlan, dip));
        st.check(Fault::IpTrapAdd)?;
        st.next_ace += 1;
        let id = AceId(st.next_ace);
        st.traps.push(IpTrapRule { id, vlan, dip });
        Ok(id)
    }

    fn ip_trap_list(&self) -> HwResult<Vec<IpTrapRule>> {
        Ok(self.state.lock().traps.clone())
    }

    fn ip_trap_del(&self, id: AceId) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::IpTrapDel(id));
        let before = st.traps.len();
        st.traps.retain(|r| r.id != id);
        if st.traps.len() == before {
            return Err(HwError::not_found(id.to_string()));
        }
        Ok(())
    }
}

impl RouteApi for SoftSwitch {
    fn route_add(&self, route: &HwRoute) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::RouteAdd(*route));
        st.check(Fault::RouteAdd)?;
        if st.routes.contains(route) {
            return Err(HwError::already_exists(route.to_string()));
        }
        if st.routes.len() >= self.config.route_capacity {
            return Err(HwError::table_full("route"));
        }
        st.routes.insert(*route);
        Ok(())
    }

    fn route_del(&self, route: &HwRoute) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::RouteDel(*route));
        st.check(Fault::RouteDel)?;
        if !st.routes.remove(route) {
            return Err(HwError::not_found(route.to_string()));
        }
        Ok(())
    }

    fn route_bulk_add(&self, routes: &[HwRoute]) -> Result<usize, BulkError> {
        let mut st = self.state.lock();
        let chunk = &routes[..routes.len().min(self.config.bulk_chunk)];
        if let Err(e) = st.check(Fault::RouteBulkAdd) {
            st.journal.push(HwOp::RouteBulkAdd {
                offered: routes.len(),
                processed: 0,
            });
            return Err(BulkError::new(0, e));
        }

        for (i, route) in chunk.iter().enumerate() {
            if st.routes.contains(route) {
                continue;
            }
            if st.routes.len() >= self.config.route_capacity {
                st.journal.push(HwOp::RouteBulkAdd {
                    offered: routes.len(),
                    processed: i,
                });
                return Err(BulkError::new(i, HwError::table_full("route")));
            }
            st.routes.insert(*route);
        }

        st.journal.push(HwOp::RouteBulkAdd {
            offered: routes.len(),
            processed: chunk.len(),
        });
        Ok(chunk.len())
    }

    fn route_bulk_del(&self, routes: &[HwRoute]) -> Result<usize, BulkError> {
        let mut st = self.state.lock();
        let chunk = &routes[..routes.len().min(self.config.bulk_chunk)];
        if let Err(e) = st.check(Fault::RouteBulkDel) {
            st.journal.push(HwOp::RouteBulkDel {
                offered: routes.len(),
                processed: 0,
            });
            return Err(BulkError::new(0, e));
        }

        for route in chunk {
            st.routes.remove(route);
        }
        st.journal.push(HwOp::RouteBulkDel {
            offered: routes.len(),
            processed: chunk.len(),
        });
        Ok(chunk.len())
    }
}

impl NeighborApi for SoftSwitch {
    fn neighbor_add(&self, neighbor: &HwNeighbor) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::NeighborAdd(*neighbor));
        st.check(Fault::NeighborAdd)?;
        st.neighbors.insert((neighbor.vlan, neighbor.ip), neighbor.mac);
        Ok(())
    }

    fn neighbor_del(&self, neighbor: &HwNeighbor) -> HwResult<()> {
        let mut st = self.state.lock();
        st.journal.push(HwOp::NeighborDel(*neighbor));
        st.check(Fault::NeighborDel)?;
        st.neighbors
            .remove(&(neighbor.vlan, neighbor.ip))
            .map(|_| ())
            .ok_or_else(|| HwError::not_found(neighbor.to_string()))
    }
}
