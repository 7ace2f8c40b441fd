//! Hardware call ordering against a strict mock switch.

mod common;

use common::*;
use ipstack_hw::{
    AceId, AclApi, BulkError, HwError, HwNeighbor, HwResult, HwRoute, IpTrapRule, MacTableApi,
    NeighborApi, RouteApi, RouterLegApi,
};
use ipstack_types::{IpFamily, MacAddress, VlanId};
use ipsyncd::netlink::consts::*;
use ipsyncd::{IpsyncConfig, SyncEngine};
use mockall::predicate::eq;
use mockall::{Sequence, mock};
use std::net::Ipv4Addr;
use std::sync::Arc;

mock! {
    pub Switch {}

    impl RouterLegApi for Switch {
        fn rleg_add(&self, vlan: VlanId) -> HwResult<()>;
        fn rleg_del(&self, vlan: VlanId) -> HwResult<()>;
        fn rleg_ipv4_unicast_set(&self, vlan: VlanId, enable: bool) -> HwResult<()>;
        fn routing_enable(&self, enable: bool) -> HwResult<()>;
    }

    impl MacTableApi for Switch {
        fn mac_subscribe(&self, vlan: VlanId, mac: MacAddress) -> HwResult<()>;
        fn mac_unsubscribe(&self, vlan: VlanId, mac: MacAddress) -> HwResult<()>;
    }

    impl AclApi for Switch {
        fn ip_trap_add(&self, vlan: VlanId, dip: Ipv4Addr) -> HwResult<AceId>;
        fn ip_trap_list(&self) -> HwResult<Vec<IpTrapRule>>;
        fn ip_trap_del(&self, id: AceId) -> HwResult<()>;
    }

    impl RouteApi for Switch {
        fn route_add(&self, route: &HwRoute) -> HwResult<()>;
        fn route_del(&self, route: &HwRoute) -> HwResult<()>;
        fn route_bulk_add(&self, routes: &[HwRoute]) -> Result<usize, BulkError>;
        fn route_bulk_del(&self, routes: &[HwRoute]) -> Result<usize, BulkError>;
    }

    impl NeighborApi for Switch {
        fn neighbor_add(&self, neighbor: &HwNeighbor) -> HwResult<()>;
        fn neighbor_del(&self, neighbor: &HwNeighbor) -> HwResult<()>;
    }
}

fn engine(kernel: Arc<FakeKernel>, switch: MockSwitch) -> SyncEngine {
    SyncEngine::new(kernel, Arc::new(switch), &IpsyncConfig::default())
}

#[test]
fn test_link_lifecycle_call_order() {
    let mut switch = MockSwitch::new();
    let mut seq = Sequence::new();
    let v10 = vid(10);

    switch
        .expect_rleg_add()
        .with(eq(v10))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    switch
        .expect_mac_subscribe()
        .with(eq(v10), eq(MacAddress::BROADCAST))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    switch
        .expect_mac_subscribe()
        .with(eq(v10), eq(MAC))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    switch
        .expect_mac_unsubscribe()
        .with(eq(v10), eq(MAC))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    switch
        .expect_mac_unsubscribe()
        .with(eq(v10), eq(MacAddress::BROADCAST))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    switch
        .expect_rleg_del()
        .with(eq(v10))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));

    let kernel = FakeKernel::new();
    let engine = engine(kernel.clone(), switch);

    kernel.set_links(vec![link(7, "vtss.vlan.10", Some(MAC), LINK_UP)]);
    engine.poll_links().unwrap();
    kernel.set_links(Vec::new());
    engine.poll_links().unwrap();
}

#[test]
fn test_broadcast_subscribe_failure_rolls_back_rleg() {
    let mut switch = MockSwitch::new();
    let mut seq = Sequence::new();

    switch
        .expect_rleg_add()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    switch
        .expect_mac_subscribe()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(HwError::internal("mac table")));
    switch
        .expect_rleg_del()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));

    let kernel = FakeKernel::new();
    let engine = engine(kernel.clone(), switch);
    kernel.set_links(vec![link(7, "vtss.vlan.10", Some(MAC), LINK_UP)]);

    engine.poll_links().unwrap();

    assert!(engine.link_status(vlan(10)).is_some());
}

#[test]
fn test_bulk_call_consuming_nothing_latches() {
    let mut switch = MockSwitch::new();
    switch.expect_rleg_add().returning(|_| Ok(()));
    switch.expect_mac_subscribe().returning(|_, _| Ok(()));
    switch.expect_route_bulk_add().times(1).returning(|_| Ok(0));

    let kernel = FakeKernel::new();
    let engine = engine(kernel.clone(), switch);
    kernel.set_links(vec![link(7, "vtss.vlan.10", Some(MAC), LINK_UP)]);
    kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(3, 7));

    engine.poll_links().unwrap();
    engine.poll_routes(IpFamily::Ipv4).unwrap();

    assert!(engine.global_notification().hw_routing_table_depleted);
}

#[test]
fn test_host_route_table_full_latches() {
    let mut switch = MockSwitch::new();
    switch.expect_rleg_add().returning(|_| Ok(()));
    switch.expect_mac_subscribe().returning(|_, _| Ok(()));
    switch
        .expect_route_add()
        .times(1)
        .returning(|_| Err(HwError::table_full("route")));
    switch.expect_neighbor_add().never();

    let kernel = FakeKernel::new();
    let engine = engine(kernel.clone(), switch);
    kernel.set_links(vec![link(7, "vtss.vlan.10", Some(MAC), LINK_UP)]);
    kernel.set_dump(
        RTM_GETNEIGH,
        AF_INET,
        vec![neigh(AF_INET, 7, "192.0.2.5".parse().unwrap(), MAC, NUD_REACHABLE)],
    );

    engine.poll_links().unwrap();
    engine.poll_neighbors(IpFamily::Ipv4).unwrap();

    assert!(engine.global_notification().hw_routing_table_depleted);
    assert_eq!(engine.ipv4_neighbors().len(), 1);
}
