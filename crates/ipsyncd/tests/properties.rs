//! Engine-level invariants.

mod common;

use common::*;
use ipstack_hw::{HwNeighbor, HwOp, SoftSwitchConfig};
use ipstack_types::{IpFamily, MacAddress};
use ipsyncd::netlink::consts::*;
use ipsyncd::{IfIndex, IpsyncConfig, LinkFlags, LinkObserver};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::net::IpAddr;
use std::sync::Arc;

fn bulk_adds(journal: &[HwOp]) -> Vec<(usize, usize)> {
    journal
        .iter()
        .filter_map(|op| match op {
            HwOp::RouteBulkAdd { offered, processed } => Some((*offered, *processed)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_repeated_poll_is_idempotent() {
    let h = Harness::new().with_vlan(10, 7);
    let ip: IpAddr = "192.0.2.9".parse().unwrap();
    h.kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(20, 7));
    h.kernel.set_dump(
        RTM_GETNEIGH,
        AF_INET,
        vec![neigh(AF_INET, 7, ip, "00:11:22:33:44:55".parse().unwrap(), NUD_REACHABLE)],
    );

    h.engine.full_resync().unwrap();
    assert!(!h.switch.take_journal().is_empty());

    h.engine.full_resync().unwrap();
    assert!(h.switch.take_journal().is_empty());
}

#[test]
fn test_non_routable_destinations_never_become_routes() {
    let h = Harness::new().with_vlan(10, 7);
    h.kernel.set_dump(
        RTM_GETROUTE,
        AF_INET,
        vec![
            route("169.254.0.0".parse().unwrap(), 16, "1.1.1.1".parse().unwrap(), 7),
            route("169.254.3.0".parse().unwrap(), 24, "1.1.1.1".parse().unwrap(), 7),
            route("10.0.0.0".parse().unwrap(), 8, "1.1.1.1".parse().unwrap(), 7),
        ],
    );
    h.kernel.set_dump(
        RTM_GETROUTE,
        AF_INET6,
        vec![
            route("fe80::".parse().unwrap(), 64, "fe80::1".parse().unwrap(), 7),
            route("febf:1::".parse().unwrap(), 32, "fe80::1".parse().unwrap(), 7),
        ],
    );

    h.engine.poll_routes(IpFamily::Ipv4).unwrap();
    h.engine.poll_routes(IpFamily::Ipv6).unwrap();

    let v4 = h.engine.ipv4_routes();
    assert_eq!(v4.len(), 1);
    assert_eq!(v4.keys().next().unwrap().network.to_string(), "10.0.0.0/8");
    assert!(h.engine.ipv6_routes().is_empty());
    assert_eq!(h.switch.route_count(), 1);
    assert_eq!(h.engine.diagnostics().decode[&ipsyncd::decode::Domain::Ipv4Route].filtered, 2);
}

#[test]
fn test_bulk_calls_are_ceil_of_entries_over_chunk() {
    for (n, chunk) in [(1usize, 4096usize), (4096, 4096), (4097, 4096), (9000, 4096), (10, 3)] {
        let hw = SoftSwitchConfig {
            route_capacity: 100_000,
            bulk_chunk: chunk,
            ..Default::default()
        };
        let h = Harness::with(IpsyncConfig::default(), hw).with_vlan(10, 7);
        h.kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(n, 7));

        h.engine.poll_routes(IpFamily::Ipv4).unwrap();

        let calls = bulk_adds(&h.switch.take_journal());
        assert_eq!(calls.len(), n.div_ceil(chunk), "n={} chunk={}", n, chunk);
        assert_eq!(calls.iter().map(|(_, p)| p).sum::<usize>(), n);
        assert!(!h.engine.global_notification().hw_routing_table_depleted);
    }
}

#[test]
fn test_capacity_latch_survives_later_success() {
    let hw = SoftSwitchConfig {
        route_capacity: 10,
        bulk_chunk: 4,
        ..Default::default()
    };
    let h = Harness::with(IpsyncConfig::default(), hw).with_vlan(10, 7);
    h.kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(12, 7));
    h.engine.poll_routes(IpFamily::Ipv4).unwrap();
    assert!(h.engine.global_notification().hw_routing_table_depleted);

    // Shrink the kernel table, then grow it within capacity.
    h.kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(2, 7));
    h.engine.poll_routes(IpFamily::Ipv4).unwrap();
    h.switch.take_journal();
    h.kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(5, 7));
    h.engine.poll_routes(IpFamily::Ipv4).unwrap();

    assert_eq!(bulk_adds(&h.switch.take_journal()), vec![(3, 3)]);
    assert!(h.engine.global_notification().hw_routing_table_depleted);
}

#[test]
fn test_link_local_neighbor_has_no_host_route() {
    let h = Harness::new().with_vlan(10, 7);
    let ip: IpAddr = "fe80::5".parse().unwrap();
    let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
    h.kernel
        .set_dump(RTM_GETNEIGH, AF_INET6, vec![neigh(AF_INET6, 7, ip, mac, NUD_REACHABLE)]);

    h.engine.poll_neighbors(IpFamily::Ipv6).unwrap();
    assert_eq!(
        h.switch.take_journal(),
        vec![HwOp::NeighborAdd(HwNeighbor { vlan: vid(10), ip, mac })]
    );

    h.kernel.set_dump(RTM_GETNEIGH, AF_INET6, Vec::new());
    h.engine.poll_neighbors(IpFamily::Ipv6).unwrap();
    assert_eq!(
        h.switch.take_journal(),
        vec![HwOp::NeighborDel(HwNeighbor { vlan: vid(10), ip, mac })]
    );
    assert_eq!(h.switch.route_count(), 0);
}

#[test]
fn test_global_ipv6_neighbor_needs_on_link_network() {
    let h = Harness::new().with_vlan(10, 7);
    let ip: IpAddr = "2001:db8::5".parse().unwrap();
    h.kernel.set_dump(
        RTM_GETNEIGH,
        AF_INET6,
        vec![neigh(AF_INET6, 7, ip, "00:11:22:33:44:55".parse().unwrap(), NUD_REACHABLE)],
    );

    h.engine.poll_neighbors(IpFamily::Ipv6).unwrap();

    assert!(h.engine.ipv6_neighbors().is_empty());
    assert!(h.switch.take_journal().is_empty());
}

#[test]
fn test_failed_domain_does_not_block_others() {
    let h = Harness::new().with_vlan(10, 7);
    h.kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(2, 7));
    h.kernel.fail_dump(RTM_GETADDR, AF_INET, 1);

    let result = h.engine.poll(ipsyncd::PollFlags::IPV4_ADDR | ipsyncd::PollFlags::IPV4_ROUTE);

    assert!(result.is_err());
    assert_eq!(h.engine.ipv4_routes().len(), 2);
    assert_eq!(h.engine.diagnostics().poll_errors, 1);

    // The failure was transient; the next poll succeeds.
    h.engine.poll(ipsyncd::PollFlags::IPV4_ADDR).unwrap();
}

#[test]
fn test_rleg_failure_keeps_interface_unresolved() {
    let h = Harness::new();
    h.switch.fail_on(ipstack_hw::Fault::RlegAdd);
    h.kernel
        .set_links(vec![link(7, "vtss.vlan.10", Some(MAC), LINK_UP)]);
    h.kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(1, 7));

    h.engine.full_resync().unwrap();

    assert!(h.engine.link_status(vlan(10)).is_some());
    assert_eq!(h.engine.os_ifindex_to_ifindex(7), None);
    assert_eq!(h.engine.os_ifindex_from_ifindex(vlan(10)), Some(7));
    assert!(h.engine.ipv4_routes().is_empty());
    assert_eq!(h.switch.route_count(), 0);
}

#[derive(Default)]
struct RaRecorder {
    seen: Mutex<Vec<(IfIndex, LinkFlags)>>,
}

impl LinkObserver for RaRecorder {
    fn ra_flags_changed(&self, ifindex: IfIndex, flags: LinkFlags) {
        self.seen.lock().push((ifindex, flags));
    }
}

#[test]
fn test_ra_flag_change_notifies_observers() {
    let h = Harness::new().with_vlan(10, 7);
    let recorder = Arc::new(RaRecorder::default());
    h.engine.add_link_observer(recorder.clone());

    h.kernel
        .set_dump(RTM_GETLINK, AF_INET6, vec![link_inet6(7, "vtss.vlan.10", IF_RA_MANAGED)]);
    h.engine.poll_links().unwrap();
    // Unchanged flags are not reported again.
    h.engine.poll_links().unwrap();

    assert_eq!(
        *recorder.seen.lock(),
        vec![(vlan(10), LinkFlags::IPV6_RA_MANAGED)]
    );
    assert!(h.switch.take_journal().is_empty());
}
