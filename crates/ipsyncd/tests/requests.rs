//! Outbound requests: message shape, acknowledgement handling and the
//! resync that follows each request.

mod common;

use common::*;
use ipstack_hw::SoftSwitchConfig;
use ipstack_types::{IpFamily, Ipv4Network, Ipv6Network};
use ipsyncd::netlink::AttrCursor;
use ipsyncd::netlink::consts::*;
use ipsyncd::netlink::message::{IfInfoMsg, NdMsg};
use ipsyncd::{IpsyncConfig, IpsyncError, Ipv4AddrKey};
use nix::errno::Errno;
use pretty_assertions::assert_eq;
use std::net::IpAddr;

#[test]
fn test_if_add_creates_mux_interface_and_polls() {
    let h = Harness::new();
    h.kernel
        .set_links(vec![link(9, "vtss.vlan.20", Some(MAC), LINK_UP)]);

    h.engine.if_add(vid(20)).unwrap();

    let sent = h.kernel.mutations();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].msg_type, RTM_NEWLINK);
    assert_eq!(
        sent[0].flags,
        NLM_F_REQUEST | NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK
    );
    let (_, attrs) = IfInfoMsg::parse(&sent[0].body).unwrap();
    let attrs = AttrCursor::new(attrs).collect_set().unwrap();
    assert_eq!(attrs.get(IFLA_IFNAME).unwrap().as_str().unwrap(), "vtss.vlan.20");
    let kind = attrs
        .get(IFLA_LINKINFO)
        .unwrap()
        .nested()
        .map(|a| a.unwrap())
        .find(|a| a.kind == IFLA_INFO_KIND)
        .unwrap();
    assert_eq!(kind.as_str().unwrap(), "vtss_if_mux");
    assert!(!attrs.contains(IFLA_ADDRESS));

    // The request is followed by a link poll.
    assert_eq!(h.engine.os_ifindex_to_ifindex(9), Some(vlan(20)));
    assert_eq!(h.switch.rlegs(), vec![vid(20)]);
}

#[test]
fn test_if_add_carries_base_mac() {
    let mut config = IpsyncConfig::default();
    config.interfaces.base_mac = Some(MAC);
    let h = Harness::with(config, SoftSwitchConfig::default());

    h.engine.if_add(vid(20)).unwrap();

    let sent = h.kernel.mutations();
    let (_, attrs) = IfInfoMsg::parse(&sent[0].body).unwrap();
    let attrs = AttrCursor::new(attrs).collect_set().unwrap();
    assert_eq!(attrs.get(IFLA_ADDRESS).unwrap().as_mac().unwrap(), MAC);
}

#[test]
fn test_kernel_rejection_is_returned() {
    let h = Harness::new();
    h.kernel.reject(RTM_NEWLINK, Errno::EEXIST);

    let err = h.engine.if_add(vid(20)).unwrap_err();

    assert!(matches!(err, IpsyncError::Kernel(Errno::EEXIST)));
    // No poll after a rejected request.
    assert_eq!(h.kernel.sent().len(), 1);
}

#[test]
fn test_requests_on_unknown_interface_fail_before_sending() {
    let h = Harness::new();

    assert!(matches!(
        h.engine.if_ctl(vlan(30), true),
        Err(IpsyncError::InterfaceNotFound(_))
    ));
    assert!(matches!(
        h.engine.if_del(vlan(30)),
        Err(IpsyncError::InterfaceNotFound(_))
    ));
    assert!(h.kernel.sent().is_empty());
}

#[test]
fn test_if_set_mtu_validates_and_sends() {
    let h = Harness::new().with_vlan(10, 7);
    h.kernel.clear_sent();

    assert!(matches!(
        h.engine.if_set_mtu(vlan(10), 0),
        Err(IpsyncError::InvalidRequest(_))
    ));
    assert!(h.kernel.sent().is_empty());

    h.engine.if_set_mtu(vlan(10), 9000).unwrap();
    let sent = h.kernel.mutations();
    let (hdr, attrs) = IfInfoMsg::parse(&sent[0].body).unwrap();
    assert_eq!(hdr.index, 7);
    let attrs = AttrCursor::new(attrs).collect_set().unwrap();
    assert_eq!(attrs.get(IFLA_MTU).unwrap().as_u32().unwrap(), 9000);
}

#[test]
fn test_if_ctl_sets_up_flag_and_polls_routes() {
    let h = Harness::new().with_vlan(10, 7);
    h.kernel.set_dump(RTM_GETROUTE, AF_INET, v4_routes(2, 7));
    h.kernel.clear_sent();

    h.engine.if_ctl(vlan(10), false).unwrap();

    let sent = h.kernel.sent();
    let (hdr, _) = IfInfoMsg::parse(&sent[0].body).unwrap();
    assert_eq!(hdr.change, IFF_UP);
    assert_eq!(hdr.flags, 0);
    assert!(sent.iter().any(|s| s.msg_type == RTM_GETROUTE));
    assert_eq!(h.engine.ipv4_routes().len(), 2);
}

#[test]
fn test_ipv4_address_toggles_rleg_unicast() {
    let h = Harness::new().with_vlan(10, 7);
    let network: Ipv4Network = "192.0.2.1/24".parse().unwrap();
    h.kernel.set_dump(
        RTM_GETADDR,
        AF_INET,
        vec![addr(AF_INET, 7, IpAddr::V4(network.addr()), 24)],
    );

    h.engine.ipv4_add(vlan(10), network).unwrap();

    assert_eq!(h.switch.rleg_ipv4_unicast(vid(10)), Some(true));
    assert!(h.engine.ipv4_addresses().contains_key(&Ipv4AddrKey {
        ifindex: vlan(10),
        network,
    }));
    let sent = h.kernel.mutations();
    assert_eq!(sent[0].msg_type, RTM_NEWADDR);
    assert_eq!(
        sent[0].flags,
        NLM_F_REQUEST | NLM_F_CREATE | NLM_F_REPLACE | NLM_F_ACK
    );

    h.kernel.set_dump(RTM_GETADDR, AF_INET, Vec::new());
    h.engine.ipv4_del(vlan(10), network).unwrap();

    assert_eq!(h.switch.rleg_ipv4_unicast(vid(10)), Some(false));
    assert!(h.engine.ipv4_addresses().is_empty());
}

#[test]
fn test_ipv4_del_keeps_unicast_while_addresses_remain() {
    let h = Harness::new().with_vlan(10, 7);
    let first: Ipv4Network = "192.0.2.1/24".parse().unwrap();
    let second: Ipv4Network = "198.51.100.1/24".parse().unwrap();
    h.kernel.set_dump(
        RTM_GETADDR,
        AF_INET,
        vec![
            addr(AF_INET, 7, IpAddr::V4(first.addr()), 24),
            addr(AF_INET, 7, IpAddr::V4(second.addr()), 24),
        ],
    );
    h.engine.ipv4_add(vlan(10), first).unwrap();

    h.kernel.set_dump(
        RTM_GETADDR,
        AF_INET,
        vec![addr(AF_INET, 7, IpAddr::V4(second.addr()), 24)],
    );
    h.engine.ipv4_del(vlan(10), first).unwrap();

    assert_eq!(h.switch.rleg_ipv4_unicast(vid(10)), Some(true));
}

#[test]
fn test_ipv6_address_admits_on_link_neighbors() {
    let h = Harness::new().with_vlan(10, 7);
    let network: Ipv6Network = "2001:db8::1/64".parse().unwrap();
    let neighbor: IpAddr = "2001:db8::5".parse().unwrap();
    h.kernel.set_dump(
        RTM_GETADDR,
        AF_INET6,
        vec![addr(AF_INET6, 7, IpAddr::V6(network.addr()), 64)],
    );
    h.kernel.set_dump(
        RTM_GETNEIGH,
        AF_INET6,
        vec![neigh(AF_INET6, 7, neighbor, "00:11:22:33:44:55".parse().unwrap(), NUD_REACHABLE)],
    );

    h.engine.ipv6_add(vlan(10), network).unwrap();

    assert_eq!(h.engine.ipv6_addresses().len(), 1);
    assert_eq!(h.engine.ipv6_neighbors().len(), 1);
    assert_eq!(h.switch.neighbors().len(), 1);
    assert_eq!(h.switch.route_count(), 1);

    // Interface down: the kernel already flushed the address.
    h.kernel.clear_sent();
    h.kernel.set_dump(RTM_GETADDR, AF_INET6, Vec::new());
    h.engine.ipv6_del(vlan(10), network, false).unwrap();

    assert!(h.kernel.mutations().is_empty());
    assert!(h.engine.ipv6_neighbors().is_empty());
    assert!(h.switch.neighbors().is_empty());
    assert_eq!(h.switch.route_count(), 0);
}

#[test]
fn test_neighbor_clear_deletes_each_entry() {
    let h = Harness::new().with_vlan(10, 7);
    let ips: Vec<IpAddr> = vec!["192.0.2.5".parse().unwrap(), "192.0.2.6".parse().unwrap()];
    h.kernel.set_dump(
        RTM_GETNEIGH,
        AF_INET,
        ips.iter()
            .map(|ip| neigh(AF_INET, 7, *ip, "00:11:22:33:44:55".parse().unwrap(), NUD_REACHABLE))
            .collect(),
    );
    h.engine.poll_neighbors(IpFamily::Ipv4).unwrap();
    h.kernel.clear_sent();
    h.kernel.set_dump(RTM_GETNEIGH, AF_INET, Vec::new());

    h.engine.neighbor_clear(Some(IpFamily::Ipv4)).unwrap();

    let deletes = h.kernel.mutations();
    assert_eq!(deletes.len(), 2);
    for (sent, ip) in deletes.iter().zip(&ips) {
        assert_eq!(sent.msg_type, RTM_DELNEIGH);
        let (hdr, attrs) = NdMsg::parse(&sent.body).unwrap();
        assert_eq!(hdr.family, AF_INET);
        assert_eq!(hdr.index, 7);
        let attrs = AttrCursor::new(attrs).collect_set().unwrap();
        assert_eq!(attrs.get(NDA_DST).unwrap().as_ip(AF_INET).unwrap(), *ip);
    }
    assert!(h.engine.ipv4_neighbors().is_empty());
    assert!(h.switch.neighbors().is_empty());
}

#[test]
fn test_neighbor_clear_stops_at_first_rejection_but_resyncs() {
    let h = Harness::new().with_vlan(10, 7);
    h.kernel.set_dump(
        RTM_GETNEIGH,
        AF_INET,
        vec![
            neigh(AF_INET, 7, "192.0.2.5".parse().unwrap(), MAC, NUD_REACHABLE),
            neigh(AF_INET, 7, "192.0.2.6".parse().unwrap(), MAC, NUD_REACHABLE),
        ],
    );
    h.engine.poll_neighbors(IpFamily::Ipv4).unwrap();
    h.kernel.clear_sent();
    h.kernel.reject(RTM_DELNEIGH, Errno::EPERM);

    let err = h.engine.neighbor_clear(Some(IpFamily::Ipv4)).unwrap_err();

    assert!(matches!(err, IpsyncError::Kernel(Errno::EPERM)));
    assert_eq!(h.kernel.mutations().len(), 1);
    assert!(h.kernel.sent().iter().any(|s| s.msg_type == RTM_GETNEIGH));
}

#[test]
fn test_routing_enable_writes_sysctls() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("net/ipv4")).unwrap();
    std::fs::create_dir_all(dir.path().join("net/ipv6/conf/all")).unwrap();
    let mut config = IpsyncConfig::default();
    config.routing.sysctl_root = dir.path().to_path_buf();
    let h = Harness::with(config, SoftSwitchConfig::default());

    h.engine.routing_enable(true).unwrap();

    let v4 = std::fs::read_to_string(dir.path().join("net/ipv4/ip_forward")).unwrap();
    let v6 = std::fs::read_to_string(dir.path().join("net/ipv6/conf/all/forwarding")).unwrap();
    assert_eq!(v4, "1\n");
    assert_eq!(v6, "1\n");
    assert!(h.switch.routing_enabled());

    h.engine.routing_enable(false).unwrap();
    let v4 = std::fs::read_to_string(dir.path().join("net/ipv4/ip_forward")).unwrap();
    assert_eq!(v4, "0\n");
    assert!(!h.switch.routing_enabled());
}

#[test]
fn test_routing_enable_missing_sysctl_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = IpsyncConfig::default();
    config.routing.sysctl_root = dir.path().join("missing");
    let h = Harness::with(config, SoftSwitchConfig::default());

    assert!(matches!(h.engine.routing_enable(true), Err(IpsyncError::Io(_))));
    assert!(!h.switch.routing_enabled());
}
