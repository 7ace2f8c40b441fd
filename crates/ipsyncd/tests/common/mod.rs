//! Shared fixtures: a scriptable kernel and dump message builders.

#![allow(dead_code)]

use ipstack_hw::{SoftSwitch, SoftSwitchConfig};
use ipstack_types::{MacAddress, VlanId};
use ipsyncd::netlink::consts::*;
use ipsyncd::netlink::message::{IfAddrMsg, IfInfoMsg, NdMsg, RtMsg, push_attr};
use ipsyncd::netlink::{MessageBuilder, NetlinkMessage, NetlinkTransport};
use ipsyncd::{IfIndex, IpsyncConfig, IpsyncError, Result, SyncEngine};
use nix::errno::Errno;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

pub const MAC: MacAddress = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
pub const LINK_UP: u32 = IFF_UP | IFF_LOWER_UP | IFF_BROADCAST | IFF_MULTICAST;

/// One request as the kernel received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub msg_type: u16,
    pub flags: u16,
    pub body: Vec<u8>,
}

/// Kernel stand-in: answers dumps from canned tables and acknowledges
/// mutations, optionally with an error.
#[derive(Debug, Default)]
pub struct FakeKernel {
    dumps: Mutex<HashMap<(u16, u8), Vec<NetlinkMessage>>>,
    sent: Mutex<Vec<Sent>>,
    reject: Mutex<HashMap<u16, Errno>>,
    dump_failures: Mutex<HashMap<(u16, u8), usize>>,
}

fn is_dump(msg_type: u16) -> bool {
    matches!(msg_type, RTM_GETLINK | RTM_GETADDR | RTM_GETROUTE | RTM_GETNEIGH)
}

impl FakeKernel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces what the kernel reports for one dump.
    pub fn set_dump(&self, msg_type: u16, family: u8, msgs: Vec<NetlinkMessage>) {
        self.dumps.lock().insert((msg_type, family), msgs);
    }

    pub fn set_links(&self, msgs: Vec<NetlinkMessage>) {
        self.set_dump(RTM_GETLINK, AF_UNSPEC, msgs);
    }

    /// Makes every mutation of `msg_type` fail with `errno`.
    pub fn reject(&self, msg_type: u16, errno: Errno) {
        self.reject.lock().insert(msg_type, errno);
    }

    /// Makes the next `count` dumps of one kind fail.
    pub fn fail_dump(&self, msg_type: u16, family: u8, count: usize) {
        self.dump_failures.lock().insert((msg_type, family), count);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Mutations only, dumps filtered out.
    pub fn mutations(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .iter()
            .filter(|s| !is_dump(s.msg_type))
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

impl NetlinkTransport for FakeKernel {
    fn request(&self, request: &MessageBuilder) -> Result<Vec<NetlinkMessage>> {
        self.sent.lock().push(Sent {
            msg_type: request.msg_type(),
            flags: request.flags(),
            body: request.body().to_vec(),
        });

        if is_dump(request.msg_type()) {
            let family = request.body().first().copied().unwrap_or(AF_UNSPEC);
            let key = (request.msg_type(), family);
            if let Some(left) = self.dump_failures.lock().get_mut(&key) {
                if *left > 0 {
                    *left -= 1;
                    return Err(IpsyncError::Netlink("dump interrupted".into()));
                }
            }
            return Ok(self.dumps.lock().get(&key).cloned().unwrap_or_default());
        }

        match self.reject.lock().get(&request.msg_type()) {
            Some(errno) => Err(IpsyncError::Kernel(*errno)),
            None => Ok(Vec::new()),
        }
    }
}

/// Engine wired to a fake kernel and a software switch.
pub struct Harness {
    pub kernel: Arc<FakeKernel>,
    pub switch: Arc<SoftSwitch>,
    pub engine: SyncEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(IpsyncConfig::default(), SoftSwitchConfig::default())
    }

    pub fn with(config: IpsyncConfig, hw: SoftSwitchConfig) -> Self {
        let kernel = FakeKernel::new();
        let switch = Arc::new(SoftSwitch::new(hw));
        let engine = SyncEngine::new(kernel.clone(), switch.clone(), &config);
        Self {
            kernel,
            switch,
            engine,
        }
    }

    /// Brings up `vtss.vlan.<vid>` as kernel ifindex `os_ifindex` and polls
    /// links; the switch journal is cleared afterwards.
    pub fn with_vlan(self, vid: u16, os_ifindex: i32) -> Self {
        self.kernel
            .set_links(vec![link(os_ifindex, &format!("vtss.vlan.{}", vid), Some(MAC), LINK_UP)]);
        self.engine.poll_links().unwrap();
        self.switch.take_journal();
        self
    }
}

pub fn vid(id: u16) -> VlanId {
    VlanId::new(id).unwrap()
}

pub fn vlan(id: u16) -> IfIndex {
    IfIndex::Vlan(vid(id))
}

pub fn ip_bytes(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(a) => a.octets().to_vec(),
        IpAddr::V6(a) => a.octets().to_vec(),
    }
}

fn name_attr(payload: &mut Vec<u8>, name: &str) {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    push_attr(payload, IFLA_IFNAME, &bytes);
}

pub fn link(index: i32, name: &str, mac: Option<MacAddress>, flags: u32) -> NetlinkMessage {
    let mut payload = Vec::new();
    IfInfoMsg {
        family: AF_UNSPEC,
        index,
        flags,
        ..Default::default()
    }
    .emit(&mut payload);
    name_attr(&mut payload, name);
    push_attr(&mut payload, IFLA_MTU, &1500u32.to_ne_bytes());
    if let Some(mac) = mac {
        push_attr(&mut payload, IFLA_ADDRESS, mac.as_bytes());
        push_attr(&mut payload, IFLA_BROADCAST, MacAddress::BROADCAST.as_bytes());
    }
    NetlinkMessage::new(RTM_NEWLINK, NLM_F_MULTI, payload)
}

pub fn link_inet6(index: i32, name: &str, inet6_flags: u32) -> NetlinkMessage {
    let mut payload = Vec::new();
    IfInfoMsg {
        family: AF_INET6,
        index,
        ..Default::default()
    }
    .emit(&mut payload);
    name_attr(&mut payload, name);
    let mut protinfo = Vec::new();
    push_attr(&mut protinfo, IFLA_INET6_FLAGS, &inet6_flags.to_ne_bytes());
    push_attr(&mut payload, IFLA_PROTINFO, &protinfo);
    NetlinkMessage::new(RTM_NEWLINK, NLM_F_MULTI, payload)
}

pub fn addr(family: u8, index: u32, ip: IpAddr, prefix_len: u8) -> NetlinkMessage {
    let mut payload = Vec::new();
    IfAddrMsg {
        family,
        prefix_len,
        index,
        ..Default::default()
    }
    .emit(&mut payload);
    push_attr(&mut payload, IFA_ADDRESS, &ip_bytes(ip));
    NetlinkMessage::new(RTM_NEWADDR, NLM_F_MULTI, payload)
}

/// Main-table unicast route through `gateway` out of `oif`.
pub fn route(dst: IpAddr, dst_len: u8, gateway: IpAddr, oif: u32) -> NetlinkMessage {
    let family = if dst.is_ipv4() { AF_INET } else { AF_INET6 };
    let mut payload = Vec::new();
    RtMsg {
        family,
        dst_len,
        table: RT_TABLE_MAIN,
        route_type: RTN_UNICAST,
        ..Default::default()
    }
    .emit(&mut payload);
    push_attr(&mut payload, RTA_TABLE, &u32::from(RT_TABLE_MAIN).to_ne_bytes());
    push_attr(&mut payload, RTA_DST, &ip_bytes(dst));
    push_attr(&mut payload, RTA_GATEWAY, &ip_bytes(gateway));
    push_attr(&mut payload, RTA_OIF, &oif.to_ne_bytes());
    NetlinkMessage::new(RTM_NEWROUTE, NLM_F_MULTI, payload)
}

/// `count` distinct IPv4 /24 routes through 1.1.1.1 out of `oif`.
pub fn v4_routes(count: usize, oif: u32) -> Vec<NetlinkMessage> {
    (0..count)
        .map(|i| {
            let dst = IpAddr::from([10, (i / 256) as u8, (i % 256) as u8, 0]);
            route(dst, 24, IpAddr::from([1, 1, 1, 1]), oif)
        })
        .collect()
}

pub fn neigh(family: u8, index: i32, ip: IpAddr, mac: MacAddress, state: u16) -> NetlinkMessage {
    let mut payload = Vec::new();
    NdMsg {
        family,
        index,
        state,
        ..Default::default()
    }
    .emit(&mut payload);
    push_attr(&mut payload, NDA_DST, &ip_bytes(ip));
    push_attr(&mut payload, NDA_LLADDR, mac.as_bytes());
    NetlinkMessage::new(RTM_NEWNEIGH, NLM_F_MULTI, payload)
}

/// Kernel bridge FDB entry.
pub fn fdb(index: i32, mac: MacAddress) -> NetlinkMessage {
    let mut payload = Vec::new();
    NdMsg {
        family: AF_BRIDGE,
        index,
        state: NUD_PERMANENT,
        flags: NTF_SELF,
        ..Default::default()
    }
    .emit(&mut payload);
    push_attr(&mut payload, NDA_LLADDR, mac.as_bytes());
    NetlinkMessage::new(RTM_NEWNEIGH, NLM_F_MULTI, payload)
}
