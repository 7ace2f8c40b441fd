//! Outbound configuration requests.
//!
//! Each request sends one mutation to the kernel, waits for its
//! acknowledgement and then re-polls the affected domains before returning,
//! so the caller observes the result in the status tables.

use crate::engine::SyncEngine;
use crate::error::{IpsyncError, Result};
use crate::netlink::MessageBuilder;
use crate::netlink::consts::*;
use crate::netlink::message::{IfAddrMsg, IfInfoMsg, NdMsg};
use crate::types::{IfIndex, PollFlags};
use ipstack_types::{IpFamily, Ipv4Network, Ipv6Network, VlanId};
use std::net::IpAddr;
use tracing::{info, instrument, warn};

const IPV4_FORWARDING: &str = "net/ipv4/ip_forward";
const IPV6_FORWARDING: &str = "net/ipv6/conf/all/forwarding";

/// Smallest MTU the kernel accepts for an IPv4 interface.
const MIN_MTU: u32 = 68;

fn ipv4_request(msg_type: u16, flags: u16, os_ifindex: u32, network: Ipv4Network) -> MessageBuilder {
    let addr = network.addr().octets();
    MessageBuilder::new(msg_type, flags)
        .ifaddr(IfAddrMsg {
            family: AF_INET,
            prefix_len: network.prefix_len(),
            index: os_ifindex,
            ..Default::default()
        })
        .attr(IFA_LOCAL, &addr)
        .attr(IFA_ADDRESS, &addr)
        .attr(IFA_BROADCAST, &network.broadcast().octets())
}

fn ipv6_request(msg_type: u16, flags: u16, os_ifindex: u32, network: Ipv6Network) -> MessageBuilder {
    let addr = network.addr().octets();
    MessageBuilder::new(msg_type, flags)
        .ifaddr(IfAddrMsg {
            family: AF_INET6,
            prefix_len: network.prefix_len(),
            index: os_ifindex,
            ..Default::default()
        })
        .attr(IFA_LOCAL, &addr)
        .attr(IFA_ADDRESS, &addr)
}

fn ifinfo_index(os_ifindex: u32) -> Result<i32> {
    i32::try_from(os_ifindex)
        .map_err(|_| IpsyncError::InvalidRequest(format!("interface index {} out of range", os_ifindex)))
}

impl SyncEngine {
    fn os_ifindex(&self, ifindex: IfIndex) -> Result<u32> {
        self.os_ifindex_from_ifindex(ifindex)
            .ok_or_else(|| IpsyncError::InterfaceNotFound(ifindex.to_string()))
    }

    fn send(&self, request: &MessageBuilder) -> Result<()> {
        self.transport.request(request).map(|_| ())
    }

    /// Creates the kernel interface of `vlan`.
    #[instrument(skip(self))]
    pub fn if_add(&self, vlan: VlanId) -> Result<()> {
        let name = self.names.vlan_name(vlan);
        let kind = self.names.mux_kind.clone();
        let mut request = MessageBuilder::new(
            RTM_NEWLINK,
            NLM_F_REQUEST | NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK,
        )
        .ifinfo(IfInfoMsg::default())
        .attr_str(IFLA_IFNAME, &name)
        .nested(IFLA_LINKINFO, |n| n.attr_str(IFLA_INFO_KIND, &kind));
        if let Some(mac) = self.names.base_mac {
            request = request.attr(IFLA_ADDRESS, mac.as_bytes());
        }
        self.send(&request)?;
        info!(name, "Interface created");
        self.poll_links()
    }

    #[instrument(skip(self))]
    pub fn if_set_mtu(&self, ifindex: IfIndex, mtu: u32) -> Result<()> {
        if mtu < MIN_MTU {
            return Err(IpsyncError::InvalidRequest(format!("mtu {} below {}", mtu, MIN_MTU)));
        }
        let os_ifindex = self.os_ifindex(ifindex)?;
        let request = MessageBuilder::new(RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK)
            .ifinfo(IfInfoMsg {
                index: ifinfo_index(os_ifindex)?,
                ..Default::default()
            })
            .attr_u32(IFLA_MTU, mtu);
        self.send(&request)?;
        self.poll_links()
    }

    /// Sets the administrative state. Routes follow the link, so both route
    /// domains are re-polled too.
    #[instrument(skip(self))]
    pub fn if_ctl(&self, ifindex: IfIndex, up: bool) -> Result<()> {
        let os_ifindex = self.os_ifindex(ifindex)?;
        let request = MessageBuilder::new(RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK).ifinfo(IfInfoMsg {
            index: ifinfo_index(os_ifindex)?,
            flags: if up { IFF_UP } else { 0 },
            change: IFF_UP,
            ..Default::default()
        });
        self.send(&request)?;
        self.poll(PollFlags::LINK | PollFlags::IPV4_ROUTE | PollFlags::IPV6_ROUTE)
    }

    #[instrument(skip(self))]
    pub fn if_del(&self, ifindex: IfIndex) -> Result<()> {
        let os_ifindex = self.os_ifindex(ifindex)?;
        let request = MessageBuilder::new(RTM_DELLINK, NLM_F_REQUEST | NLM_F_ACK).ifinfo(IfInfoMsg {
            index: ifinfo_index(os_ifindex)?,
            ..Default::default()
        });
        self.send(&request)?;
        info!(%ifindex, "Interface deleted");
        self.poll_links()
    }

    /// Adds an IPv4 address and enables IPv4 unicast routing on the
    /// interface's router leg.
    #[instrument(skip(self))]
    pub fn ipv4_add(&self, ifindex: IfIndex, network: Ipv4Network) -> Result<()> {
        let os_ifindex = self.os_ifindex(ifindex)?;
        self.send(&ipv4_request(
            RTM_NEWADDR,
            NLM_F_REQUEST | NLM_F_CREATE | NLM_F_REPLACE | NLM_F_ACK,
            os_ifindex,
            network,
        ))?;
        let hw = match ifindex.vlan() {
            Some(vlan) => self.chip.rleg_ipv4_unicast(vlan, true),
            None => Ok(()),
        };
        self.poll_ipv4_addrs()?;
        hw.map_err(IpsyncError::from)
    }

    /// Removes an IPv4 address. IPv4 unicast routing on the router leg is
    /// disabled once the interface has no IPv4 address left.
    #[instrument(skip(self))]
    pub fn ipv4_del(&self, ifindex: IfIndex, network: Ipv4Network) -> Result<()> {
        let os_ifindex = self.os_ifindex(ifindex)?;
        self.send(&ipv4_request(
            RTM_DELADDR,
            NLM_F_REQUEST | NLM_F_ACK,
            os_ifindex,
            network,
        ))?;
        self.poll_ipv4_addrs()?;
        if let Some(vlan) = ifindex.vlan() {
            let remaining = self.ipv4_addrs.snapshot().keys().any(|k| k.ifindex == ifindex);
            if !remaining {
                self.chip.rleg_ipv4_unicast(vlan, false)?;
            }
        }
        Ok(())
    }

    /// Adds an IPv6 address and records its network as on-link, so that
    /// neighbors inside it are tracked.
    #[instrument(skip(self))]
    pub fn ipv6_add(&self, ifindex: IfIndex, network: Ipv6Network) -> Result<()> {
        let os_ifindex = self.os_ifindex(ifindex)?;
        self.send(&ipv6_request(
            RTM_NEWADDR,
            NLM_F_REQUEST | NLM_F_CREATE | NLM_F_REPLACE | NLM_F_ACK,
            os_ifindex,
            network,
        ))?;
        let polled = self.poll_ipv6_addrs();
        self.index.lock().ipv6_networks.insert(ifindex, network);
        polled.and(self.poll_neighbors(IpFamily::Ipv6))
    }

    /// Removes an IPv6 address. When the interface is down the kernel has
    /// already flushed it and only local state is updated.
    #[instrument(skip(self))]
    pub fn ipv6_del(&self, ifindex: IfIndex, network: Ipv6Network, if_up: bool) -> Result<()> {
        let os_ifindex = self.os_ifindex(ifindex)?;
        if if_up {
            self.send(&ipv6_request(
                RTM_DELADDR,
                NLM_F_REQUEST | NLM_F_ACK,
                os_ifindex,
                network,
            ))?;
        }
        let polled = self.poll_ipv6_addrs();
        {
            let mut index = self.index.lock();
            if index.ipv6_networks.get(&ifindex) == Some(&network) {
                index.ipv6_networks.remove(&ifindex);
            }
        }
        polled.and(self.poll_neighbors(IpFamily::Ipv6))
    }

    /// Asks the kernel to forget every cached neighbor of `family` (both
    /// families when `None`). Stops at the first rejected delete.
    #[instrument(skip(self))]
    pub fn neighbor_clear(&self, family: Option<IpFamily>) -> Result<()> {
        let families = match family {
            Some(f) => vec![f],
            None => vec![IpFamily::Ipv4, IpFamily::Ipv6],
        };
        for family in families {
            let (table, af, flag) = match family {
                IpFamily::Ipv4 => (&self.ipv4_neighbors, AF_INET, PollFlags::IPV4_NEIGHBOR),
                IpFamily::Ipv6 => (&self.ipv6_neighbors, AF_INET6, PollFlags::IPV6_NEIGHBOR),
            };
            let mut result = Ok(());
            for (key, status) in table.snapshot() {
                let dst = match key.ip {
                    IpAddr::V4(a) => a.octets().to_vec(),
                    IpAddr::V6(a) => a.octets().to_vec(),
                };
                let request = MessageBuilder::new(RTM_DELNEIGH, NLM_F_REQUEST | NLM_F_ACK)
                    .ndmsg(NdMsg {
                        family: af,
                        index: ifinfo_index(status.os_ifindex)?,
                        ..Default::default()
                    })
                    .attr(NDA_DST, &dst);
                if let Err(e) = self.send(&request) {
                    warn!(neighbor = %key, error = %e, "Kernel refused neighbor delete");
                    result = Err(e);
                    break;
                }
            }
            let polled = self.poll(flag);
            result?;
            polled?;
        }
        Ok(())
    }

    /// Turns IP forwarding on or off in the kernel and in hardware.
    #[instrument(skip(self))]
    pub fn routing_enable(&self, enable: bool) -> Result<()> {
        let value = if enable { "1\n" } else { "0\n" };
        for knob in [IPV4_FORWARDING, IPV6_FORWARDING] {
            std::fs::write(self.routing.sysctl_root.join(knob), value)?;
        }
        self.chip.routing_enable(enable)?;
        info!(enable, "Routing");
        Ok(())
    }
}
