//! Route dump decoder.
//!
//! A route is kept when all of these hold:
//!
//! - it lives in the main table
//! - its destination, if given, is routable (not link-local, and for IPv6
//!   not multicast)
//! - it has a gateway or a destination
//! - its egress interface is one of ours, unless it is a blackhole
//!
//! RTA_MULTIPATH routes expand to one entry per next hop, each resolved
//! against its own interface.

use super::{DecodeContext, Decoded, Domain};
use crate::netlink::consts::*;
use crate::netlink::message::{RtMsg, RtNextHop};
use crate::netlink::{AttrCursor, DecodeError, NetlinkMessage};
use crate::types::{IfIndex, RouteFlags, RouteInfo, RouteKey, RouteProtocol};
use ipstack_hw::HwRoute;
use ipstack_types::{IpFamily, IpNetwork};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::trace;

fn af(family: IpFamily) -> u8 {
    match family {
        IpFamily::Ipv4 => AF_INET,
        IpFamily::Ipv6 => AF_INET6,
    }
}

fn unspecified(family: IpFamily) -> IpAddr {
    match family {
        IpFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Next hop the hardware treats as "drop".
pub fn blackhole(family: IpFamily) -> IpAddr {
    match family {
        IpFamily::Ipv4 => IpAddr::V4(HwRoute::IPV4_BLACKHOLE),
        IpFamily::Ipv6 => IpAddr::V6(HwRoute::IPV6_BLACKHOLE),
    }
}

fn routable(network: &IpNetwork) -> bool {
    match network {
        IpNetwork::V4(n) => n.is_routable(),
        IpNetwork::V6(n) => n.is_routable() && !n.is_multicast(),
    }
}

/// Decodes one route message into zero or more entries.
pub fn decode_route(
    msg: &NetlinkMessage,
    family: IpFamily,
    ctx: &DecodeContext<'_>,
) -> Result<Vec<(RouteKey, RouteInfo)>, DecodeError> {
    if msg.msg_type != RTM_NEWROUTE && msg.msg_type != RTM_GETROUTE {
        return Ok(Vec::new());
    }
    let (hdr, attrs) = RtMsg::parse(&msg.payload)?;
    if hdr.family != af(family) {
        return Ok(Vec::new());
    }
    let attrs = AttrCursor::new(attrs).collect_set()?;

    let table = match attrs.get(RTA_TABLE) {
        Some(attr) => attr.as_u32()?,
        None => u32::from(hdr.table),
    };
    if table != u32::from(RT_TABLE_MAIN) {
        trace!(table, "Route outside main table");
        return Ok(Vec::new());
    }

    let dst = attrs
        .get(RTA_DST)
        .map(|a| a.as_ip(af(family)))
        .transpose()?;
    let network = IpNetwork::new(dst.unwrap_or(unspecified(family)), hdr.dst_len)
        .map_err(|_| DecodeError::BadPrefixLength(hdr.dst_len))?;
    if dst.is_some() && !routable(&network) {
        trace!(%network, "Non-routable destination");
        return Ok(Vec::new());
    }

    let protocol = RouteProtocol::from_rtm(hdr.protocol);
    let metric = attrs
        .get(RTA_PRIORITY)
        .map(|a| a.as_u32())
        .transpose()?
        .unwrap_or(0);
    let mut flags = RouteFlags::FIB | RouteFlags::ACTIVE;
    if hdr.flags & u32::from(RTNH_F_ONLINK) != 0 {
        flags |= RouteFlags::ONLINK;
    }
    let info = |flags: RouteFlags| RouteInfo {
        distance: protocol.distance(),
        metric,
        flags,
    };

    if let Some(multipath) = attrs.get(RTA_MULTIPATH) {
        let mut out = Vec::new();
        for hop in RtNextHop::iter(multipath.payload) {
            let (hop, hop_attrs) = hop?;
            let hop_attrs = AttrCursor::new(hop_attrs).collect_set()?;
            let Some(gateway) = hop_attrs.get(RTA_GATEWAY) else {
                continue;
            };
            let gateway = gateway.as_ip(af(family))?;
            let Some(egress) = ctx.ifindex_i32(hop.ifindex) else {
                trace!(%network, %gateway, "Next hop on foreign interface");
                continue;
            };
            let mut hop_flags = flags;
            if hop.flags & RTNH_F_ONLINK != 0 {
                hop_flags |= RouteFlags::ONLINK;
            }
            out.push((
                RouteKey {
                    network,
                    protocol,
                    next_hop: gateway,
                    egress: Some(egress),
                },
                info(hop_flags),
            ));
        }
        return Ok(out);
    }

    let gateway = attrs
        .get(RTA_GATEWAY)
        .map(|a| a.as_ip(af(family)))
        .transpose()?;
    let egress: Option<IfIndex> = attrs
        .get(RTA_OIF)
        .map(|a| a.as_u32())
        .transpose()?
        .and_then(|oif| ctx.ifindex(oif));
    let is_blackhole = hdr.route_type == RTN_BLACKHOLE;

    if gateway.is_none() && dst.is_none() {
        return Ok(Vec::new());
    }
    if egress.is_none() && !is_blackhole {
        trace!(%network, "Route without one of our interfaces");
        return Ok(Vec::new());
    }

    let next_hop = if is_blackhole {
        if gateway.is_some() {
            trace!(%network, "Ignoring gateway of blackhole route");
        }
        flags |= RouteFlags::BLACKHOLE;
        blackhole(family)
    } else {
        match gateway {
            Some(gw) => gw,
            None => {
                flags |= RouteFlags::CONNECTED;
                unspecified(family)
            }
        }
    };
    if hdr.route_type == RTN_UNREACHABLE {
        flags |= RouteFlags::UNREACHABLE;
    }

    Ok(vec![(
        RouteKey {
            network,
            protocol,
            next_hop,
            egress,
        },
        info(flags),
    )])
}

pub fn decode_routes(
    msgs: &[NetlinkMessage],
    family: IpFamily,
    ctx: &DecodeContext<'_>,
) -> Decoded<RouteKey, RouteInfo> {
    let domain = match family {
        IpFamily::Ipv4 => Domain::Ipv4Route,
        IpFamily::Ipv6 => Domain::Ipv6Route,
    };
    let mut out = Decoded::default();
    for msg in msgs {
        match decode_route(msg, family, ctx) {
            Ok(entries) if entries.is_empty() => out.filter(),
            Ok(entries) => {
                for (key, info) in entries {
                    out.accept(key, info);
                }
            }
            Err(e) => out.malformed(domain, &e),
        }
    }
    out
}

/// Hardware form of a route entry.
pub fn to_hw(key: &RouteKey) -> Option<HwRoute> {
    match (key.network, key.next_hop) {
        (IpNetwork::V4(network), IpAddr::V4(next_hop)) => Some(HwRoute::Ipv4 { network, next_hop }),
        (IpNetwork::V6(network), IpAddr::V6(next_hop)) => Some(HwRoute::Ipv6 {
            network,
            next_hop,
            vlan: key.egress.and_then(|e| e.vlan()),
        }),
        _ => None,
    }
}
