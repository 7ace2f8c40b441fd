//! Neighbor (ARP / ND) dump decoder.

use super::{DecodeContext, Decoded, Domain};
use crate::netlink::consts::*;
use crate::netlink::message::NdMsg;
use crate::netlink::{AttrCursor, DecodeError, NetlinkMessage};
use crate::types::{NeighborFlags, NeighborKey, NeighborStatus};
use ipstack_types::{IpFamily, Ipv6Network};
use std::net::IpAddr;
use tracing::trace;

/// Decodes one neighbor message. `Ok(None)` means the entry is not for us or
/// is incomplete.
pub fn decode_neighbor(
    msg: &NetlinkMessage,
    family: IpFamily,
    ctx: &DecodeContext<'_>,
) -> Result<Option<(NeighborKey, NeighborStatus)>, DecodeError> {
    if msg.msg_type != RTM_NEWNEIGH {
        return Ok(None);
    }
    let af = match family {
        IpFamily::Ipv4 => AF_INET,
        IpFamily::Ipv6 => AF_INET6,
    };
    let (hdr, attrs) = NdMsg::parse(&msg.payload)?;
    if hdr.family != af || hdr.state & NUD_NOARP != 0 {
        return Ok(None);
    }
    let Some(ifindex) = ctx.ifindex_i32(hdr.index) else {
        return Ok(None);
    };
    let os_ifindex = u32::try_from(hdr.index).map_err(|_| DecodeError::BadIndex(hdr.index))?;

    let attrs = AttrCursor::new(attrs).collect_set()?;
    let (Some(dst), Some(lladdr)) = (attrs.get(NDA_DST), attrs.get(NDA_LLADDR)) else {
        // Incomplete or failed resolution.
        return Ok(None);
    };
    let ip = dst.as_ip(af)?;
    let mac = lladdr.as_mac()?;

    if let IpAddr::V6(v6) = ip {
        let link_local = Ipv6Network::host(v6).is_link_local();
        let on_link = ctx
            .ipv6_networks
            .get(&ifindex)
            .is_some_and(|net| ifindex.vlan().is_some() && net.contains(v6));
        if !link_local && !on_link {
            trace!(%ip, %ifindex, "Neighbor outside on-link network");
            return Ok(None);
        }
    }

    let mut flags = NeighborFlags::VALID;
    if hdr.flags & NTF_ROUTER != 0 {
        flags |= NeighborFlags::ROUTER;
    }
    if hdr.state & NUD_PERMANENT != 0 {
        flags |= NeighborFlags::PERMANENT;
    }

    Ok(Some((
        NeighborKey { ip, ifindex },
        NeighborStatus {
            mac,
            flags,
            os_ifindex,
        },
    )))
}

pub fn decode_neighbors(
    msgs: &[NetlinkMessage],
    family: IpFamily,
    ctx: &DecodeContext<'_>,
) -> Decoded<NeighborKey, NeighborStatus> {
    let domain = match family {
        IpFamily::Ipv4 => Domain::Ipv4Neighbor,
        IpFamily::Ipv6 => Domain::Ipv6Neighbor,
    };
    let mut out = Decoded::default();
    for msg in msgs {
        match decode_neighbor(msg, family, ctx) {
            Ok(Some((key, status))) => out.accept(key, status),
            Ok(None) => out.filter(),
            Err(e) => out.malformed(domain, &e),
        }
    }
    out
}
