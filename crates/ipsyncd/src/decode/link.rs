//! Link dump decoder.
//!
//! Links are dumped twice: once with AF_UNSPEC, which creates the entries,
//! and once with AF_INET6, whose IFLA_PROTINFO carries the router
//! advertisement flags that are merged into the entries of the first pass.

use super::{Decoded, Domain};
use crate::config::InterfacesConfig;
use crate::netlink::consts::*;
use crate::netlink::message::IfInfoMsg;
use crate::netlink::{AttrCursor, DecodeError, NetlinkMessage};
use crate::types::{IfIndex, LinkFlags, LinkStatus};
use tracing::trace;

/// What one link message contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRecord {
    /// Both MAC attributes present: a complete entry.
    Full(IfIndex, LinkStatus),
    /// Only RA flags; applies to an entry created by another message.
    RaFlags(IfIndex, LinkFlags),
}

fn link_flags(ifi_flags: u32) -> LinkFlags {
    const MAP: [(u32, LinkFlags); 6] = [
        (IFF_LOWER_UP, LinkFlags::UP),
        (IFF_BROADCAST, LinkFlags::BROADCAST),
        (IFF_LOOPBACK, LinkFlags::LOOPBACK),
        (IFF_NOARP, LinkFlags::NOARP),
        (IFF_PROMISC, LinkFlags::PROMISC),
        (IFF_MULTICAST, LinkFlags::MULTICAST),
    ];
    MAP.iter()
        .filter(|(bit, _)| ifi_flags & bit != 0)
        .fold(LinkFlags::empty(), |acc, (_, flag)| acc | *flag)
}

fn ra_flags(inet6_flags: u32) -> LinkFlags {
    let mut flags = LinkFlags::empty();
    if inet6_flags & IF_RA_MANAGED != 0 {
        flags |= LinkFlags::IPV6_RA_MANAGED;
    }
    if inet6_flags & IF_RA_OTHERCONF != 0 {
        flags |= LinkFlags::IPV6_RA_OTHER;
    }
    flags
}

/// Decodes one RTM_NEWLINK message. `Ok(None)` means the message is not for
/// us.
pub fn decode_link(
    msg: &NetlinkMessage,
    names: &InterfacesConfig,
) -> Result<Option<LinkRecord>, DecodeError> {
    if msg.msg_type != RTM_NEWLINK && msg.msg_type != RTM_GETLINK {
        return Ok(None);
    }

    let (hdr, attrs) = IfInfoMsg::parse(&msg.payload)?;
    let attrs = AttrCursor::new(attrs).collect_set()?;

    let Some(name) = attrs.get(IFLA_IFNAME) else {
        return Ok(None);
    };
    let name = name.as_str()?;
    let Some(ifindex) = names.parse_name(name) else {
        trace!(name, "Unrecognized interface");
        return Ok(None);
    };

    let mac = attrs.get(IFLA_ADDRESS).map(|a| a.as_mac()).transpose()?;
    let broadcast = attrs.get(IFLA_BROADCAST).map(|a| a.as_mac()).transpose()?;
    let mtu = attrs.get(IFLA_MTU).map(|a| a.as_u32()).transpose()?.unwrap_or(0);

    // Bridge ports carry their own IFLA_PROTINFO layout; only the IPv6 one
    // holds RA flags.
    let mut ra = LinkFlags::empty();
    if hdr.family == AF_INET6 {
        if let Some(protinfo) = attrs.get(IFLA_PROTINFO) {
            for attr in protinfo.nested() {
                let attr = attr?;
                if attr.kind == IFLA_INET6_FLAGS {
                    ra |= ra_flags(attr.as_u32()?);
                }
            }
        }
    }

    match (mac, broadcast) {
        (Some(mac), Some(broadcast)) => {
            let os_ifindex =
                u32::try_from(hdr.index).map_err(|_| DecodeError::BadIndex(hdr.index))?;
            Ok(Some(LinkRecord::Full(
                ifindex,
                LinkStatus {
                    os_ifindex,
                    mac,
                    broadcast,
                    mtu,
                    flags: link_flags(hdr.flags) | ra,
                },
            )))
        }
        _ if !ra.is_empty() => Ok(Some(LinkRecord::RaFlags(ifindex, ra))),
        _ => Ok(None),
    }
}

/// Decodes both link dumps into one snapshot.
pub fn decode_links(
    unspec: &[NetlinkMessage],
    inet6: &[NetlinkMessage],
    names: &InterfacesConfig,
) -> Decoded<IfIndex, LinkStatus> {
    let mut out = Decoded::default();
    for msg in unspec.iter().chain(inet6) {
        match decode_link(msg, names) {
            Ok(Some(LinkRecord::Full(ifindex, status))) => {
                trace!(%ifindex, os_ifindex = status.os_ifindex, "Link");
                out.accept(ifindex, status);
            }
            Ok(Some(LinkRecord::RaFlags(ifindex, flags))) => match out.entries.get_mut(&ifindex) {
                Some(status) => status.flags |= flags,
                None => out.filter(),
            },
            Ok(None) => out.filter(),
            Err(e) => out.malformed(Domain::Link, &e),
        }
    }
    out
}
