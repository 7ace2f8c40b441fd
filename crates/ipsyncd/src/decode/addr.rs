//! Interface address dump decoders.

use super::{DecodeContext, Decoded, Domain};
use crate::netlink::consts::*;
use crate::netlink::message::IfAddrMsg;
use crate::netlink::{AttrCursor, AttrSet, DecodeError, NetlinkMessage};
use crate::types::{IfIndex, Ipv4AddrInfo, Ipv4AddrKey, Ipv6AddrFlags, Ipv6AddrInfo, Ipv6AddrKey};
use ipstack_types::{Ipv4Network, Ipv6Network};
use tracing::trace;

/// Header, attributes and resolved interface of an address message on one
/// of our interfaces.
fn parse<'a>(
    msg: &'a NetlinkMessage,
    family: u8,
    ctx: &DecodeContext<'_>,
) -> Result<Option<(IfAddrMsg, AttrSet<'a>, IfIndex)>, DecodeError> {
    if msg.msg_type != RTM_NEWADDR && msg.msg_type != RTM_GETADDR {
        return Ok(None);
    }
    let (hdr, attrs) = IfAddrMsg::parse(&msg.payload)?;
    if hdr.family != family {
        return Ok(None);
    }
    let attrs = AttrCursor::new(attrs).collect_set()?;
    if !attrs.contains(IFA_ADDRESS) {
        return Ok(None);
    }
    let Some(ifindex) = ctx.ifindex(hdr.index) else {
        trace!(os_ifindex = hdr.index, "Address on foreign interface");
        return Ok(None);
    };
    Ok(Some((hdr, attrs, ifindex)))
}

pub fn decode_ipv4_addr(
    msg: &NetlinkMessage,
    ctx: &DecodeContext<'_>,
) -> Result<Option<(Ipv4AddrKey, Ipv4AddrInfo)>, DecodeError> {
    let Some((hdr, attrs, ifindex)) = parse(msg, AF_INET, ctx)? else {
        return Ok(None);
    };
    let Some(address) = attrs.get(IFA_ADDRESS) else {
        return Ok(None);
    };
    let network = Ipv4Network::new(address.as_ipv4()?, hdr.prefix_len)
        .map_err(|_| DecodeError::BadPrefixLength(hdr.prefix_len))?;
    let broadcast = attrs.get(IFA_BROADCAST).map(|a| a.as_ipv4()).transpose()?;

    Ok(Some((Ipv4AddrKey { ifindex, network }, Ipv4AddrInfo { broadcast })))
}

fn ipv6_flags(ifa_flags: u32) -> Ipv6AddrFlags {
    let mut flags = Ipv6AddrFlags::empty();
    if ifa_flags & IFA_F_NODAD != 0 {
        flags |= Ipv6AddrFlags::NODAD;
    }
    if ifa_flags & IFA_F_TENTATIVE != 0 {
        flags |= Ipv6AddrFlags::TENTATIVE;
    }
    if ifa_flags & IFA_F_DEPRECATED != 0 {
        flags |= Ipv6AddrFlags::DEPRECATED;
    }
    if ifa_flags & IFA_F_DADFAILED != 0 {
        flags |= Ipv6AddrFlags::DUPLICATED;
    }
    flags
}

pub fn decode_ipv6_addr(
    msg: &NetlinkMessage,
    ctx: &DecodeContext<'_>,
) -> Result<Option<(Ipv6AddrKey, Ipv6AddrInfo)>, DecodeError> {
    let Some((hdr, attrs, ifindex)) = parse(msg, AF_INET6, ctx)? else {
        return Ok(None);
    };
    let Some(address) = attrs.get(IFA_ADDRESS) else {
        return Ok(None);
    };
    let network = Ipv6Network::new(address.as_ipv6()?, hdr.prefix_len)
        .map_err(|_| DecodeError::BadPrefixLength(hdr.prefix_len))?;

    // IFA_FLAGS supersedes the 8-bit header field when present.
    let raw = match attrs.get(IFA_FLAGS) {
        Some(attr) => attr.as_u32()?,
        None => u32::from(hdr.flags),
    };

    Ok(Some((
        Ipv6AddrKey { ifindex, network },
        Ipv6AddrInfo {
            os_ifindex: hdr.index,
            flags: ipv6_flags(raw),
        },
    )))
}

pub fn decode_ipv4_addrs(
    msgs: &[NetlinkMessage],
    ctx: &DecodeContext<'_>,
) -> Decoded<Ipv4AddrKey, Ipv4AddrInfo> {
    let mut out = Decoded::default();
    for msg in msgs {
        match decode_ipv4_addr(msg, ctx) {
            Ok(Some((key, info))) => out.accept(key, info),
            Ok(None) => out.filter(),
            Err(e) => out.malformed(Domain::Ipv4Addr, &e),
        }
    }
    out
}

pub fn decode_ipv6_addrs(
    msgs: &[NetlinkMessage],
    ctx: &DecodeContext<'_>,
) -> Decoded<Ipv6AddrKey, Ipv6AddrInfo> {
    let mut out = Decoded::default();
    for msg in msgs {
        match decode_ipv6_addr(msg, ctx) {
            Ok(Some((key, info))) => out.accept(key, info),
            Ok(None) => out.filter(),
            Err(e) => out.malformed(Domain::Ipv6Addr, &e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil;
    use ipstack_types::VlanId;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::net::IpAddr;

    fn vlan(id: u16) -> IfIndex {
        IfIndex::Vlan(VlanId::new(id).unwrap())
    }

    #[test]
    fn test_ipv4_address_on_known_interface() {
        let interfaces = BTreeMap::from([(7, vlan(10))]);
        let networks = BTreeMap::new();
        let ctx = DecodeContext {
            interfaces: &interfaces,
            ipv6_networks: &networks,
        };
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let msgs = vec![
            testutil::addr(AF_INET, 7, ip, 24, 0),
            testutil::addr(AF_INET, 1, "127.0.0.1".parse().unwrap(), 8, 0),
        ];
        let out = decode_ipv4_addrs(&msgs, &ctx);
        assert_eq!(out.entries.len(), 1);
        let (key, info) = out.entries.iter().next().unwrap();
        assert_eq!(key.ifindex, vlan(10));
        assert_eq!(key.network.to_string(), "192.0.2.1/24");
        assert_eq!(info.broadcast, None);
        assert_eq!(out.stats.filtered, 1);
    }

    #[test]
    fn test_ipv6_flags_decoded() {
        let interfaces = BTreeMap::from([(7, vlan(10))]);
        let networks = BTreeMap::new();
        let ctx = DecodeContext {
            interfaces: &interfaces,
            ipv6_networks: &networks,
        };
        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        let flags = (IFA_F_TENTATIVE | IFA_F_DADFAILED) as u8;
        let out = decode_ipv6_addrs(&[testutil::addr(AF_INET6, 7, ip, 64, flags)], &ctx);
        let info = out.entries.values().next().unwrap();
        assert_eq!(info.os_ifindex, 7);
        assert_eq!(
            info.flags,
            Ipv6AddrFlags::TENTATIVE | Ipv6AddrFlags::DUPLICATED
        );
    }

    #[test]
    fn test_family_mismatch_filtered() {
        let interfaces = BTreeMap::from([(7, vlan(10))]);
        let networks = BTreeMap::new();
        let ctx = DecodeContext {
            interfaces: &interfaces,
            ipv6_networks: &networks,
        };
        let msg = testutil::addr(AF_INET6, 7, "2001:db8::1".parse().unwrap(), 64, 0);
        let out = decode_ipv4_addrs(&[msg], &ctx);
        assert!(out.entries.is_empty());
        assert_eq!(out.stats.filtered, 1);
    }

    #[test]
    fn test_prefix_too_long_is_malformed() {
        let interfaces = BTreeMap::from([(7, vlan(10))]);
        let networks = BTreeMap::new();
        let ctx = DecodeContext {
            interfaces: &interfaces,
            ipv6_networks: &networks,
        };
        let msg = testutil::addr(AF_INET, 7, "192.0.2.1".parse().unwrap(), 33, 0);
        let out = decode_ipv4_addrs(&[msg], &ctx);
        assert_eq!(out.stats.malformed, 1);
    }
}
