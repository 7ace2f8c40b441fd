//! Bridge FDB dump decoder.
//!
//! Entries the kernel added to its own bridge (NTF_SELF) on one of our VLAN
//! interfaces are the dynamic MAC subscriptions the chip must track.

use super::{DecodeContext, Decoded, Domain};
use crate::netlink::consts::*;
use crate::netlink::message::NdMsg;
use crate::netlink::{AttrCursor, DecodeError, NetlinkMessage};
use crate::types::VidMac;

pub fn decode_mac_entry(
    msg: &NetlinkMessage,
    ctx: &DecodeContext<'_>,
) -> Result<Option<VidMac>, DecodeError> {
    if msg.msg_type != RTM_NEWNEIGH {
        return Ok(None);
    }
    let (hdr, attrs) = NdMsg::parse(&msg.payload)?;
    if hdr.family != AF_BRIDGE || hdr.flags & NTF_SELF == 0 {
        return Ok(None);
    }
    let Some(vlan) = ctx.ifindex_i32(hdr.index).and_then(|i| i.vlan()) else {
        return Ok(None);
    };
    let attrs = AttrCursor::new(attrs).collect_set()?;
    let Some(lladdr) = attrs.get(NDA_LLADDR) else {
        return Ok(None);
    };
    Ok(Some(VidMac {
        vlan,
        mac: lladdr.as_mac()?,
    }))
}

pub fn decode_mac_list(msgs: &[NetlinkMessage], ctx: &DecodeContext<'_>) -> Decoded<VidMac, ()> {
    let mut out = Decoded::default();
    for msg in msgs {
        match decode_mac_entry(msg, ctx) {
            Ok(Some(entry)) => out.accept(entry, ()),
            Ok(None) => out.filter(),
            Err(e) => out.malformed(Domain::MacList, &e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil;
    use crate::types::IfIndex;
    use ipstack_types::{MacAddress, VlanId};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn test_self_entries_on_vlans_only() {
        let vid = VlanId::new(10).unwrap();
        let interfaces = BTreeMap::from([(7, IfIndex::Vlan(vid)), (8, IfIndex::Cpu(1))]);
        let networks = BTreeMap::new();
        let ctx = DecodeContext {
            interfaces: &interfaces,
            ipv6_networks: &networks,
        };
        let mac: MacAddress = "01:00:5e:00:00:05".parse().unwrap();
        let msgs = vec![
            testutil::neigh(AF_BRIDGE, 7, None, Some(mac), 0, NTF_SELF),
            testutil::neigh(AF_BRIDGE, 7, None, Some(MacAddress::BROADCAST), 0, 0),
            testutil::neigh(AF_BRIDGE, 8, None, Some(mac), 0, NTF_SELF),
            testutil::neigh(AF_INET, 7, None, Some(mac), 0, NTF_SELF),
        ];
        let out = decode_mac_list(&msgs, &ctx);
        assert_eq!(
            out.entries.keys().copied().collect::<Vec<_>>(),
            vec![VidMac { vlan: vid, mac }]
        );
        assert_eq!(out.stats.filtered, 3);
    }
}
