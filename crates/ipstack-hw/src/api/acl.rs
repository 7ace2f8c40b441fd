//! ACL trap API.
//!
//! Only the rule shape needed for IPv4 multicast is exposed: match VLAN and
//! destination IP, copy to CPU.

use crate::error::HwResult;
use crate::types::{AceId, IpTrapRule};
use ipstack_types::VlanId;
use std::net::Ipv4Addr;

pub trait AclApi {
    /// Installs a trap for IPv4 packets to `dip` on `vlan`.
    fn ip_trap_add(&self, vlan: VlanId, dip: Ipv4Addr) -> HwResult<AceId>;

    /// All trap rules currently installed, in installation order.
    fn ip_trap_list(&self) -> HwResult<Vec<IpTrapRule>>;

    fn ip_trap_del(&self, id: AceId) -> HwResult<()>;
}
