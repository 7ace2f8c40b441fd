//! Router leg API.

use crate::error::HwResult;
use ipstack_types::VlanId;

/// Router legs: one per routed VLAN interface.
pub trait RouterLegApi {
    /// Creates the router leg for `vlan`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the leg is present, `TableFull` when no more legs
    /// can be created.
    fn rleg_add(&self, vlan: VlanId) -> HwResult<()>;

    /// Removes the router leg for `vlan`. `NotFound` if there is none.
    fn rleg_del(&self, vlan: VlanId) -> HwResult<()>;

    /// Enables or disables IPv4 unicast routing on an existing leg.
    fn rleg_ipv4_unicast_set(&self, vlan: VlanId, enable: bool) -> HwResult<()>;

    /// Global routing switch.
    fn routing_enable(&self, enable: bool) -> HwResult<()>;
}
