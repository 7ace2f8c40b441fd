//! MAC table API.

use crate::error::HwResult;
use ipstack_types::{MacAddress, VlanId};

/// Static MAC table entries forwarding to the CPU.
pub trait MacTableApi {
    /// Installs `(vlan, mac)` as a CPU-destined entry.
    fn mac_subscribe(&self, vlan: VlanId, mac: MacAddress) -> HwResult<()>;

    fn mac_unsubscribe(&self, vlan: VlanId, mac: MacAddress) -> HwResult<()>;
}
