//! Neighbor API.

use crate::error::HwResult;
use crate::types::HwNeighbor;

pub trait NeighborApi {
    fn neighbor_add(&self, neighbor: &HwNeighbor) -> HwResult<()>;

    /// Removes the entry for `neighbor.ip` on `neighbor.vlan`; the MAC is
    /// not matched.
    fn neighbor_del(&self, neighbor: &HwNeighbor) -> HwResult<()>;
}
