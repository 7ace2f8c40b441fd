//! Route API.

use crate::error::{BulkError, HwResult};
use crate::types::HwRoute;

/// Unicast routes.
///
/// The bulk calls may stop short: `Ok(n)` with `n < routes.len()` means the
/// first `n` entries were handled and the caller should continue with the
/// rest. `Err(BulkError)` means the call failed after `processed` entries.
pub trait RouteApi {
    fn route_add(&self, route: &HwRoute) -> HwResult<()>;

    fn route_del(&self, route: &HwRoute) -> HwResult<()>;

    fn route_bulk_add(&self, routes: &[HwRoute]) -> Result<usize, BulkError>;

    fn route_bulk_del(&self, routes: &[HwRoute]) -> Result<usize, BulkError>;
}
