//! Hardware programming API.
//!
//! The switch driver is consumed through one trait per hardware area:
//!
//! - [`rleg`]: router legs (the routed side of a VLAN interface)
//! - [`mac`]: MAC table entries that steer frames to the CPU
//! - [`acl`]: CPU trap rules for IPv4 multicast groups
//! - [`route`]: unicast routes, single and bulk
//! - [`neighbor`]: ARP / ND entries
//!
//! [`SwitchApi`] bundles all of them so callers can hold a single
//! `Arc<dyn SwitchApi>`.

pub mod acl;
pub mod mac;
pub mod neighbor;
pub mod rleg;
pub mod route;

pub use acl::AclApi;
pub use mac::MacTableApi;
pub use neighbor::NeighborApi;
pub use rleg::RouterLegApi;
pub use route::RouteApi;

/// Every hardware area the IP stack programs.
pub trait SwitchApi: RouterLegApi + MacTableApi + AclApi + RouteApi + NeighborApi + Send + Sync {}

impl<T> SwitchApi for T where T: RouterLegApi + MacTableApi + AclApi + RouteApi + NeighborApi + Send + Sync {}
