//! Hardware programming API for the switch IP stack.
//!
//! The synchronization engine never talks to the switch driver directly; it
//! goes through the traits in [`api`], which describe exactly the operations
//! the IP stack needs:
//!
//! - router legs per VLAN interface
//! - CPU MAC subscriptions and IPv4 multicast trap rules
//! - single and bulk route add/delete
//! - neighbor entries
//!
//! [`soft::SoftSwitch`] is an in-memory implementation used by the daemon
//! when no chip driver is attached, and by tests.
//!
//! # Example
//!
//! ```
//! use ipstack_hw::{RouterLegApi, SoftSwitch, SoftSwitchConfig};
//! use ipstack_types::VlanId;
//!
//! let sw = SoftSwitch::new(SoftSwitchConfig::default());
//! sw.rleg_add(VlanId::new(10).unwrap()).unwrap();
//! assert_eq!(sw.rlegs().len(), 1);
//! ```

pub mod api;
pub mod error;
pub mod soft;
pub mod types;

pub use api::{AclApi, MacTableApi, NeighborApi, RouteApi, RouterLegApi, SwitchApi};
pub use error::{BulkError, HwError, HwResult};
pub use soft::{Fault, HwOp, SoftSwitch, SoftSwitchConfig};
pub use types::{AceId, CpuQueue, HwNeighbor, HwRoute, IpTrapRule};
