//! IP stack synchronization daemon.
//!
//! Mirrors the kernel's view of switch interfaces, addresses, routes,
//! neighbors and multicast MAC memberships into snapshot tables, and
//! programs the differences into switch hardware.
//!
//! # Architecture
//!
//! ```text
//!  kernel notifications                      kernel dumps
//!          │                                      ▲
//!          ▼                                      │
//!   ┌─────────────┐  domain flags  ┌──────────────┴──┐   diffs   ┌────────────────┐
//!   │ MonitorLoop │───────────────▶│   SyncEngine    │──────────▶│ ChipProgrammer │──▶ SwitchApi
//!   └─────────────┘                │ (snapshot tables)│           └────────────────┘
//!                                  └────────┬────────┘
//!                                           │
//!                                           ▼
//!                                   status / observers
//! ```
//!
//! Notifications are only hints: the monitor loop records which domains
//! they touch, and the engine re-reads each touched domain in full. The
//! tables therefore always hold a complete kernel dump, never a
//! half-applied event stream.

pub mod chip;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod netlink;
pub mod requests;
pub mod status;
pub mod table;
pub mod types;

pub use chip::ChipProgrammer;
pub use config::IpsyncConfig;
pub use engine::SyncEngine;
pub use error::{IpsyncError, Result};
pub use monitor::{MonitorLoop, classify_datagram};
pub use status::{GlobalNotification, LinkObserver, StatusSnapshot};
pub use table::{Change, SnapshotTable};
pub use types::*;
