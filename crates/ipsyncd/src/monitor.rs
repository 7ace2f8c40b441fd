//! Kernel notification loop.
//!
//! The loop never applies a notification directly. Each datagram only marks
//! the domains it touches; once a burst has been drained the marked domains
//! are re-polled in full. A socket error loses notifications, so after every
//! reopen all domains are re-polled.

use crate::config::NetlinkConfig;
use crate::engine::SyncEngine;
use crate::error::{IpsyncError, Result};
use crate::netlink::consts::*;
use crate::netlink::{EventSource, MessageIter};
use crate::types::PollFlags;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Marks in `flags` the domains the notifications in `datagram` touch.
///
/// Framing errors and NLMSG_ERROR are `Err`: the socket can no longer be
/// trusted to have delivered everything.
pub fn classify_datagram(datagram: &[u8], flags: &mut PollFlags) -> Result<()> {
    for msg in MessageIter::new(datagram) {
        let msg = msg?;
        if msg.is_error() {
            let code = msg.error_code().and_then(|c| c.ok()).unwrap_or(0);
            return Err(IpsyncError::Netlink(format!(
                "error notification on monitor socket (code {})",
                code
            )));
        }
        // Every family header starts with the family byte.
        let Some(&family) = msg.payload.first() else {
            trace!(msg_type = msg.msg_type, "Notification without family header");
            continue;
        };
        let flag = match msg.msg_type {
            RTM_NEWLINK | RTM_DELLINK => PollFlags::LINK,
            RTM_NEWADDR | RTM_DELADDR => match family {
                AF_INET => PollFlags::IPV4_ADDR,
                AF_INET6 => PollFlags::IPV6_ADDR,
                _ => continue,
            },
            RTM_NEWROUTE | RTM_DELROUTE => match family {
                AF_INET => PollFlags::IPV4_ROUTE,
                AF_INET6 => PollFlags::IPV6_ROUTE,
                _ => continue,
            },
            RTM_NEWNEIGH | RTM_DELNEIGH => match family {
                AF_INET => PollFlags::IPV4_NEIGHBOR,
                AF_INET6 => PollFlags::IPV6_NEIGHBOR,
                _ => PollFlags::MAC_LIST,
            },
            _ => continue,
        };
        *flags |= flag;
    }
    Ok(())
}

/// Owns the monitor socket and drives the engine from it.
pub struct MonitorLoop<S: EventSource> {
    source: S,
    engine: Arc<SyncEngine>,
    burst_limit: usize,
    retry_delay: Duration,
    /// Domains whose last poll failed; retried with the next batch.
    pending: PollFlags,
}

impl<S: EventSource> MonitorLoop<S> {
    pub fn new(source: S, engine: Arc<SyncEngine>, config: &NetlinkConfig) -> Self {
        Self {
            source,
            engine,
            burst_limit: config.burst_limit.max(1),
            retry_delay: config.wakeup_interval(),
            pending: PollFlags::empty(),
        }
    }

    /// Runs until `shutdown` is set. Socket failures are never fatal.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(burst_limit = self.burst_limit, "Monitor loop started");
        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.source.open() {
                error!(error = %e, "Failed to open monitor socket");
                std::thread::sleep(self.retry_delay);
                continue;
            }
            self.resync();
            if let Err(e) = self.serve(shutdown) {
                warn!(error = %e, "Monitor socket failed, reopening");
                self.engine.diagnostics.lock().socket_resets += 1;
            }
            self.source.close();
        }
        info!("Monitor loop stopped");
    }

    fn resync(&mut self) {
        match self.engine.full_resync() {
            Ok(()) => self.pending = PollFlags::empty(),
            Err(e) => {
                warn!(error = %e, "Full resync incomplete");
                self.pending = PollFlags::all();
            }
        }
    }

    /// Processes batches until a socket error or shutdown.
    fn serve(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            let flags = self.next_batch()?;
            if flags.is_empty() {
                continue;
            }
            debug!(?flags, "Polling");
            if let Err(e) = self.engine.poll(flags) {
                warn!(error = %e, "Poll incomplete, retrying with next batch");
                self.pending = flags;
            }
        }
        Ok(())
    }

    /// Waits for one datagram, then drains whatever else is queued, up to
    /// the burst limit, and returns the union of their domains plus any
    /// domains still pending from a failed poll.
    pub fn next_batch(&mut self) -> Result<PollFlags> {
        let mut flags = std::mem::take(&mut self.pending);
        match self.source.recv(true)? {
            Some(datagram) => classify_datagram(datagram, &mut flags)?,
            None => return Ok(flags),
        }
        let mut count = 1;
        while count < self.burst_limit {
            match self.source.recv(false)? {
                Some(datagram) => classify_datagram(datagram, &mut flags)?,
                None => break,
            }
            count += 1;
        }
        trace!(count, "Burst drained");
        Ok(flags)
    }
}
