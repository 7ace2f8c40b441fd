//! Multicast notification socket.

use crate::error::Result;

/// Source of kernel notification datagrams.
///
/// `open` is called at start and again after every receive error, so an
/// implementation must be able to drop its old socket and start over.
pub trait EventSource: Send {
    fn open(&mut self) -> Result<()>;

    /// Receives one datagram.
    ///
    /// With `wait` the call blocks up to the source's wake-up interval;
    /// without it, it returns at once. `Ok(None)` means nothing arrived.
    /// Socket errors and end-of-file are `Err`.
    fn recv(&mut self, wait: bool) -> Result<Option<&[u8]>>;

    fn close(&mut self);
}

#[cfg(target_os = "linux")]
mod linux {
    use super::EventSource;
    use crate::config::NetlinkConfig;
    use crate::error::{IpsyncError, Result};
    use crate::netlink::consts::MONITOR_GROUPS;
    use crate::netlink::{set_recv_timeout, setsockopt_int};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use std::io::ErrorKind;
    use std::os::fd::AsRawFd;
    use std::time::Duration;
    use tracing::{debug, instrument, warn};

    const DATAGRAM_BUFFER_SIZE: usize = 64 * 1024;

    /// Monitor socket bound to every rtnetlink group the engine follows.
    #[derive(Debug)]
    pub struct KernelEventSource {
        socket: Option<Socket>,
        buffer: Vec<u8>,
        rcvbuf: usize,
        wakeup: Duration,
    }

    impl KernelEventSource {
        pub fn new(config: &NetlinkConfig) -> Self {
            Self {
                socket: None,
                buffer: Vec::with_capacity(DATAGRAM_BUFFER_SIZE),
                rcvbuf: config.monitor_rcvbuf,
                wakeup: config.wakeup_interval(),
            }
        }

        /// Buffer sizing and the wake-up timeout. NETLINK_NO_ENOBUFS stays off:
        /// an overrun has to surface as an error so the loop resyncs.
        fn tune_socket(&self, socket: &Socket) {
            let fd = socket.as_raw_fd();
            if setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, self.rcvbuf) {
                debug!(size = self.rcvbuf, "Set socket receive buffer");
            } else {
                warn!("Failed to set SO_RCVBUF, using default buffer size");
            }
            if !set_recv_timeout(fd, self.wakeup) {
                warn!("Failed to set SO_RCVTIMEO, receive blocks until an event arrives");
            }
        }
    }

    impl EventSource for KernelEventSource {
        #[instrument(skip(self))]
        fn open(&mut self) -> Result<()> {
            self.close();
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| IpsyncError::Netlink(format!("Failed to create socket: {}", e)))?;
            socket
                .bind(&SocketAddr::new(0, MONITOR_GROUPS))
                .map_err(|e| IpsyncError::Netlink(format!("Failed to bind socket: {}", e)))?;
            self.tune_socket(&socket);
            debug!(groups = MONITOR_GROUPS, "Monitor socket bound");
            self.socket = Some(socket);
            Ok(())
        }

        fn recv(&mut self, wait: bool) -> Result<Option<&[u8]>> {
            let socket = self
                .socket
                .as_ref()
                .ok_or_else(|| IpsyncError::Netlink("Monitor socket not open".into()))?;
            let flags = if wait { 0 } else { libc::MSG_DONTWAIT };

            self.buffer.clear();
            match socket.recv(&mut self.buffer, flags) {
                Ok(0) => Err(IpsyncError::Netlink("Monitor socket closed".into())),
                Ok(len) => Ok(Some(&self.buffer[..len])),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    Ok(None)
                }
                Err(e) => Err(IpsyncError::Netlink(format!("Failed to receive: {}", e))),
            }
        }

        fn close(&mut self) {
            if self.socket.take().is_some() {
                debug!("Monitor socket closed");
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::KernelEventSource;

/// Placeholder for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use super::EventSource;
    use crate::config::NetlinkConfig;
    use crate::error::{IpsyncError, Result};

    #[derive(Debug)]
    pub struct KernelEventSource;

    impl KernelEventSource {
        pub fn new(_config: &NetlinkConfig) -> Self {
            Self
        }
    }

    impl EventSource for KernelEventSource {
        fn open(&mut self) -> Result<()> {
            Err(IpsyncError::Netlink("netlink is only available on Linux".into()))
        }

        fn recv(&mut self, _wait: bool) -> Result<Option<&[u8]>> {
            Ok(None)
        }

        fn close(&mut self) {}
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::KernelEventSource;
