//! Request/response transport to the kernel.
//!
//! Every request opens a fresh NETLINK_ROUTE socket, sends one message and
//! reads until the reply is complete: `NLMSG_DONE` for a dump, the
//! `NLMSG_ERROR` acknowledgement for a mutation. There is no receive timeout;
//! a kernel that never answers stalls the caller.

use super::message::{MessageBuilder, NetlinkMessage};
use crate::error::Result;

/// Anything that can carry a netlink request to the kernel and return its
/// reply.
pub trait NetlinkTransport: Send + Sync {
    /// Sends `request` and returns the reply's data messages, excluding the
    /// terminating `NLMSG_DONE` and the acknowledgement.
    ///
    /// # Errors
    ///
    /// `IpsyncError::Kernel` when the kernel answers with a negative error
    /// code, `IpsyncError::Netlink` on socket failures.
    fn request(&self, request: &MessageBuilder) -> Result<Vec<NetlinkMessage>>;
}

#[cfg(target_os = "linux")]
mod linux {
    use super::NetlinkTransport;
    use crate::config::NetlinkConfig;
    use crate::error::{IpsyncError, Result};
    use crate::netlink::consts::{
        NLM_F_ACK, NLM_F_DUMP, NLM_F_DUMP_INTR, NLM_F_MULTI, NLMSG_NOOP,
    };
    use crate::netlink::message::{MessageBuilder, MessageIter, NetlinkMessage};
    use crate::netlink::setsockopt_int;
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use nix::errno::Errno;
    use std::os::fd::AsRawFd;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing::{debug, instrument, trace, warn};

    /// Smallest receive buffer; a dump datagram can be up to a page or more.
    const MIN_RECV_BUFFER: usize = 32 * 1024;

    enum Outcome {
        Complete(Vec<NetlinkMessage>),
        Interrupted,
    }

    /// Kernel transport over real netlink sockets.
    #[derive(Debug)]
    pub struct KernelTransport {
        sndbuf: usize,
        rcvbuf: usize,
        retries: u32,
        seq: AtomicU32,
    }

    impl KernelTransport {
        pub fn new(config: &NetlinkConfig) -> Self {
            Self {
                sndbuf: config.request_sndbuf,
                rcvbuf: config.request_rcvbuf,
                retries: config.recv_retries,
                seq: AtomicU32::new(1),
            }
        }

        fn open(&self) -> Result<Socket> {
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| IpsyncError::Netlink(format!("Failed to create socket: {}", e)))?;
            socket
                .bind_auto()
                .map_err(|e| IpsyncError::Netlink(format!("Failed to bind socket: {}", e)))?;
            socket
                .connect(&SocketAddr::new(0, 0))
                .map_err(|e| IpsyncError::Netlink(format!("Failed to connect socket: {}", e)))?;

            let fd = socket.as_raw_fd();
            if !setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, self.sndbuf) {
                warn!(size = self.sndbuf, "Failed to set SO_SNDBUF");
            }
            if !setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, self.rcvbuf) {
                warn!(size = self.rcvbuf, "Failed to set SO_RCVBUF");
            }
            Ok(socket)
        }

        fn exchange(&self, request: &MessageBuilder) -> Result<Outcome> {
            let socket = self.open()?;
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let bytes = request.finish(seq, 0);
            socket
                .send(&bytes, 0)
                .map_err(|e| IpsyncError::Netlink(format!("Failed to send request: {}", e)))?;

            let is_dump = request.flags() & NLM_F_DUMP == NLM_F_DUMP;
            let wants_ack = request.flags() & NLM_F_ACK != 0;
            let mut replies = Vec::new();
            let mut interrupted = false;
            let mut buffer = Vec::with_capacity(self.rcvbuf.max(MIN_RECV_BUFFER));

            loop {
                buffer.clear();
                let len = socket
                    .recv(&mut buffer, 0)
                    .map_err(|e| IpsyncError::Netlink(format!("Failed to receive: {}", e)))?;
                if len == 0 {
                    return Err(IpsyncError::Netlink("Socket closed by kernel".into()));
                }

                for msg in MessageIter::new(&buffer[..len]) {
                    let msg = msg?;
                    if msg.seq != seq {
                        trace!(seq = msg.seq, expected = seq, "Skipping reply to other request");
                        continue;
                    }
                    if msg.flags & NLM_F_DUMP_INTR != 0 {
                        interrupted = true;
                    }
                    if msg.is_done() {
                        return Ok(finish(replies, interrupted));
                    }
                    if let Some(code) = msg.error_code() {
                        let code = code?;
                        if code < 0 {
                            return Err(IpsyncError::Kernel(Errno::from_raw(-code)));
                        }
                        return Ok(finish(replies, interrupted));
                    }
                    if msg.msg_type == NLMSG_NOOP {
                        continue;
                    }
                    let multi = msg.flags & NLM_F_MULTI != 0;
                    replies.push(msg);
                    if !is_dump && !wants_ack && !multi {
                        return Ok(finish(replies, interrupted));
                    }
                }
            }
        }
    }

    fn finish(replies: Vec<NetlinkMessage>, interrupted: bool) -> Outcome {
        if interrupted {
            Outcome::Interrupted
        } else {
            Outcome::Complete(replies)
        }
    }

    impl NetlinkTransport for KernelTransport {
        #[instrument(skip(self, request), fields(msg_type = request.msg_type()))]
        fn request(&self, request: &MessageBuilder) -> Result<Vec<NetlinkMessage>> {
            let mut attempt = 0;
            loop {
                match self.exchange(request)? {
                    Outcome::Complete(replies) => {
                        debug!(count = replies.len(), "Request complete");
                        return Ok(replies);
                    }
                    Outcome::Interrupted if attempt < self.retries => {
                        attempt += 1;
                        debug!(attempt, "Dump interrupted, retrying");
                    }
                    Outcome::Interrupted => {
                        return Err(IpsyncError::Netlink(format!(
                            "Dump interrupted {} times",
                            attempt + 1
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::KernelTransport;

/// Placeholder for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use super::NetlinkTransport;
    use crate::config::NetlinkConfig;
    use crate::error::{IpsyncError, Result};
    use crate::netlink::message::{MessageBuilder, NetlinkMessage};

    #[derive(Debug)]
    pub struct KernelTransport;

    impl KernelTransport {
        pub fn new(_config: &NetlinkConfig) -> Self {
            Self
        }
    }

    impl NetlinkTransport for KernelTransport {
        fn request(&self, _request: &MessageBuilder) -> Result<Vec<NetlinkMessage>> {
            Err(IpsyncError::Netlink("netlink is only available on Linux".into()))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::KernelTransport;
