//! rtnetlink codec and sockets.
//!
//! - [`consts`]: message types, flags and attribute ids
//! - [`attr`]: bounds-checked attribute cursor
//! - [`message`]: message framing, family headers, request builder
//! - [`transport`]: request/response round trips
//! - [`monitor_socket`]: multicast notification socket

pub mod attr;
pub mod consts;
pub mod message;
pub mod monitor_socket;
pub mod transport;

pub use attr::{Attr, AttrCursor, AttrSet, DecodeError};
pub use message::{MessageBuilder, MessageIter, NetlinkMessage};
pub use monitor_socket::{EventSource, KernelEventSource};
pub use transport::{KernelTransport, NetlinkTransport};

/// Sets an integer socket option; returns false on failure.
#[cfg(target_os = "linux")]
pub(crate) fn setsockopt_int(
    fd: std::os::fd::RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: usize,
) -> bool {
    let value = libc::c_int::try_from(value).unwrap_or(libc::c_int::MAX);
    // SAFETY: `value` outlives the call and the length matches its type.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    ret == 0
}

/// Sets SO_RCVTIMEO; a zero duration means no timeout.
#[cfg(target_os = "linux")]
pub(crate) fn set_recv_timeout(fd: std::os::fd::RawFd, timeout: std::time::Duration) -> bool {
    let tv = libc::timeval {
        tv_sec: libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_usec: libc::suseconds_t::from(timeout.subsec_micros() as i32),
    };
    // SAFETY: `tv` outlives the call and the length matches its type.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    ret == 0
}
