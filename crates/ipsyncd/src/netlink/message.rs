//! Netlink message framing and the fixed rtnetlink family headers.

use super::attr::{rta_align, DecodeError, RTA_HDRLEN};
use super::consts::{NLMSG_DONE, NLMSG_ERROR};

pub const NLMSG_HDRLEN: usize = 16;

pub const fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

fn need(what: &'static str, buf: &[u8], len: usize) -> Result<(), DecodeError> {
    if buf.len() < len {
        return Err(DecodeError::Truncated {
            what,
            need: len,
            have: buf.len(),
        });
    }
    Ok(())
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn i32_at(buf: &[u8], at: usize) -> i32 {
    i32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// One netlink message with its header fields and owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetlinkMessage {
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
    pub payload: Vec<u8>,
}

impl NetlinkMessage {
    pub fn new(msg_type: u16, flags: u16, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            flags,
            seq: 0,
            pid: 0,
            payload,
        }
    }

    pub fn is_done(&self) -> bool {
        self.msg_type == NLMSG_DONE
    }

    pub fn is_error(&self) -> bool {
        self.msg_type == NLMSG_ERROR
    }

    /// For NLMSG_ERROR: the (negative errno or zero) code. Zero is an ACK.
    pub fn error_code(&self) -> Option<Result<i32, DecodeError>> {
        if !self.is_error() {
            return None;
        }
        Some(need("nlmsgerr", &self.payload, 4).map(|_| i32_at(&self.payload, 0)))
    }

    /// Wire encoding, padded to alignment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = NLMSG_HDRLEN + self.payload.len();
        let mut out = Vec::with_capacity(nlmsg_align(len));
        out.extend_from_slice(&(len as u32).to_ne_bytes());
        out.extend_from_slice(&self.msg_type.to_ne_bytes());
        out.extend_from_slice(&self.flags.to_ne_bytes());
        out.extend_from_slice(&self.seq.to_ne_bytes());
        out.extend_from_slice(&self.pid.to_ne_bytes());
        out.extend_from_slice(&self.payload);
        out.resize(nlmsg_align(len), 0);
        out
    }
}

/// Iterates the messages packed in one datagram.
///
/// A header that does not fit the remaining bytes ends the iteration with an
/// error; nothing after it can be framed.
#[derive(Debug, Clone)]
pub struct MessageIter<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> MessageIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, failed: false }
    }
}

impl Iterator for MessageIter<'_> {
    type Item = Result<NetlinkMessage, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        if let Err(e) = need("nlmsghdr", self.buf, NLMSG_HDRLEN) {
            self.failed = true;
            return Some(Err(e));
        }

        let len = u32_at(self.buf, 0) as usize;
        if len < NLMSG_HDRLEN || len > self.buf.len() {
            self.failed = true;
            return Some(Err(DecodeError::Truncated {
                what: "netlink message",
                need: len.max(NLMSG_HDRLEN),
                have: self.buf.len(),
            }));
        }

        let msg = NetlinkMessage {
            msg_type: u16_at(self.buf, 4),
            flags: u16_at(self.buf, 6),
            seq: u32_at(self.buf, 8),
            pid: u32_at(self.buf, 12),
            payload: self.buf[NLMSG_HDRLEN..len].to_vec(),
        };
        let advance = nlmsg_align(len).min(self.buf.len());
        self.buf = &self.buf[advance..];
        Some(Ok(msg))
    }
}

/// `struct ifinfomsg`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfInfoMsg {
    pub family: u8,
    pub link_type: u16,
    pub index: i32,
    pub flags: u32,
    pub change: u32,
}

impl IfInfoMsg {
    pub const LEN: usize = 16;

    /// Splits `payload` into the header and its attribute bytes.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        need("ifinfomsg", payload, Self::LEN)?;
        let hdr = Self {
            family: payload[0],
            link_type: u16_at(payload, 2),
            index: i32_at(payload, 4),
            flags: u32_at(payload, 8),
            change: u32_at(payload, 12),
        };
        Ok((hdr, &payload[Self::LEN..]))
    }

    pub fn emit(&self, out: &mut Vec<u8>) {
        out.push(self.family);
        out.push(0);
        out.extend_from_slice(&self.link_type.to_ne_bytes());
        out.extend_from_slice(&self.index.to_ne_bytes());
        out.extend_from_slice(&self.flags.to_ne_bytes());
        out.extend_from_slice(&self.change.to_ne_bytes());
    }
}

/// `struct ifaddrmsg`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfAddrMsg {
    pub family: u8,
    pub prefix_len: u8,
    pub flags: u8,
    pub scope: u8,
    pub index: u32,
}

impl IfAddrMsg {
    pub const LEN: usize = 8;

    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        need("ifaddrmsg", payload, Self::LEN)?;
        let hdr = Self {
            family: payload[0],
            prefix_len: payload[1],
            flags: payload[2],
            scope: payload[3],
            index: u32_at(payload, 4),
        };
        Ok((hdr, &payload[Self::LEN..]))
    }

    pub fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.family, self.prefix_len, self.flags, self.scope]);
        out.extend_from_slice(&self.index.to_ne_bytes());
    }
}

/// `struct rtmsg`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtMsg {
    pub family: u8,
    pub dst_len: u8,
    pub src_len: u8,
    pub tos: u8,
    pub table: u8,
    pub protocol: u8,
    pub scope: u8,
    pub route_type: u8,
    pub flags: u32,
}

impl RtMsg {
    pub const LEN: usize = 12;

    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        need("rtmsg", payload, Self::LEN)?;
        let hdr = Self {
            family: payload[0],
            dst_len: payload[1],
            src_len: payload[2],
            tos: payload[3],
            table: payload[4],
            protocol: payload[5],
            scope: payload[6],
            route_type: payload[7],
            flags: u32_at(payload, 8),
        };
        Ok((hdr, &payload[Self::LEN..]))
    }

    pub fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            self.family,
            self.dst_len,
            self.src_len,
            self.tos,
            self.table,
            self.protocol,
            self.scope,
            self.route_type,
        ]);
        out.extend_from_slice(&self.flags.to_ne_bytes());
    }
}

/// `struct ndmsg`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NdMsg {
    pub family: u8,
    pub index: i32,
    pub state: u16,
    pub flags: u8,
    pub ndm_type: u8,
}

impl NdMsg {
    pub const LEN: usize = 12;

    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        need("ndmsg", payload, Self::LEN)?;
        let hdr = Self {
            family: payload[0],
            index: i32_at(payload, 4),
            state: u16_at(payload, 8),
            flags: payload[10],
            ndm_type: payload[11],
        };
        Ok((hdr, &payload[Self::LEN..]))
    }

    pub fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.family, 0, 0, 0]);
        out.extend_from_slice(&self.index.to_ne_bytes());
        out.extend_from_slice(&self.state.to_ne_bytes());
        out.push(self.flags);
        out.push(self.ndm_type);
    }
}

/// `struct rtnexthop`, one element of RTA_MULTIPATH.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtNextHop {
    pub flags: u8,
    pub hops: u8,
    pub ifindex: i32,
}

impl RtNextHop {
    pub const LEN: usize = 8;

    /// Iterates `(next hop header, its attribute bytes)` over an
    /// RTA_MULTIPATH payload.
    pub fn iter(payload: &[u8]) -> NextHopIter<'_> {
        NextHopIter {
            buf: payload,
            failed: false,
        }
    }

    pub fn emit(&self, attrs: &[u8], out: &mut Vec<u8>) {
        let len = (Self::LEN + attrs.len()) as u16;
        out.extend_from_slice(&len.to_ne_bytes());
        out.push(self.flags);
        out.push(self.hops);
        out.extend_from_slice(&self.ifindex.to_ne_bytes());
        out.extend_from_slice(attrs);
        out.resize(out.len() + (rta_align(attrs.len()) - attrs.len()), 0);
    }
}

#[derive(Debug, Clone)]
pub struct NextHopIter<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for NextHopIter<'a> {
    type Item = Result<(RtNextHop, &'a [u8]), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        if let Err(e) = need("rtnexthop", self.buf, RtNextHop::LEN) {
            self.failed = true;
            return Some(Err(e));
        }
        let len = usize::from(u16_at(self.buf, 0));
        if len < RtNextHop::LEN || len > self.buf.len() {
            self.failed = true;
            return Some(Err(DecodeError::Truncated {
                what: "rtnexthop",
                need: len.max(RtNextHop::LEN),
                have: self.buf.len(),
            }));
        }
        let hop = RtNextHop {
            flags: self.buf[2],
            hops: self.buf[3],
            ifindex: i32_at(self.buf, 4),
        };
        let attrs = &self.buf[RtNextHop::LEN..len];
        self.buf = &self.buf[rta_align(len).min(self.buf.len())..];
        Some(Ok((hop, attrs)))
    }
}

/// Encoder for an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBuilder {
    msg_type: u16,
    flags: u16,
    body: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            msg_type,
            flags,
            body: Vec::with_capacity(64),
        }
    }

    pub fn msg_type(&self) -> u16 {
        self.msg_type
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Family header plus attributes, without the netlink header.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn ifinfo(mut self, hdr: IfInfoMsg) -> Self {
        hdr.emit(&mut self.body);
        self
    }

    pub fn ifaddr(mut self, hdr: IfAddrMsg) -> Self {
        hdr.emit(&mut self.body);
        self
    }

    pub fn rtmsg(mut self, hdr: RtMsg) -> Self {
        hdr.emit(&mut self.body);
        self
    }

    pub fn ndmsg(mut self, hdr: NdMsg) -> Self {
        hdr.emit(&mut self.body);
        self
    }

    pub fn attr(mut self, kind: u16, payload: &[u8]) -> Self {
        push_attr(&mut self.body, kind, payload);
        self
    }

    pub fn attr_u32(self, kind: u16, value: u32) -> Self {
        self.attr(kind, &value.to_ne_bytes())
    }

    /// NUL-terminated string attribute.
    pub fn attr_str(self, kind: u16, value: &str) -> Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.attr(kind, &bytes)
    }

    /// Attribute whose payload is itself a run of attributes.
    pub fn nested(mut self, kind: u16, build: impl FnOnce(NestedBuilder) -> NestedBuilder) -> Self {
        let inner = build(NestedBuilder::default());
        push_attr(&mut self.body, kind, &inner.buf);
        self
    }

    /// Wire bytes with the netlink header filled in.
    pub fn finish(&self, seq: u32, pid: u32) -> Vec<u8> {
        NetlinkMessage {
            msg_type: self.msg_type,
            flags: self.flags,
            seq,
            pid,
            payload: self.body.clone(),
        }
        .to_bytes()
    }
}

/// Attribute run under construction for [`MessageBuilder::nested`].
#[derive(Debug, Default)]
pub struct NestedBuilder {
    buf: Vec<u8>,
}

impl NestedBuilder {
    pub fn attr(mut self, kind: u16, payload: &[u8]) -> Self {
        push_attr(&mut self.buf, kind, payload);
        self
    }

    pub fn attr_str(self, kind: u16, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.attr(kind, &bytes)
    }
}

/// Appends one attribute, padded.
pub fn push_attr(out: &mut Vec<u8>, kind: u16, payload: &[u8]) {
    let len = (RTA_HDRLEN + payload.len()) as u16;
    out.extend_from_slice(&len.to_ne_bytes());
    out.extend_from_slice(&kind.to_ne_bytes());
    out.extend_from_slice(payload);
    out.resize(out.len() + (rta_align(payload.len()) - payload.len()), 0);
}
