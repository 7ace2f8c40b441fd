//! Route attribute (rtattr) TLV parsing.
//!
//! An attribute is a 4-byte header (`u16` length including the header, `u16`
//! type) followed by the payload, padded to a 4-byte boundary. The cursor
//! never reads past its slice: a header that claims more bytes than remain, or
//! leftover bytes too short to form a header, is a [`DecodeError`].

use ipstack_types::MacAddress;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

use super::consts::{AF_INET, AF_INET6};

pub const RTA_ALIGNTO: usize = 4;
pub const RTA_HDRLEN: usize = 4;

/// Mask clearing NLA_F_NESTED and NLA_F_NET_BYTEORDER from the type field.
const NLA_TYPE_MASK: u16 = 0x3fff;

/// Rounds `len` up to the attribute alignment.
pub const fn rta_align(len: usize) -> usize {
    (len + RTA_ALIGNTO - 1) & !(RTA_ALIGNTO - 1)
}

/// Malformed message or attribute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{what} truncated: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("attribute {kind} has invalid length {len}")]
    BadAttrLength { kind: u16, len: usize },

    #[error("{0} trailing bytes after last attribute")]
    TrailingBytes(usize),

    #[error("attribute {kind}: expected {expected}, got {len} bytes")]
    BadPayload {
        kind: u16,
        expected: &'static str,
        len: usize,
    },

    #[error("invalid interface index {0}")]
    BadIndex(i32),

    #[error("invalid prefix length {0}")]
    BadPrefixLength(u8),
}

/// One attribute borrowed from a message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr<'a> {
    pub kind: u16,
    pub payload: &'a [u8],
}

impl<'a> Attr<'a> {
    fn bad(&self, expected: &'static str) -> DecodeError {
        DecodeError::BadPayload {
            kind: self.kind,
            expected,
            len: self.payload.len(),
        }
    }

    pub fn as_u8(&self) -> Result<u8, DecodeError> {
        match self.payload {
            [b, ..] => Ok(*b),
            [] => Err(self.bad("u8")),
        }
    }

    /// Host byte order, as the kernel sends it.
    pub fn as_u32(&self) -> Result<u32, DecodeError> {
        self.payload
            .get(..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_ne_bytes)
            .ok_or_else(|| self.bad("u32"))
    }

    /// NUL-terminated string; the terminator is optional.
    pub fn as_str(&self) -> Result<&'a str, DecodeError> {
        let bytes = match self.payload.iter().position(|&b| b == 0) {
            Some(end) => &self.payload[..end],
            None => self.payload,
        };
        std::str::from_utf8(bytes).map_err(|_| self.bad("utf-8 string"))
    }

    pub fn as_ipv4(&self) -> Result<Ipv4Addr, DecodeError> {
        <[u8; 4]>::try_from(self.payload)
            .map(Ipv4Addr::from)
            .map_err(|_| self.bad("IPv4 address"))
    }

    pub fn as_ipv6(&self) -> Result<Ipv6Addr, DecodeError> {
        <[u8; 16]>::try_from(self.payload)
            .map(Ipv6Addr::from)
            .map_err(|_| self.bad("IPv6 address"))
    }

    /// Address of the given family; the payload length must match exactly.
    pub fn as_ip(&self, family: u8) -> Result<IpAddr, DecodeError> {
        match family {
            AF_INET => self.as_ipv4().map(IpAddr::V4),
            AF_INET6 => self.as_ipv6().map(IpAddr::V6),
            _ => Err(self.bad("address of a known family")),
        }
    }

    pub fn as_mac(&self) -> Result<MacAddress, DecodeError> {
        MacAddress::from_slice(self.payload).ok_or_else(|| self.bad("MAC address"))
    }

    /// Iterates the attributes nested inside this one.
    pub fn nested(&self) -> AttrCursor<'a> {
        AttrCursor::new(self.payload)
    }
}

/// Bounds-checked iterator over a run of attributes.
///
/// Yields `Err` once on the first malformed attribute and then stops.
#[derive(Debug, Clone)]
pub struct AttrCursor<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> AttrCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, failed: false }
    }

    /// Collects every attribute, failing on the first malformed one.
    pub fn collect_set(self) -> Result<AttrSet<'a>, DecodeError> {
        let attrs = self.collect::<Result<Vec<_>, _>>()?;
        Ok(AttrSet { attrs })
    }
}

impl<'a> Iterator for AttrCursor<'a> {
    type Item = Result<Attr<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        if self.buf.len() < RTA_HDRLEN {
            self.failed = true;
            return Some(Err(DecodeError::TrailingBytes(self.buf.len())));
        }

        let len = usize::from(u16::from_ne_bytes([self.buf[0], self.buf[1]]));
        let kind = u16::from_ne_bytes([self.buf[2], self.buf[3]]) & NLA_TYPE_MASK;
        if len < RTA_HDRLEN || len > self.buf.len() {
            self.failed = true;
            return Some(Err(DecodeError::BadAttrLength { kind, len }));
        }

        let payload = &self.buf[RTA_HDRLEN..len];
        let advance = rta_align(len).min(self.buf.len());
        self.buf = &self.buf[advance..];
        Some(Ok(Attr { kind, payload }))
    }
}

/// Attributes of one message, gathered before interpretation so that the
/// order in which the kernel emitted them does not matter.
#[derive(Debug, Clone, Default)]
pub struct AttrSet<'a> {
    attrs: Vec<Attr<'a>>,
}

impl<'a> AttrSet<'a> {
    /// Last attribute of `kind`, if any.
    pub fn get(&self, kind: u16) -> Option<Attr<'a>> {
        self.attrs.iter().rev().find(|a| a.kind == kind).copied()
    }

    pub fn contains(&self, kind: u16) -> bool {
        self.attrs.iter().any(|a| a.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}
