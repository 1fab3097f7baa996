use std::mem::size_of;

use crate::packet::CodecError;

/// Types that can be parsed out of the body of a datagram (everything after
/// the opcode).
pub trait FromBytes<'a>: Sized {
    fn from_bytes(bytes: &'a [u8]) -> Result<Self, CodecError>;
}

/// Types that can append their wire representation to a buffer.
pub trait IntoBytes {
    fn write_bytes(&self, buf: &mut Vec<u8>);
}

pub trait FirstNul {
    fn first_nul_idx(&self) -> Option<usize>;
}

impl FirstNul for [u8] {
    fn first_nul_idx(&self) -> Option<usize> {
        self.iter().position(|b| *b == 0)
    }
}

/// A forward-only view over a received datagram.
pub struct Bytes<'a>(&'a [u8]);

impl<'a> Bytes<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    /// Reads a big-endian `u16`, or `None` if fewer than two bytes remain.
    pub fn u16(&mut self) -> Option<u16> {
        if self.0.len() < size_of::<u16>() {
            return None;
        }

        let (head, tail) = self.0.split_at(size_of::<u16>());
        self.0 = tail;

        Some(u16::from_be_bytes([head[0], head[1]]))
    }

    /// Reads up to (and consumes) the next NUL byte. The NUL is not part of
    /// the returned slice.
    pub fn until_nul(&mut self) -> Option<&'a [u8]> {
        let nul = self.0.first_nul_idx()?;
        let (head, tail) = self.0.split_at(nul);
        self.0 = &tail[1..];

        Some(head)
    }

    /// Like `until_nul`, but the terminator may be missing at the very end
    /// of the datagram.
    pub fn until_nul_or_end(&mut self) -> &'a [u8] {
        match self.until_nul() {
            Some(s) => s,
            None => self.rest(),
        }
    }

    /// Consumes everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.0;
        self.0 = &[];
        rest
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn put_u16(buf: &mut Vec<u8>, val: u16) {
    buf.extend_from_slice(&val.to_be_bytes());
}
