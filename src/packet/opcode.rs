//! Describes the opcodes defined by RFC 1350.

use std::fmt;

use crate::bytes::Bytes;

/// An integer identifier for the type of TFTP packet. It is always the first
/// two bytes of a datagram, big-endian.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Opcode {
    /// Read request.
    Rrq = 1,

    /// Write request. Recognized only so that it can be refused.
    Wrq = 2,

    /// Data.
    Data = 3,

    /// Acknowledges successful receipt of a `Data` packet.
    Ack = 4,

    /// A courtesy packet to indicate the peer has experienced an error
    /// and will not complete the transmission.
    Error = 5,
}

impl Opcode {
    /// Tries to produce an `Opcode` from a `u16`.
    pub fn from_u16(val: u16) -> Option<Self> {
        Some(match val {
            1 => Opcode::Rrq,
            2 => Opcode::Wrq,
            3 => Opcode::Data,
            4 => Opcode::Ack,
            5 => Opcode::Error,
            _ => return None,
        })
    }

    /// Reads the opcode of a datagram without looking at the rest of it.
    pub fn peek(datagram: &[u8]) -> Option<Self> {
        Bytes::new(datagram).u16().and_then(Opcode::from_u16)
    }
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> u16 {
        op as u16
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::Rrq => "RRQ",
            Opcode::Wrq => "WRQ",
            Opcode::Data => "DATA",
            Opcode::Ack => "ACK",
            Opcode::Error => "ERROR",
        };

        write!(f, "{}", s)
    }
}
