//! Types that represent the TFTP packets a read transfer is made of, and the
//! codec that turns them into datagrams and back.
//!
//! Every packet starts with a two byte [`Opcode`]. All integers are
//! big-endian and no datagram is ever larger than [`DATAGRAM_SIZE`].
//!
//! ```text
//! RRQ    | 01 | filename | 0 | mode | 0 |
//! DATA   | 03 | block    | payload      |
//! ACK    | 04 | block    |
//! ERROR  | 05 | code     | message | 0 |
//! ```

use thiserror::Error;

use crate::bytes::{put_u16, FromBytes, IntoBytes};

mod ack;
mod data;
mod error;
mod opcode;
mod rrq;

pub use ack::Ack;
pub use data::Data;
pub use error::{ErrorCode, ErrorPacket};
pub use opcode::Opcode;
pub use rrq::ReadRequest;

/// TFTP limits datagrams to 516 bytes to avoid fragmentation.
pub const DATAGRAM_SIZE: usize = 516;

/// Opcode plus block number (or error code).
pub const HEADER_SIZE: usize = 4;

/// The largest payload a single `Data` packet can carry.
pub const MAX_PAYLOAD_SIZE: usize = DATAGRAM_SIZE - HEADER_SIZE;

/// The number of file bytes a session puts in every non-final block unless
/// configured otherwise.
pub const BLOCK_SIZE: usize = 508;

/// The only transfer mode this crate serves.
pub const OCTET: &str = "octet";

/// Reasons a datagram could not be decoded or a packet could not be encoded.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CodecError {
    /// The datagram is not the expected packet, is truncated or is missing
    /// a terminator.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// The read request asked for a mode other than `octet`.
    #[error("unsupported transfer mode {0:?}, only octet transfers are supported")]
    UnsupportedMode(String),

    /// The payload would push the datagram over `DATAGRAM_SIZE`.
    #[error("payload of {0} bytes does not fit in a datagram")]
    PayloadTooLarge(usize),
}

pub(crate) mod sealed {
    use super::Opcode;

    /// The body of a packet, everything after the opcode.
    pub trait Body {
        const OPCODE: Opcode;
    }
}

fn encode<B: sealed::Body + IntoBytes>(body: &B) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DATAGRAM_SIZE);
    put_u16(&mut buf, B::OPCODE.into());
    body.write_bytes(&mut buf);
    buf
}

fn decode<'a, B: sealed::Body + FromBytes<'a>>(datagram: &'a [u8]) -> Result<B, CodecError> {
    if datagram.len() > DATAGRAM_SIZE {
        return Err(CodecError::InvalidRequest("datagram too large"));
    }

    match Opcode::peek(datagram) {
        Some(op) if op == B::OPCODE => B::from_bytes(&datagram[2..]),
        Some(_) => Err(CodecError::InvalidRequest("unexpected opcode")),
        None => Err(CodecError::InvalidRequest("missing or unknown opcode")),
    }
}

/// Encodes a read request. An empty `mode` is sent as `octet`.
pub fn encode_read_request(filename: &str, mode: &str) -> Vec<u8> {
    encode(&ReadRequest::with_mode(filename, mode))
}

/// Decodes a read request, refusing anything but `octet` transfers.
pub fn decode_read_request(datagram: &[u8]) -> Result<ReadRequest, CodecError> {
    decode(datagram)
}

/// Encodes a `Data` packet for the given block.
pub fn encode_data(block: u16, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    Ok(encode(&Data::new(block, payload)?))
}

/// Decodes a `Data` packet. The payload borrows from `datagram`.
pub fn decode_data(datagram: &[u8]) -> Result<Data<'_>, CodecError> {
    decode(datagram)
}

/// Encodes an acknowledgement for `block`.
pub fn encode_ack(block: u16) -> Vec<u8> {
    encode(&Ack { block })
}

/// Decodes an acknowledgement, returning the acknowledged block number.
pub fn decode_ack(datagram: &[u8]) -> Result<u16, CodecError> {
    decode(datagram).map(|ack: Ack| ack.block)
}

/// Encodes an error packet. Overlong messages are truncated to fit the
/// datagram.
pub fn encode_error(code: ErrorCode, message: &str) -> Vec<u8> {
    encode(&ErrorPacket::new(code, message))
}

/// Decodes an error packet.
pub fn decode_error(datagram: &[u8]) -> Result<ErrorPacket, CodecError> {
    decode(datagram)
}

/// Any packet a peer may send.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packet<'a> {
    /// A read request.
    Rrq(ReadRequest),

    /// A write request. Its body is never decoded since it is always refused.
    Wrq,

    /// A block of file content.
    Data(Data<'a>),

    /// An acknowledgement.
    Ack(Ack),

    /// An error; the peer has given up on the transfer.
    Error(ErrorPacket),
}

impl<'a> Packet<'a> {
    /// Decodes whatever packet `datagram` holds.
    pub fn decode(datagram: &'a [u8]) -> Result<Self, CodecError> {
        let op = Opcode::peek(datagram)
            .ok_or(CodecError::InvalidRequest("missing or unknown opcode"))?;

        Ok(match op {
            Opcode::Rrq => Packet::Rrq(decode(datagram)?),
            Opcode::Wrq => Packet::Wrq,
            Opcode::Data => Packet::Data(decode(datagram)?),
            Opcode::Ack => Packet::Ack(decode(datagram)?),
            Opcode::Error => Packet::Error(decode(datagram)?),
        })
    }

    /// The opcode of this packet.
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Rrq(_) => Opcode::Rrq,
            Packet::Wrq => Opcode::Wrq,
            Packet::Data(_) => Opcode::Data,
            Packet::Ack(_) => Opcode::Ack,
            Packet::Error(_) => Opcode::Error,
        }
    }
}
