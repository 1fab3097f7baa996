use super::sealed::Body;
use super::{CodecError, Opcode};
use crate::bytes::{put_u16, Bytes, FromBytes, IntoBytes};

/// Acknowledges receipt of the `Data` packet with the same block number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ack {
    /// The block being acknowledged.
    pub block: u16,
}

impl Body for Ack {
    const OPCODE: Opcode = Opcode::Ack;
}

impl<'a> FromBytes<'a> for Ack {
    fn from_bytes(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let mut bytes = Bytes::new(bytes);

        let block = bytes
            .u16()
            .ok_or(CodecError::InvalidRequest("truncated ack packet"))?;

        if !bytes.is_empty() {
            return Err(CodecError::InvalidRequest("trailing bytes after ack"));
        }

        Ok(Self { block })
    }
}

impl IntoBytes for Ack {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        put_u16(buf, self.block);
    }
}
