use super::sealed::Body;
use super::{CodecError, Opcode, MAX_PAYLOAD_SIZE};
use crate::bytes::{put_u16, Bytes, FromBytes, IntoBytes};

/// A block of file content. The payload borrows from the datagram it was
/// decoded from, or from the buffer it is about to be encoded from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Data<'a> {
    /// The block number, starting at 1 and wrapping after 65535.
    pub block: u16,

    /// Up to `MAX_PAYLOAD_SIZE` bytes of file content.
    pub payload: &'a [u8],
}

impl<'a> Data<'a> {
    /// Creates a new `Data` packet, refusing payloads that would not fit in
    /// a datagram.
    pub fn new(block: u16, payload: &'a [u8]) -> Result<Self, CodecError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }

        Ok(Self { block, payload })
    }
}

impl Body for Data<'_> {
    const OPCODE: Opcode = Opcode::Data;
}

impl<'a> FromBytes<'a> for Data<'a> {
    fn from_bytes(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let mut bytes = Bytes::new(bytes);

        let block = bytes
            .u16()
            .ok_or(CodecError::InvalidRequest("truncated data packet"))?;

        Data::new(block, bytes.rest())
    }
}

impl IntoBytes for Data<'_> {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        put_u16(buf, self.block);
        buf.extend_from_slice(self.payload);
    }
}
