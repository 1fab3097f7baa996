//! A Read Request indicates that a peer wants to receive a file.

use std::str;

use super::sealed::Body;
use super::{CodecError, Opcode, OCTET};
use crate::bytes::{Bytes, FromBytes, IntoBytes};

/// A read request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadRequest {
    /// The file the peer wants to receive. Never empty once decoded.
    pub filename: String,

    /// The transfer mode as sent by the peer. Only `octet` (in any case) is
    /// accepted.
    pub mode: String,
}

impl ReadRequest {
    /// Creates a new `octet` mode read request.
    pub fn new<T: Into<String>>(filename: T) -> Self {
        Self {
            filename: filename.into(),
            mode: OCTET.to_string(),
        }
    }

    /// Creates a read request with an explicit mode. An empty mode is sent
    /// as `octet`.
    pub fn with_mode<T: Into<String>, M: Into<String>>(filename: T, mode: M) -> Self {
        Self {
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    fn mode_or_default(&self) -> &str {
        if self.mode.is_empty() {
            OCTET
        } else {
            &self.mode
        }
    }
}

impl Body for ReadRequest {
    const OPCODE: Opcode = Opcode::Rrq;
}

fn string(bytes: &[u8]) -> Result<String, CodecError> {
    str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| CodecError::InvalidRequest("request is not valid UTF-8"))
}

impl<'a> FromBytes<'a> for ReadRequest {
    fn from_bytes(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let mut bytes = Bytes::new(bytes);

        let filename = bytes
            .until_nul()
            .ok_or(CodecError::InvalidRequest("unterminated filename"))?;
        if filename.is_empty() {
            return Err(CodecError::InvalidRequest("empty filename"));
        }

        // Anything after the mode would be RFC 2347 options, which are ignored.
        let mode = bytes
            .until_nul()
            .ok_or(CodecError::InvalidRequest("unterminated mode"))?;
        if mode.is_empty() {
            return Err(CodecError::InvalidRequest("empty mode"));
        }

        let filename = string(filename)?;
        let mode = string(mode)?;
        if !mode.eq_ignore_ascii_case(OCTET) {
            return Err(CodecError::UnsupportedMode(mode));
        }

        Ok(Self { filename, mode })
    }
}

impl IntoBytes for ReadRequest {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.filename.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.mode_or_default().as_bytes());
        buf.push(0);
    }
}
