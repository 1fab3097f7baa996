use std::io;

use super::sealed::Body;
use super::{CodecError, Opcode, DATAGRAM_SIZE, HEADER_SIZE};
use crate::bytes::{put_u16, Bytes, FromBytes, IntoBytes};

/// `ErrorCode` represents the error conditions that can be reached during
/// a regular TFTP operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    /// Not defined, see error message (if any).
    NotDefined = 0,

    /// File not found.
    FileNotFound = 1,

    /// Access violation.
    AccessViolation = 2,

    /// Disk full or allocation exceeded.
    DiskFull = 3,

    /// Illegal TFTP operation.
    IllegalOperation = 4,

    /// Unknown transfer ID.
    UnknownTid = 5,

    /// File already exists.
    FileAlreadyExists = 6,

    /// No such user.
    NoSuchUser = 7,
}

impl ErrorCode {
    /// Tries to produce an `ErrorCode` from a `u16`.
    pub fn from_u16(val: u16) -> Option<Self> {
        Some(match val {
            0 => ErrorCode::NotDefined,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTid,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            _ => return None,
        })
    }

    /// The message RFC 1350 associates with this code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotDefined => "Not defined",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::AccessViolation => "Access violation",
            ErrorCode::DiskFull => "Disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "Illegal TFTP operation",
            ErrorCode::UnknownTid => "Unknown transfer ID",
            ErrorCode::FileAlreadyExists => "File already exists",
            ErrorCode::NoSuchUser => "No such user",
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl From<io::ErrorKind> for ErrorCode {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            io::ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
            io::ErrorKind::AlreadyExists => ErrorCode::FileAlreadyExists,
            _ => ErrorCode::NotDefined,
        }
    }
}

/// An `Error` packet is a courtesy packet that is sent prior to terminating
/// the TFTP connection due to an unrecoverable error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorPacket {
    /// An integer code that describes the error.
    pub code: ErrorCode,

    /// A human readable description of the error.
    pub message: String,
}

impl ErrorPacket {
    /// Creates a new `ErrorPacket`.
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Body for ErrorPacket {
    const OPCODE: Opcode = Opcode::Error;
}

impl<'a> FromBytes<'a> for ErrorPacket {
    fn from_bytes(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let mut bytes = Bytes::new(bytes);

        let code = bytes
            .u16()
            .ok_or(CodecError::InvalidRequest("truncated error packet"))?;
        let code =
            ErrorCode::from_u16(code).ok_or(CodecError::InvalidRequest("unknown error code"))?;
        let message = String::from_utf8_lossy(bytes.until_nul_or_end()).into_owned();

        Ok(Self { code, message })
    }
}

impl IntoBytes for ErrorPacket {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        // Leave room for the header and the trailing NUL.
        let mut end = self.message.len().min(DATAGRAM_SIZE - HEADER_SIZE - 1);
        while !self.message.is_char_boundary(end) {
            end -= 1;
        }

        put_u16(buf, self.code.into());
        buf.extend(self.message[..end].bytes().take_while(|b| *b != 0));
        buf.push(0);
    }
}

impl From<ErrorPacket> for io::Error {
    fn from(packet: ErrorPacket) -> io::Error {
        let kind = match packet.code {
            ErrorCode::FileNotFound => io::ErrorKind::NotFound,
            ErrorCode::AccessViolation => io::ErrorKind::PermissionDenied,
            ErrorCode::FileAlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorCode::IllegalOperation | ErrorCode::UnknownTid => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };

        io::Error::new(kind, format!("{}: {}", packet.code.as_str(), packet.message))
    }
}
