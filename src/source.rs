//! Where the bytes of a transfer come from.

use std::io::{self, Read};

/// The outcome of filling one block from a [`DataSource`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Chunk {
    /// The buffer was filled completely; more data may follow.
    Full(usize),

    /// The end of the stream was reached after this many bytes (possibly
    /// none). Nothing follows.
    Final(usize),
}

impl Chunk {
    /// The number of bytes written into the buffer.
    pub fn len(self) -> usize {
        match self {
            Chunk::Full(n) | Chunk::Final(n) => n,
        }
    }

    /// Whether this chunk holds no bytes at all.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Whether this is the last chunk of the stream.
    pub fn is_final(self) -> bool {
        matches!(self, Chunk::Final(_))
    }
}

/// A sequential source of file content that knows when it is exhausted.
pub trait DataSource {
    /// Fills `buf` with the next bytes of the stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk>;
}

/// Any reader is a data source: short reads are retried until the buffer is
/// full or the reader reports end of stream.
impl<R: Read> DataSource for R {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => return Ok(Chunk::Final(filled)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(Chunk::Full(filled))
    }
}
