//! The `tftpd` crate implements a read-only server for the Trivial File
//! Transfer Protocol (RFC 1350):
//!
//! * The protocol (types and a codec for the TFTP packets a read transfer
//!   uses, see [`packet`]).
//! * A per-client transfer session that drives block sequencing,
//!   retransmission and termination without doing any I/O itself
//!   (see [`session`]).
//! * A server that dispatches datagrams to sessions, one thread per client.
//! * A small client, mostly useful to talk to the server.
//!
//! Only read requests in `octet` mode are served. Write requests are
//! answered with an "Illegal TFTP operation" error packet.
//!
//! For more information, please see [THE TFTP PROTOCOL (REVISION 2)](
//! https://tools.ietf.org/html/rfc1350).
//!
//! ## Try it out
//!
//! In one terminal window, start up the server:
//!
//! ```console
//! $ RUST_LOG=debug cargo run --example server -- --bind 127.0.0.1:6655 --root ./public
//! ```
//!
//! Then in another window:
//!
//! ```console
//! $ cargo run --example client -- 127.0.0.1:6655 greeting.txt
//! Hello friend!
//! ```

#![warn(missing_docs)]

use std::time::Duration;

use thiserror::Error;

mod bytes;
pub mod client;
pub mod fs;
pub mod packet;
pub mod server;
pub mod session;
pub mod source;

pub use client::Client;
pub use fs::{Directory, FileSystem};
pub use server::{Server, ServerConfig, Shutdown};
pub use session::{Action, Session, State};
pub use source::{Chunk, DataSource};

/// How long to wait for an acknowledgement before retransmitting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// How many times the last packet is retransmitted before giving up.
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// A `TransferConfig` failed validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A zero timeout would retransmit in a busy loop.
    #[error("ack timeout must be greater than zero")]
    ZeroTimeout,

    /// The block size does not fit in a single datagram.
    #[error("block size {0} is out of range (expected 1..={})", packet::MAX_PAYLOAD_SIZE)]
    BlockSize(usize),
}

/// POD struct representing the configuration of a single transfer: how long
/// to wait for an acknowledgement, how often to retransmit and how large the
/// data blocks are.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TransferConfig {
    timeout: Duration,

    /// Note that this is the number of *retransmissions*, not transmissions:
    /// with `0` every packet is still sent once.
    max_retries: usize,

    block_size: usize,
}

impl TransferConfig {
    /// Creates a validated configuration.
    pub fn new(
        timeout: Duration,
        max_retries: usize,
        block_size: usize,
    ) -> Result<Self, ConfigError> {
        if timeout == Duration::from_secs(0) {
            return Err(ConfigError::ZeroTimeout);
        }

        if block_size == 0 || block_size > packet::MAX_PAYLOAD_SIZE {
            return Err(ConfigError::BlockSize(block_size));
        }

        Ok(Self {
            timeout,
            max_retries,
            block_size,
        })
    }

    /// How long to wait for a reply before retransmitting the last packet.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How many times the last packet is retransmitted before giving up.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// The number of file bytes carried by every non-final data packet.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            block_size: packet::BLOCK_SIZE,
        }
    }
}
