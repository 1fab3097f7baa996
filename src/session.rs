//! The state machine behind a single read transfer.
//!
//! A [`Session`] never touches the network. Every transition returns an
//! [`Action`] telling the caller what (if anything) to send to the client,
//! and [`Session::deadline`] tells it how long to wait for the next datagram
//! before calling [`Session::handle_timeout`].
//!
//! ```text
//! AwaitingFirstSend --start--> AwaitingAck --ack, short block--> Complete
//!                                 |  ^
//!                                 |  +-- ack, full block / timeout (retry)
//!                                 +----- error, bad packet, retries exhausted --> Failed
//! ```

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::packet::{self, Ack, ErrorCode, Packet};
use crate::source::{Chunk, DataSource};
use crate::TransferConfig;

/// Where a session is in its lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Created, nothing sent yet.
    AwaitingFirstSend,

    /// A data block is in flight.
    AwaitingAck,

    /// The final block was acknowledged.
    Complete,

    /// The transfer was abandoned.
    Failed,
}

impl State {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Complete | State::Failed)
    }
}

/// What the session wants done after a transition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    /// Send this datagram to the client.
    Transmit(Vec<u8>),

    /// Send nothing.
    Wait,
}

/// One client's read transfer.
pub struct Session<S> {
    client: SocketAddr,
    source: Option<S>,
    config: TransferConfig,
    state: State,

    /// Block number of the last data packet sent; 0 before the first one.
    block: u16,
    retries_remaining: usize,
    last_sent: Vec<u8>,
    last_chunk: Chunk,
    deadline: Option<Instant>,
    buf: Vec<u8>,
}

impl<S: DataSource> Session<S> {
    /// Creates a session that will stream `source` to `client`.
    pub fn new(client: SocketAddr, source: S, config: TransferConfig) -> Self {
        Self {
            client,
            source: Some(source),
            config,
            state: State::AwaitingFirstSend,
            block: 0,
            retries_remaining: config.max_retries(),
            last_sent: Vec::new(),
            last_chunk: Chunk::Full(0),
            deadline: None,
            buf: vec![0; config.block_size()],
        }
    }

    /// Sends the first block.
    pub fn start(&mut self, now: Instant) -> Action {
        if self.state != State::AwaitingFirstSend {
            return Action::Wait;
        }

        info!(client = %self.client, "starting transfer");
        self.send_next_block(now)
    }

    /// Handles a datagram the client sent.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) -> Action {
        if self.state != State::AwaitingAck {
            debug!(client = %self.client, state = ?self.state, "ignoring datagram");
            return Action::Wait;
        }

        match Packet::decode(datagram) {
            Ok(Packet::Ack(Ack { block })) if block == self.block => self.acknowledged(now),
            Ok(Packet::Ack(Ack { block })) => {
                debug!(client = %self.client, block, current = self.block, "ignoring stale ack");
                Action::Wait
            }
            // The client did not see the first block and asked again.
            Ok(Packet::Rrq(request)) if self.block == 1 => {
                debug!(
                    client = %self.client,
                    filename = %request.filename,
                    "repeated read request, resending first block"
                );
                Action::Transmit(self.last_sent.clone())
            }
            Ok(Packet::Error(err)) => {
                warn!(
                    client = %self.client,
                    code = ?err.code,
                    reason = %err.message,
                    "client aborted transfer"
                );
                self.release(State::Failed);
                Action::Wait
            }
            Ok(other) => {
                let message = format!("unexpected {} packet", other.opcode());
                self.abort_with(ErrorCode::IllegalOperation, &message)
            }
            Err(e) => self.abort_with(ErrorCode::IllegalOperation, &e.to_string()),
        }
    }

    /// Handles the expiry of the ack deadline: retransmits the last block or
    /// gives up once the retries are used up. Giving up is silent, the client
    /// learns about it through its own timeout.
    pub fn handle_timeout(&mut self, now: Instant) -> Action {
        if self.state != State::AwaitingAck {
            return Action::Wait;
        }

        if let Some(deadline) = self.deadline {
            if now < deadline {
                return Action::Wait;
            }
        }

        if self.retries_remaining == 0 {
            warn!(client = %self.client, block = self.block, "no ack, giving up");
            self.release(State::Failed);
            return Action::Wait;
        }

        self.retries_remaining -= 1;
        self.deadline = Some(now + self.config.timeout());
        debug!(
            client = %self.client,
            block = self.block,
            retries_remaining = self.retries_remaining,
            "retransmitting"
        );

        Action::Transmit(self.last_sent.clone())
    }

    /// Abandons the transfer without telling the client, e.g. on shutdown.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            debug!(client = %self.client, block = self.block, "transfer aborted");
            self.release(State::Failed);
        }
    }

    fn acknowledged(&mut self, now: Instant) -> Action {
        if self.last_chunk.is_final() {
            info!(client = %self.client, blocks = self.block, "transfer complete");
            self.release(State::Complete);
            return Action::Wait;
        }

        self.send_next_block(now)
    }

    fn send_next_block(&mut self, now: Instant) -> Action {
        let source = match self.source.as_mut() {
            Some(source) => source,
            None => return self.abort_with(ErrorCode::NotDefined, "data source released"),
        };

        let chunk = match source.read_chunk(&mut self.buf) {
            Ok(chunk) => chunk,
            Err(e) => {
                let code = match e.kind() {
                    ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
                    _ => ErrorCode::DiskFull,
                };
                return self.abort_with(code, &e.to_string());
            }
        };

        // A full block can never end a transfer, an empty one has to follow.
        let chunk = match chunk {
            Chunk::Final(n) if n == self.buf.len() => Chunk::Full(n),
            chunk => chunk,
        };

        let block = self.block.wrapping_add(1);
        let datagram = match packet::encode_data(block, &self.buf[..chunk.len()]) {
            Ok(datagram) => datagram,
            Err(e) => return self.abort_with(ErrorCode::NotDefined, &e.to_string()),
        };

        self.block = block;
        self.last_chunk = chunk;
        self.last_sent = datagram;
        self.retries_remaining = self.config.max_retries();
        self.deadline = Some(now + self.config.timeout());
        self.state = State::AwaitingAck;
        debug!(client = %self.client, block, len = chunk.len(), "sending block");

        Action::Transmit(self.last_sent.clone())
    }

    fn abort_with(&mut self, code: ErrorCode, message: &str) -> Action {
        warn!(client = %self.client, block = self.block, ?code, reason = message, "transfer failed");
        self.release(State::Failed);

        Action::Transmit(packet::encode_error(code, message))
    }

    fn release(&mut self, state: State) {
        self.state = state;
        self.source = None;
        self.deadline = None;
        self.last_sent = Vec::new();
    }
}

impl<S> Session<S> {
    /// The client this session serves.
    pub fn client(&self) -> SocketAddr {
        self.client
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the session reached `Complete` or `Failed`.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// The block number of the last data packet sent.
    pub fn block(&self) -> u16 {
        self.block
    }

    /// How many retransmissions of the current block are left.
    pub fn retries_remaining(&self) -> usize {
        self.retries_remaining
    }

    /// When the current block times out, if one is in flight.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the session still holds its data source.
    pub fn holds_source(&self) -> bool {
        self.source.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::packet::{decode_data, decode_error, encode_ack, encode_error, BLOCK_SIZE};

    const TIMEOUT: Duration = Duration::from_millis(50);
    const MAX_RETRIES: usize = 2;

    fn config() -> TransferConfig {
        TransferConfig::new(TIMEOUT, MAX_RETRIES, BLOCK_SIZE).unwrap()
    }

    fn client() -> SocketAddr {
        "127.0.0.1:4242".parse().unwrap()
    }

    fn transmitted(action: Action) -> Vec<u8> {
        match action {
            Action::Transmit(bytes) => bytes,
            Action::Wait => panic!("expected a datagram, got {:?}", action),
        }
    }

    /// A reader that records when it is dropped.
    struct Tracked<R> {
        inner: R,
        dropped: Arc<AtomicBool>,
    }

    impl<R> Tracked<R> {
        fn new(inner: R) -> (Self, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            let tracked = Tracked {
                inner,
                dropped: dropped.clone(),
            };
            (tracked, dropped)
        }
    }

    impl<R: Read> Read for Tracked<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl<R> Drop for Tracked<R> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    /// Fails every read after the first `ok` bytes.
    struct Failing {
        ok: usize,
        kind: io::ErrorKind,
    }

    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.ok == 0 {
                return Err(io::Error::new(self.kind, "boom"));
            }
            let n = self.ok.min(buf.len());
            self.ok -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_single_block_transfer() {
        let now = Instant::now();
        let mut session = Session::new(client(), &b"Hello friend!"[..], config());
        assert_eq!(session.state(), State::AwaitingFirstSend);

        let bytes = transmitted(session.start(now));
        let data = decode_data(&bytes).unwrap();
        assert_eq!(data.block, 1);
        assert_eq!(data.payload, b"Hello friend!");
        assert_eq!(session.state(), State::AwaitingAck);
        assert_eq!(session.deadline(), Some(now + TIMEOUT));

        assert_eq!(session.handle_datagram(&encode_ack(1), now), Action::Wait);
        assert_eq!(session.state(), State::Complete);
        assert!(!session.holds_source());
        assert!(session.deadline().is_none());
    }

    #[test]
    fn test_exact_multiple_ends_with_empty_block() {
        const K: usize = 3;
        let content: Vec<u8> = (0..BLOCK_SIZE * K).map(|i| i as u8).collect();
        let now = Instant::now();
        let mut session = Session::new(client(), &content[..], config());

        let mut received = vec![];
        let mut blocks = vec![];
        let mut action = session.start(now);
        while let Action::Transmit(bytes) = action {
            let data = decode_data(&bytes).unwrap();
            blocks.push(data.block);
            received.extend_from_slice(data.payload);
            if data.block as usize == K + 1 {
                assert!(data.payload.is_empty());
            } else {
                assert_eq!(data.payload.len(), BLOCK_SIZE);
            }
            action = session.handle_datagram(&encode_ack(data.block), now);
        }

        assert_eq!(blocks, (1..=(K as u16 + 1)).collect::<Vec<_>>());
        assert_eq!(received, content);
        assert_eq!(session.state(), State::Complete);
    }

    #[test]
    fn test_block_numbers_wrap_around() {
        const FULL_BLOCKS: u64 = 65537;
        let source = io::repeat(0x5a).take(BLOCK_SIZE as u64 * FULL_BLOCKS);
        let now = Instant::now();
        let mut session = Session::new(client(), source, config());

        let mut sent: u64 = 0;
        let mut action = session.start(now);
        while let Action::Transmit(bytes) = action {
            sent += 1;
            let data = decode_data(&bytes).unwrap();
            assert_eq!(data.block, (sent % 65536) as u16);
            action = session.handle_datagram(&encode_ack(data.block), now);
        }

        assert_eq!(sent, FULL_BLOCKS + 1);
        assert_eq!(session.block(), 2);
        assert_eq!(session.state(), State::Complete);
    }

    #[test]
    fn test_stale_ack_sends_nothing() {
        let content = vec![1u8; BLOCK_SIZE + 10];
        let now = Instant::now();
        let mut session = Session::new(client(), &content[..], config());

        let first = transmitted(session.start(now));
        let second = transmitted(session.handle_datagram(&encode_ack(1), now));
        assert_eq!(decode_data(&second).unwrap().block, 2);

        // A delayed duplicate of the first ack.
        assert_eq!(session.handle_datagram(&encode_ack(1), now), Action::Wait);
        assert_eq!(session.handle_datagram(&encode_ack(0), now), Action::Wait);
        assert_eq!(session.handle_datagram(&encode_ack(9), now), Action::Wait);
        assert_eq!(session.state(), State::AwaitingAck);
        assert_eq!(session.block(), 2);
        assert_ne!(first, second);

        assert_eq!(session.handle_datagram(&encode_ack(2), now), Action::Wait);
        assert_eq!(session.state(), State::Complete);
    }

    #[test]
    fn test_timeout_retransmits_identical_packet() {
        let content = vec![3u8; BLOCK_SIZE * 2];
        let now = Instant::now();
        let mut session = Session::new(client(), &content[..], config());

        let first = transmitted(session.start(now));

        // Not yet expired.
        assert_eq!(session.handle_timeout(now), Action::Wait);
        assert_eq!(session.retries_remaining(), MAX_RETRIES);

        let later = now + TIMEOUT;
        assert_eq!(transmitted(session.handle_timeout(later)), first);
        assert_eq!(session.retries_remaining(), MAX_RETRIES - 1);
        assert_eq!(session.deadline(), Some(later + TIMEOUT));

        // An ack resets the retry budget for the next block.
        let next = transmitted(session.handle_datagram(&encode_ack(1), later));
        assert_eq!(decode_data(&next).unwrap().block, 2);
        assert_eq!(session.retries_remaining(), MAX_RETRIES);
    }

    #[test]
    fn test_exhausted_retries_fail_silently() {
        let content = vec![3u8; BLOCK_SIZE * 2];
        let (source, dropped) = Tracked::new(&content[..]);
        let mut now = Instant::now();
        let mut session = Session::new(client(), source, config());

        let first = transmitted(session.start(now));
        for _ in 0..MAX_RETRIES {
            now += TIMEOUT;
            assert_eq!(transmitted(session.handle_timeout(now)), first);
        }

        now += TIMEOUT;
        assert_eq!(session.handle_timeout(now), Action::Wait);
        assert_eq!(session.state(), State::Failed);
        assert!(dropped.load(Ordering::SeqCst));

        // A late ack does not resurrect the transfer.
        assert_eq!(session.handle_datagram(&encode_ack(1), now), Action::Wait);
        assert_eq!(session.block(), 1);
    }

    #[test]
    fn test_read_error_sends_error_packet() {
        let cases = [
            (io::ErrorKind::PermissionDenied, ErrorCode::AccessViolation),
            (io::ErrorKind::Other, ErrorCode::DiskFull),
        ];

        for (kind, code) in cases.iter() {
            let source = Failing { ok: 0, kind: *kind };
            let mut session = Session::new(client(), source, config());

            let bytes = transmitted(session.start(Instant::now()));
            assert_eq!(decode_error(&bytes).unwrap().code, *code);
            assert_eq!(session.state(), State::Failed);
            assert!(!session.holds_source());
        }
    }

    #[test]
    fn test_read_error_on_later_block() {
        let source = Failing {
            ok: BLOCK_SIZE,
            kind: io::ErrorKind::Other,
        };
        let now = Instant::now();
        let mut session = Session::new(client(), source, config());

        assert_eq!(decode_data(&transmitted(session.start(now))).unwrap().block, 1);
        let bytes = transmitted(session.handle_datagram(&encode_ack(1), now));
        assert_eq!(decode_error(&bytes).unwrap().code, ErrorCode::DiskFull);
        assert_eq!(session.state(), State::Failed);
    }

    #[test]
    fn test_unexpected_packet_is_illegal() {
        let datagrams: &[&[u8]] = &[
            b"garbage",
            &[0x00, 0x04, 0x01],
            b"\x00\x02greeting.txt\0octet\0",
            b"\x00\x03\x00\x01data",
        ];

        for datagram in datagrams {
            let (source, dropped) = Tracked::new(&b"Hello friend!"[..]);
            let mut session = Session::new(client(), source, config());
            session.start(Instant::now());

            let bytes = transmitted(session.handle_datagram(datagram, Instant::now()));
            assert_eq!(decode_error(&bytes).unwrap().code, ErrorCode::IllegalOperation);
            assert_eq!(session.state(), State::Failed);
            assert!(dropped.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn test_repeated_request_resends_first_block() {
        let content = vec![5u8; BLOCK_SIZE + 1];
        let (source, dropped) = Tracked::new(&content[..]);
        let now = Instant::now();
        let mut session = Session::new(client(), source, config());

        let first = transmitted(session.start(now));
        let rrq = b"\x00\x01greeting.txt\0octet\0";
        assert_eq!(transmitted(session.handle_datagram(rrq, now)), first);
        assert_eq!(session.state(), State::AwaitingAck);
        assert_eq!(session.block(), 1);
        assert!(!dropped.load(Ordering::SeqCst));

        // Once block 1 is acknowledged a read request no longer fits.
        let second = transmitted(session.handle_datagram(&encode_ack(1), now));
        assert_eq!(decode_data(&second).unwrap().payload, &[5]);
        let bytes = transmitted(session.handle_datagram(rrq, now));
        assert_eq!(decode_error(&bytes).unwrap().code, ErrorCode::IllegalOperation);
        assert_eq!(session.state(), State::Failed);
    }

    /// Reports the end of the stream together with the last full block.
    struct Eager<'a>(&'a [u8]);

    impl DataSource for Eager<'_> {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
            let n = buf.len().min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(Chunk::Final(n))
        }
    }

    #[test]
    fn test_full_final_chunk_is_followed_by_empty_block() {
        let content = vec![8u8; BLOCK_SIZE];
        let now = Instant::now();
        let mut session = Session::new(client(), Eager(&content[..]), config());

        let first = transmitted(session.start(now));
        assert_eq!(decode_data(&first).unwrap().payload.len(), BLOCK_SIZE);

        let last = transmitted(session.handle_datagram(&encode_ack(1), now));
        let data = decode_data(&last).unwrap();
        assert_eq!(data.block, 2);
        assert!(data.payload.is_empty());

        assert_eq!(session.handle_datagram(&encode_ack(2), now), Action::Wait);
        assert_eq!(session.state(), State::Complete);
    }

    #[test]
    fn test_client_error_ends_session_quietly() {
        let mut session = Session::new(client(), &b"Hello friend!"[..], config());
        session.start(Instant::now());

        let error = encode_error(ErrorCode::DiskFull, "no space left");
        assert_eq!(session.handle_datagram(&error, Instant::now()), Action::Wait);
        assert_eq!(session.state(), State::Failed);
        assert!(!session.holds_source());
    }

    #[test]
    fn test_abort_releases_source() {
        let (source, dropped) = Tracked::new(&b"Hello friend!"[..]);
        let mut session = Session::new(client(), source, config());
        session.start(Instant::now());

        session.abort();
        assert_eq!(session.state(), State::Failed);
        assert!(dropped.load(Ordering::SeqCst));

        // Terminal states stay put.
        assert_eq!(session.start(Instant::now()), Action::Wait);
        assert_eq!(session.handle_timeout(Instant::now() + TIMEOUT), Action::Wait);
    }
}
