//! Dispatches datagrams to transfer sessions, one thread per client.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::fs::{Directory, FileSystem};
use crate::packet::{self, CodecError, ErrorCode, Opcode, DATAGRAM_SIZE};
use crate::session::{Action, Session};
use crate::source::DataSource;
use crate::TransferConfig;

/// How often the receive loop checks whether it was asked to shut down.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ServerConfig {
    /// How long `run` blocks in a single receive before checking for
    /// shutdown.
    pub poll_interval: Duration,

    /// Applied to every transfer.
    pub transfer: TransferConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            transfer: TransferConfig::default(),
        }
    }
}

/// Asks a running [`Server`] to stop. Cloneable and usable from any thread.
#[derive(Clone, Debug, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    /// Makes `Server::run` return after its current receive.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether `trigger` was called.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Inbox {
    id: u64,
    sender: Sender<Vec<u8>>,
}

/// A read-only TFTP server listening on a single UDP socket.
///
/// Datagrams are keyed by the client's address: the first one from an
/// address must be a read request, which starts a session on its own thread;
/// later ones are forwarded to that session in arrival order.
pub struct Server<F: FileSystem = Directory> {
    shared: Arc<Shared<F>>,
    shutdown: Shutdown,
}

/// The parts of a server its session threads need as well.
struct Shared<F> {
    socket: UdpSocket,
    fs: F,
    config: ServerConfig,
    sessions: Mutex<HashMap<SocketAddr, Inbox>>,
    next_id: AtomicU64,
}

impl Server<Directory> {
    /// Binds to `bind_to` and serves the files below `serve_from` with the
    /// default configuration.
    pub fn new<A: ToSocketAddrs, P: AsRef<Path>>(bind_to: A, serve_from: P) -> io::Result<Self> {
        Server::with_config(bind_to, Directory::new(serve_from)?, ServerConfig::default())
    }
}

impl<F: FileSystem> Server<F> {
    /// Binds to `bind_to` and serves whatever `fs` opens.
    pub fn with_config<A: ToSocketAddrs>(
        bind_to: A,
        fs: F,
        config: ServerConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_to)?;
        socket.set_read_timeout(Some(config.poll_interval))?;

        let shared = Shared {
            socket,
            fs,
            config,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        };

        Ok(Self {
            shared: Arc::new(shared),
            shutdown: Shutdown::default(),
        })
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// The server's configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// A handle that stops `run`.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// The number of transfers in progress.
    pub fn active_sessions(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Receives and dispatches datagrams until shut down. Every transfer
    /// still in progress is abandoned on return.
    pub fn run(&self) -> io::Result<()> {
        info!(addr = ?self.local_addr().ok(), "serving TFTP");

        // One spare byte so that oversized datagrams are noticed rather than
        // silently truncated to a valid length.
        let mut buf = [0; DATAGRAM_SIZE + 1];
        let result = loop {
            if self.shutdown.is_triggered() {
                break Ok(());
            }

            match self.shared.socket.recv_from(&mut buf) {
                Ok((nbytes, src)) => self.dispatch(&buf[..nbytes], src),
                Err(e) if is_timeout(&e) => continue,
                // An ICMP port unreachable for an earlier send.
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => break Err(e),
            }
        };

        self.shared.close_sessions();
        info!("server stopped");
        result
    }

    /// Handles one datagram received from `src`.
    pub fn dispatch(&self, datagram: &[u8], src: SocketAddr) {
        Shared::dispatch(&self.shared, datagram, src);
    }
}

impl<F: FileSystem> Shared<F> {
    fn dispatch(this: &Arc<Self>, datagram: &[u8], src: SocketAddr) {
        {
            let mut sessions = this.sessions.lock();
            if let Some(inbox) = sessions.get(&src) {
                if inbox.sender.send(datagram.to_vec()).is_ok() {
                    return;
                }

                // The session's thread is gone.
                sessions.remove(&src);
            }
        }

        Shared::accept(this, datagram, src);
    }

    fn accept(this: &Arc<Self>, datagram: &[u8], client: SocketAddr) {
        match Opcode::peek(datagram) {
            Some(Opcode::Rrq) => {}
            Some(Opcode::Wrq) => {
                debug!(%client, "refusing write request");
                this.reply_error(client, ErrorCode::IllegalOperation, "write requests are not supported");
                return;
            }
            op => {
                debug!(%client, ?op, len = datagram.len(), "dropping datagram from unknown client");
                return;
            }
        }

        let request = match packet::decode_read_request(datagram) {
            Ok(request) => request,
            Err(CodecError::UnsupportedMode(mode)) => {
                debug!(%client, %mode, "refusing transfer mode");
                this.reply_error(client, ErrorCode::AccessViolation, "only octet mode is supported");
                return;
            }
            Err(e) => {
                debug!(%client, error = %e, "dropping malformed read request");
                return;
            }
        };

        let source = match this.fs.open_for_read(&request.filename) {
            Ok(source) => source,
            Err(e) => {
                let code = ErrorCode::from(e.kind());
                info!(%client, filename = %request.filename, error = %e, "cannot serve file");
                let message = match code {
                    ErrorCode::NotDefined => e.to_string(),
                    _ => code.as_str().to_string(),
                };
                this.reply_error(client, code, &message);
                return;
            }
        };

        info!(%client, filename = %request.filename, "read request");
        Shared::spawn_session(this, client, source);
    }

    fn spawn_session(this: &Arc<Self>, client: SocketAddr, source: F::Source) {
        let id = this.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = crossbeam_channel::unbounded();
        this.sessions.lock().insert(client, Inbox { id, sender });

        let session = Session::new(client, source, this.config.transfer);
        let shared = Arc::clone(this);

        let spawned = thread::Builder::new()
            .name(format!("tftp-{}", client))
            .spawn(move || {
                drive(session, &receiver, &shared.socket);

                // Datagrams queued behind the last one the session handled
                // belong to whatever the client does next.
                let leftovers: Vec<Vec<u8>> = {
                    let mut sessions = shared.sessions.lock();
                    if sessions.get(&client).map(|inbox| inbox.id) == Some(id) {
                        sessions.remove(&client);
                        receiver.try_iter().collect()
                    } else {
                        Vec::new()
                    }
                };
                drop(receiver);

                for datagram in leftovers {
                    Shared::dispatch(&shared, &datagram, client);
                }
            });

        if let Err(e) = spawned {
            warn!(%client, error = %e, "could not start session");
            this.sessions.lock().remove(&client);
            this.reply_error(client, ErrorCode::NotDefined, "server busy");
        }
    }

    fn reply_error(&self, client: SocketAddr, code: ErrorCode, message: &str) {
        let datagram = packet::encode_error(code, message);
        if let Err(e) = self.socket.send_to(&datagram, client) {
            warn!(%client, error = %e, "failed to send error packet");
        }
    }

    /// Drops every session's inbox; their threads notice and give up.
    fn close_sessions(&self) {
        self.sessions.lock().clear();
    }
}

impl<F: FileSystem> Drop for Server<F> {
    fn drop(&mut self) {
        self.shared.close_sessions();
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Runs a session to completion, waiting on its inbox until the current
/// block's deadline.
fn drive<S: DataSource>(mut session: Session<S>, inbox: &Receiver<Vec<u8>>, socket: &UdpSocket) {
    let client = session.client();
    let mut action = session.start(Instant::now());

    loop {
        if let Action::Transmit(datagram) = action {
            // A lost send is no different from a lost datagram: the
            // retransmission timer covers it.
            if let Err(e) = socket.send_to(&datagram, client) {
                warn!(%client, error = %e, "send failed");
            }
        }

        if session.is_finished() {
            break;
        }

        let deadline = match session.deadline() {
            Some(deadline) => deadline,
            None => {
                session.abort();
                break;
            }
        };

        action = match inbox.recv_deadline(deadline) {
            Ok(datagram) => session.handle_datagram(&datagram, Instant::now()),
            Err(RecvTimeoutError::Timeout) => session.handle_timeout(Instant::now()),
            Err(RecvTimeoutError::Disconnected) => {
                session.abort();
                break;
            }
        };
    }

    debug!(%client, state = ?session.state(), "session ended");
}
