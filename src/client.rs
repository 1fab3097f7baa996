//! A client-side connection to a TFTP server. It only reads files, which is
//! all the server in this crate supports.

use std::io::{self, ErrorKind, Result, Write};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::debug;

use crate::packet::{self, ErrorCode, Packet, DATAGRAM_SIZE, OCTET};
use crate::TransferConfig;

/// Reads files from a single TFTP server.
pub struct Client {
    server: SocketAddr,
    socket: UdpSocket,
    config: TransferConfig,
}

impl Client {
    /// Opens a socket for talking to `server`.
    pub fn new<A: ToSocketAddrs>(server: A) -> Result<Self> {
        let server = server
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no server address"))?;

        let bind_to = match server {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };
        let socket = UdpSocket::bind(bind_to)?;

        let config = TransferConfig::default();
        socket.set_read_timeout(Some(config.timeout()))?;

        Ok(Self {
            server,
            socket,
            config,
        })
    }

    /// Sets the timeout, retry count and block size. The block size must
    /// match the server's.
    pub fn with_config(mut self, config: TransferConfig) -> Result<Self> {
        self.socket.set_read_timeout(Some(config.timeout()))?;
        self.config = config;
        Ok(self)
    }

    /// The local address of this client's socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Retrieves `filename` from the server, writing its content to `writer`.
    pub fn get<W: Write>(&self, filename: &str, mut writer: W) -> Result<W> {
        let mut last_sent = packet::encode_read_request(filename, OCTET);
        self.socket.send_to(&last_sent, self.server)?;

        let mut peer: Option<SocketAddr> = None;
        let mut expected: u16 = 1;
        let mut retries = 0;
        let mut buf = [0; DATAGRAM_SIZE];

        loop {
            let (nbytes, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    retries += 1;
                    if retries > self.config.max_retries() {
                        return Err(io::Error::new(ErrorKind::TimedOut, "server stopped responding"));
                    }

                    debug!(block = expected, retries, "retransmitting");
                    self.socket.send_to(&last_sent, peer.unwrap_or(self.server))?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Lock onto the first address that answers from the server's host.
            match peer {
                None if from.ip() == self.server.ip() => peer = Some(from),
                Some(p) if p == from => {}
                _ => {
                    let error = packet::encode_error(ErrorCode::UnknownTid, "unexpected peer");
                    let _ = self.socket.send_to(&error, from);
                    continue;
                }
            }

            let data = match Packet::decode(&buf[..nbytes]) {
                Ok(Packet::Data(data)) => data,
                Ok(Packet::Error(error)) => return Err(error.into()),
                Ok(other) => {
                    let message = format!("unexpected {} packet", other.opcode());
                    return Err(self.fail(from, ErrorCode::IllegalOperation, message));
                }
                Err(e) => return Err(self.fail(from, ErrorCode::IllegalOperation, e.to_string())),
            };

            if data.block != expected {
                // Our ack for the previous block was lost; repeat it.
                if data.block == expected.wrapping_sub(1) {
                    self.socket.send_to(&packet::encode_ack(data.block), from)?;
                }
                continue;
            }

            if let Err(e) = writer.write_all(data.payload) {
                let _ = self.fail(from, ErrorCode::from(e.kind()), e.to_string());
                return Err(e);
            }

            last_sent = packet::encode_ack(data.block);
            self.socket.send_to(&last_sent, from)?;
            retries = 0;

            if data.payload.len() < self.config.block_size() {
                return Ok(writer);
            }

            expected = expected.wrapping_add(1);
        }
    }

    fn fail(&self, to: SocketAddr, code: ErrorCode, message: String) -> io::Error {
        let _ = self
            .socket
            .send_to(&packet::encode_error(code, &message), to);
        io::Error::new(ErrorKind::InvalidData, message)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::packet::{decode_ack, decode_read_request, encode_data, encode_error};

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn create_server_client() -> (UdpSocket, Client) {
        let server_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        server_sock.set_read_timeout(Some(TIMEOUT * 5)).unwrap();

        let config = TransferConfig::new(TIMEOUT, 2, packet::BLOCK_SIZE).unwrap();
        let client = Client::new(server_sock.local_addr().unwrap())
            .unwrap()
            .with_config(config)
            .unwrap();

        (server_sock, client)
    }

    fn recv(sock: &UdpSocket) -> (Vec<u8>, SocketAddr) {
        let mut buf = [0; DATAGRAM_SIZE];
        let (nbytes, from) = sock.recv_from(&mut buf).unwrap();
        (buf[..nbytes].to_vec(), from)
    }

    #[test]
    fn test_get_acknowledges_every_block() {
        let (server_sock, client) = create_server_client();
        let client_thread = thread::spawn(move || client.get("greeting.txt", Vec::new()));

        let (rrq, peer) = recv(&server_sock);
        assert_eq!(decode_read_request(&rrq).unwrap().filename, "greeting.txt");

        let first = [b'h'; packet::BLOCK_SIZE];
        server_sock.send_to(&encode_data(1, &first).unwrap(), peer).unwrap();
        assert_eq!(decode_ack(&recv(&server_sock).0).unwrap(), 1);

        // A duplicate of block 1 is acknowledged again and not written twice.
        server_sock.send_to(&encode_data(1, &first).unwrap(), peer).unwrap();
        assert_eq!(decode_ack(&recv(&server_sock).0).unwrap(), 1);

        server_sock.send_to(&encode_data(2, b"i").unwrap(), peer).unwrap();
        assert_eq!(decode_ack(&recv(&server_sock).0).unwrap(), 2);

        let buf = client_thread.join().unwrap().unwrap();
        let mut expected = b"h".repeat(packet::BLOCK_SIZE);
        expected.push(b'i');
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_get_reports_server_error() {
        let (server_sock, client) = create_server_client();
        let client_thread = thread::spawn(move || client.get("missing.txt", Vec::new()));

        let (_, peer) = recv(&server_sock);
        let error = encode_error(ErrorCode::FileNotFound, "File not found");
        server_sock.send_to(&error, peer).unwrap();

        let err = client_thread.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_get_retransmits_request_then_gives_up() {
        let (server_sock, client) = create_server_client();
        let client_thread = thread::spawn(move || client.get("greeting.txt", Vec::new()));

        // The original request and two retransmissions.
        let (first, _) = recv(&server_sock);
        for _ in 0..2 {
            assert_eq!(recv(&server_sock).0, first);
        }

        let err = client_thread.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }
}
