//! Rate-limited, retrying UDP transport (spec.md §4.4/§4.6).

use std::cell::Cell;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::crypto::Cipher;
use crate::error::TransportError;

/// Datagrams to the same peer must be at least this far apart.
const MIN_SEND_INTERVAL: Duration = Duration::from_millis(2000);

/// Attempts beyond the first before giving up on a receive timeout.
const RETRY_COUNT: u32 = 3;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Enforces [`MIN_SEND_INTERVAL`] between sends using a monotonic clock.
/// Single-threaded by construction: the engine owns one transport and
/// calls are never issued concurrently.
struct RateLimiter {
    min_interval: Duration,
    last_send: Cell<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_send: Cell::new(None) }
    }

    fn wait(&self) {
        if let Some(last) = self.last_send.get() {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
    }

    fn record_send(&self) {
        self.last_send.set(Some(Instant::now()));
    }
}

/// A UDP socket bound to the AniDB server, rate-limited and retrying.
pub struct Transport {
    socket: UdpSocket,
    rate_limiter: RateLimiter,
    banned: Cell<bool>,
}

impl Transport {
    pub fn connect(server_addr: SocketAddr, local_addr: SocketAddr) -> io::Result<Self> {
        Self::connect_with_timeout(server_addr, local_addr, DEFAULT_TIMEOUT)
    }

    pub fn connect_with_timeout(
        server_addr: SocketAddr,
        local_addr: SocketAddr,
        timeout: Duration,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_addr)?;
        socket.set_read_timeout(Some(timeout))?;
        socket.connect(server_addr)?;
        Ok(Self {
            socket,
            rate_limiter: RateLimiter::new(MIN_SEND_INTERVAL),
            banned: Cell::new(false),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends one request line and returns the decrypted response text.
    /// Retries on timeout up to [`RETRY_COUNT`] times; detects a `598`
    /// handshake-broken reply (sent in the clear) before decryption is
    /// even attempted, and a `555` ban after.
    pub fn send_recv(&self, cipher: &dyn Cipher, line: &str) -> Result<String, TransportError> {
        if self.banned.get() {
            return Err(TransportError::Banned);
        }
        let payload = cipher.encrypt(line);
        let mut buf = [0u8; 1500];
        let mut last_err = TransportError::Timeout;

        for attempt in 0..=RETRY_COUNT {
            self.rate_limiter.wait();
            if let Err(e) = self.socket.send(&payload) {
                last_err = TransportError::Io(e);
                continue;
            }
            self.rate_limiter.record_send();

            match self.socket.recv(&mut buf) {
                Ok(n) => {
                    let raw = &buf[..n];
                    if raw.starts_with(b"598 ") {
                        return Err(TransportError::HandshakeBroken);
                    }
                    let decrypted = cipher.decrypt(raw)?;
                    if decrypted.starts_with("555 ") {
                        self.banned.set(true);
                        log::error!("server banned this client");
                        return Err(TransportError::Banned);
                    }
                    return Ok(decrypted);
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    log::warn!("recv timed out (attempt {}/{})", attempt + 1, RETRY_COUNT + 1);
                    last_err = TransportError::Timeout;
                }
                Err(e) => last_err = TransportError::Io(e),
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Plain;

    fn loopback(port_offset: u16) -> (UdpSocket, SocketAddr) {
        let addr: SocketAddr = format!("127.0.0.1:{}", 40000 + port_offset).parse().unwrap();
        (UdpSocket::bind(addr).unwrap(), addr)
    }

    #[test]
    fn send_recv_plain_round_trip() {
        let (server, server_addr) = loopback(1);
        let client_addr: SocketAddr = "127.0.0.1:40101".parse().unwrap();
        let transport =
            Transport::connect_with_timeout(server_addr, client_addr, Duration::from_millis(500))
                .unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1500];
            let (n, peer) = server.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"PING");
            server.send_to(b"PONG", peer).unwrap();
        });

        let resp = transport.send_recv(&Plain, "PING").unwrap();
        assert_eq!(resp, "PONG");
        handle.join().unwrap();
    }

    #[test]
    fn ban_response_sets_sticky_banned_flag() {
        let (server, server_addr) = loopback(2);
        let client_addr: SocketAddr = "127.0.0.1:40102".parse().unwrap();
        let transport =
            Transport::connect_with_timeout(server_addr, client_addr, Duration::from_millis(500))
                .unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1500];
            let (_, peer) = server.recv_from(&mut buf).unwrap();
            server.send_to(b"555 BANNED", peer).unwrap();
        });

        let err = transport.send_recv(&Plain, "ANYTHING").unwrap_err();
        assert!(matches!(err, TransportError::Banned));
        handle.join().unwrap();

        let err2 = transport.send_recv(&Plain, "ANYTHING").unwrap_err();
        assert!(matches!(err2, TransportError::Banned));
    }

    #[test]
    fn recv_timeout_surfaces_as_timeout_error() {
        let client_addr: SocketAddr = "127.0.0.1:40103".parse().unwrap();
        let server_addr: SocketAddr = "127.0.0.1:40203".parse().unwrap();
        let _server = UdpSocket::bind(server_addr).unwrap();
        let transport =
            Transport::connect_with_timeout(server_addr, client_addr, Duration::from_millis(50))
                .unwrap();
        let err = transport.send_recv(&Plain, "HELLO").unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }
}
