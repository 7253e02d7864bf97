//! Error taxonomy for the crypto/session/transport layer (spec.md §7).

use crate::crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("datagram receive timed out")]
    Timeout,
    #[error("banned by server")]
    Banned,
    #[error("encryption handshake broken (598 received)")]
    HandshakeBroken,
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Proto(#[from] anidb_proto::ProtoError),
    #[error("banned by server")]
    Banned,
    #[error("unexpected response code: expected {expected}, got {got}")]
    BadCode { expected: u16, got: u16 },
    #[error("server sent a malformed greeting: {0:?}")]
    Protocol(String),
    #[error("local session/cache I/O error: {0}")]
    LocalIo(#[from] std::io::Error),
}
