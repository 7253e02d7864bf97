//! Ties crypto, session, and transport together into the single entry
//! point the query planner calls through (spec.md §4.5/§4.6, scenario S6).

use std::net::SocketAddr;

use anidb_proto::{parse_raw_response, Query, RawResponse, Request};

use crate::crypto::{Aes128Ecb, Cipher, Plain};
use crate::error::{EngineError, TransportError};
use crate::paths::PathsConfig;
use crate::session::Session;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub server_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub username: String,
    pub password: String,
    pub api_key: Option<String>,
    pub client_name: String,
    pub client_version: u32,
    pub persistent_session: bool,
}

/// The client's side of the session/transport/crypto stack. Owns exactly
/// one UDP socket and serialises every call through it.
pub struct Engine {
    transport: Transport,
    session: Session,
    cipher: Box<dyn Cipher>,
    config: EngineConfig,
}

impl Engine {
    pub fn connect(config: EngineConfig, paths: PathsConfig) -> Result<Self, EngineError> {
        let transport = Transport::connect(config.server_addr, config.local_addr)
            .map_err(TransportError::Io)?;
        let mut session = Session::new(paths, config.persistent_session);
        if config.persistent_session {
            session.try_reuse_persisted();
        }
        Ok(Self { transport, session, cipher: Box::new(Plain), config })
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.token()
    }

    pub fn is_banned(&self) -> bool {
        self.session.is_banned()
    }

    /// Negotiates `ENCRYPT` if an API key is configured and encryption
    /// hasn't already been set up. A no-op for plaintext sessions.
    pub fn ensure_encrypted(&mut self) -> Result<(), EngineError> {
        let Some(api_key) = self.config.api_key.clone() else {
            return Ok(());
        };
        let line = format!("ENCRYPT user={}&type=1", self.config.username);
        let raw = self.transport.send_recv(self.cipher.as_ref(), &line)?;
        let parsed = parse_raw_response(&raw)?;
        if parsed.code != 209 {
            return Err(EngineError::BadCode { expected: 209, got: parsed.code });
        }
        let salt = parsed
            .tag
            .split_whitespace()
            .next()
            .ok_or_else(|| EngineError::Protocol(parsed.tag.clone()))?
            .to_string();
        self.cipher = Box::new(Aes128Ecb::derive(&api_key, &salt));
        self.session.note_encrypted(salt);
        Ok(())
    }

    pub fn login(&mut self) -> Result<(), EngineError> {
        let line = format!(
            "AUTH user={}&pass={}&protover=3&client={}&clientver={}&enc=UTF8",
            self.config.username, self.config.password, self.config.client_name, self.config.client_version
        );
        let raw = self.transport.send_recv(self.cipher.as_ref(), &line)?;
        let parsed = parse_raw_response(&raw)?;
        match parsed.code {
            200 | 201 => {
                let token = parsed
                    .tag
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| EngineError::Protocol(parsed.tag.clone()))?
                    .to_string();
                self.session.mark_active(token, self.config.local_addr);
                Ok(())
            }
            555 => {
                self.session.mark_banned();
                Err(EngineError::Banned)
            }
            other => Err(EngineError::BadCode { expected: 200, got: other }),
        }
    }

    pub fn logout(&mut self) {
        if let Some(token) = self.session.token() {
            let line = format!("LOGOUT s={token}");
            let _ = self.transport.send_recv(self.cipher.as_ref(), &line);
        }
        self.session.close();
    }

    fn set_session_token(req: &mut Request, token: &str) {
        match req {
            Request::File(q) => q.session = Some(token.to_string()),
            Request::AnimeDesc(q) => q.session = Some(token.to_string()),
            Request::MylistAdd(q) => q.session = Some(token.to_string()),
        }
    }

    /// Sends a request, authenticating first if the session isn't active,
    /// and transparently re-authenticating once if the server answers
    /// `501` mid-call (spec.md scenario S6).
    pub fn call(&mut self, req: &mut Request) -> Result<RawResponse, EngineError> {
        if self.session.is_banned() {
            return Err(EngineError::Banned);
        }
        if self.session.is_expired() {
            self.session.reset();
        }
        if !self.session.is_active() {
            self.login()?;
        }
        if let Some(token) = self.session.token() {
            Self::set_session_token(req, &token);
        }

        let raw = self.transport.send_recv(self.cipher.as_ref(), &req.serialise())?;
        let parsed = parse_raw_response(&raw)?;

        match parsed.code {
            555 => {
                self.session.mark_banned();
                Err(EngineError::Banned)
            }
            501 => {
                log::warn!("server demanded login mid-call, re-authenticating once");
                self.session.reset();
                self.login()?;
                if let Some(token) = self.session.token() {
                    Self::set_session_token(req, &token);
                }
                let raw = self.transport.send_recv(self.cipher.as_ref(), &req.serialise())?;
                let parsed = parse_raw_response(&raw)?;
                self.session.note_activity();
                Ok(parsed)
            }
            _ => {
                self.session.note_activity();
                Ok(parsed)
            }
        }
    }
}
