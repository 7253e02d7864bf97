//! Session lifecycle state machine (spec.md §4.5):
//!
//! ```text
//! NEW --ENCRYPT 209--> ENC_NEGOTIATED --AUTH 200/201--> ACTIVE
//! NEW --AUTH 200/201------------------------------------> ACTIVE
//! ACTIVE --idle > 30min--> EXPIRED --AUTH 200/201--> ACTIVE
//! ACTIVE --501-----------> NEW (caller re-authenticates)
//! ACTIVE --555-----------> BANNED (terminal)
//! ACTIVE --LOGOUT--------> CLOSED
//! ```
//!
//! The source's narrative text and its state-machine diagram disagree on
//! the idle threshold (30 vs 35 minutes); this implementation follows the
//! narrative's 30 minutes as the more central statement of behaviour (see
//! DESIGN.md).

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::paths::PathsConfig;

/// Idle sessions are treated as expired after this long without traffic.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A persisted session is only reused if it was written within this long
/// ago; anything older is assumed stale even before a server round trip.
const PERSISTED_SESSION_MAX_AGE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    New,
    EncNegotiated { salt: String },
    Active { token: String, last_activity: Instant },
    Expired,
    Banned,
    Closed,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    session_key: String,
    sockaddr: String,
    salt: Option<String>,
    timestamp: u64,
}

pub struct Session {
    state: SessionState,
    paths: PathsConfig,
    persistent: bool,
}

impl Session {
    pub fn new(paths: PathsConfig, persistent: bool) -> Self {
        Self { state: SessionState::New, paths, persistent }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn token(&self) -> Option<String> {
        match &self.state {
            SessionState::Active { token, .. } => Some(token.clone()),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    pub fn is_banned(&self) -> bool {
        matches!(self.state, SessionState::Banned)
    }

    pub fn is_expired(&self) -> bool {
        match &self.state {
            SessionState::Active { last_activity, .. } => last_activity.elapsed() > IDLE_TIMEOUT,
            SessionState::Expired => true,
            _ => false,
        }
    }

    pub fn note_encrypted(&mut self, salt: String) {
        log::debug!("session NEW -> ENC_NEGOTIATED");
        self.state = SessionState::EncNegotiated { salt };
    }

    pub fn mark_active(&mut self, token: String, local_addr: SocketAddr) {
        log::info!("session -> ACTIVE");
        self.state = SessionState::Active { token: token.clone(), last_activity: Instant::now() };
        if self.persistent {
            let salt = None;
            if let Err(e) = self.persist(&token, local_addr, salt) {
                log::warn!("failed to persist session: {e}");
            }
        }
    }

    pub fn note_activity(&mut self) {
        if let SessionState::Active { last_activity, .. } = &mut self.state {
            *last_activity = Instant::now();
        }
    }

    /// Drops back to `NEW` so the next call re-authenticates; used both
    /// for idle expiry and for the server's `501` ("please log in").
    pub fn reset(&mut self) {
        log::debug!("session -> NEW (reset)");
        self.state = SessionState::New;
    }

    pub fn mark_banned(&mut self) {
        log::error!("session -> BANNED");
        self.state = SessionState::Banned;
    }

    /// Drops to `CLOSED`. Per spec.md §4.5, the persisted session file is
    /// deleted on a non-persistent close; a persistent close leaves it on
    /// disk so the next invocation can reuse it within the 10-minute
    /// window.
    pub fn close(&mut self) {
        log::info!("session -> CLOSED");
        self.state = SessionState::Closed;
        if !self.persistent {
            let _ = std::fs::remove_file(self.paths.session_path());
        }
    }

    fn persist(
        &self,
        token: &str,
        local_addr: SocketAddr,
        salt: Option<String>,
    ) -> std::io::Result<()> {
        self.paths.ensure_dir()?;
        let record = PersistedSession {
            session_key: token.to_string(),
            sockaddr: local_addr.to_string(),
            salt,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        std::fs::write(self.paths.session_path(), json)
    }

    /// Loads a previously persisted session if it exists and is recent
    /// enough to be worth trying without a fresh `AUTH` round trip.
    pub fn try_reuse_persisted(&mut self) -> bool {
        let Ok(bytes) = std::fs::read(self.paths.session_path()) else {
            return false;
        };
        let Ok(record) = serde_json::from_slice::<PersistedSession>(&bytes) else {
            return false;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now.saturating_sub(record.timestamp) > PERSISTED_SESSION_MAX_AGE.as_secs() {
            return false;
        }
        let Ok(addr) = record.sockaddr.parse::<SocketAddr>() else {
            return false;
        };
        log::debug!("reusing persisted session");
        self.mark_active(record.session_key, addr);
        true
    }
}

pub fn session_exists_on_disk(paths: &PathsConfig) -> bool {
    Path::new(&paths.session_path()).exists()
}
