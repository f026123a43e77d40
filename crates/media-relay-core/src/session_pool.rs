//! Credential pool
//!
//! Holds the configured account sessions in order and a pointer to the one in
//! use. A failover advances the pointer round-robin.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

/// Pool construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionPoolError {
    /// No non-empty credential was configured
    #[error("at least one session string is required")]
    Empty,
}

/// One account's authentication material
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    index: usize,
    raw: String,
}

impl SessionCredential {
    /// Zero-based position in the pool
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// One-based number for display
    #[must_use]
    pub const fn number(&self) -> usize {
        self.index + 1
    }

    /// Raw session string, handed to the transport connector only
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.raw
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("index", &self.index)
            .field("raw", &"[MASKED]")
            .finish()
    }
}

/// A recorded failover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSwitch {
    /// One-based number of the abandoned session
    pub from: usize,
    /// One-based number of the new session
    pub to: usize,
    /// When the switch happened
    pub at: DateTime<Utc>,
}

/// Ordered credentials with a current pointer
#[derive(Debug, Clone)]
pub struct SessionPool {
    sessions: Vec<SessionCredential>,
    current: usize,
    history: Vec<SessionSwitch>,
}

impl SessionPool {
    /// Build a pool from raw session strings; blank entries are dropped
    ///
    /// # Errors
    ///
    /// Returns [`SessionPoolError::Empty`] if nothing usable remains.
    pub fn new<I, S>(raw_sessions: I) -> Result<Self, SessionPoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sessions: Vec<SessionCredential> = raw_sessions
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(index, raw)| SessionCredential { index, raw })
            .collect();

        if sessions.is_empty() {
            return Err(SessionPoolError::Empty);
        }

        info!(sessions = sessions.len(), "Session pool initialized");
        Ok(Self {
            sessions,
            current: 0,
            history: Vec::new(),
        })
    }

    /// Credential in use
    #[must_use]
    pub fn current(&self) -> &SessionCredential {
        &self.sessions[self.current]
    }

    /// Number of configured credentials
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Always false; an empty pool cannot be built
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether failover has anywhere to go
    #[must_use]
    pub fn has_alternates(&self) -> bool {
        self.sessions.len() > 1
    }

    /// Move to the next credential, wrapping around
    pub fn advance(&mut self) -> &SessionCredential {
        let from = self.current;
        self.current = (self.current + 1) % self.sessions.len();
        let switch = SessionSwitch {
            from: from + 1,
            to: self.current + 1,
            at: Utc::now(),
        };
        warn!(
            from = switch.from,
            to = switch.to,
            total = self.sessions.len(),
            "Session switched"
        );
        self.history.push(switch);
        self.current()
    }

    /// Every switch made so far, oldest first
    #[must_use]
    pub fn history(&self) -> &[SessionSwitch] {
        &self.history
    }
}
