//! Identity resolution: maps an opaque connector `connection_id` to the
//! gateway `user_id` that tool and resource calls act for.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use stas_core::link_code::{generate_link_code, hash_token};

mod memory;
mod postgres;

pub use memory::MemoryLinkStore;
pub use postgres::PgLinkStore;

/// How long a link code from `GET /link` stays redeemable.
pub const LINK_CODE_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Unknown,
    Pending,
    Linked { user_id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("connection is not linked to a user")]
    Unlinked { connection_id: Option<String> },
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("connection {connection_id} has no pending link; start with GET /link")]
    NotPending { connection_id: String },
    #[error("connection {connection_id} is already linked")]
    AlreadyLinked { connection_id: String },
    #[error("link code is invalid or expired")]
    InvalidCode,
    #[error("session identities are disabled on this bridge")]
    SessionDisabled,
    #[error("link store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        IdentityError::Store(err.to_string())
    }
}

/// Key-value capability behind the resolver. Last write wins per
/// `connection_id`; writes to different ids never interfere.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn status(&self, connection_id: &str) -> Result<LinkStatus, IdentityError>;

    /// Record that linking started and store the hash of a fresh link code,
    /// replacing any earlier one. Never downgrades an existing link.
    async fn mark_pending(
        &self,
        connection_id: &str,
        code_hash: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(), IdentityError>;

    async fn link(&self, connection_id: &str, user_id: &str) -> Result<(), IdentityError>;

    /// Link a pending connection if `code_hash` matches a code issued no
    /// earlier than `issued_after`. The code is consumed. Returns whether
    /// the link was made.
    async fn complete(
        &self,
        connection_id: &str,
        code_hash: &str,
        user_id: &str,
        issued_after: DateTime<Utc>,
    ) -> Result<bool, IdentityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Fixed,
    Session,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user_id: String,
    pub source: IdentitySource,
}

/// Result of starting the link flow. `code` is only set while pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStart {
    pub status: LinkStatus,
    pub code: Option<String>,
}

fn connection_key(connection_id: Option<&str>) -> String {
    connection_id.map(str::trim).unwrap_or_default().to_string()
}

/// Resolution order: fixed identity, then a session identity set through the
/// session tools, then the stored link.
#[derive(Clone)]
pub struct IdentityResolver {
    fixed_user_id: Option<String>,
    store: Arc<dyn LinkStore>,
    sessions: Arc<RwLock<HashMap<String, String>>>,
    session_writes: bool,
}

impl IdentityResolver {
    pub fn new(fixed_user_id: Option<String>, store: Arc<dyn LinkStore>) -> Self {
        Self {
            fixed_user_id: fixed_user_id.filter(|id| !id.trim().is_empty()),
            store,
            sessions: Arc::default(),
            session_writes: false,
        }
    }

    /// Allow `session.set_user_id`. Off unless the operator opts in.
    pub fn with_session_writes(mut self, allowed: bool) -> Self {
        self.session_writes = allowed;
        self
    }

    pub async fn resolve(
        &self,
        connection_id: Option<&str>,
    ) -> Result<ResolvedIdentity, IdentityError> {
        if let Some(user_id) = &self.fixed_user_id {
            return Ok(ResolvedIdentity {
                user_id: user_id.clone(),
                source: IdentitySource::Fixed,
            });
        }

        if let Some(user_id) = self.session_user(connection_id) {
            return Ok(ResolvedIdentity {
                user_id,
                source: IdentitySource::Session,
            });
        }

        let connection_id = connection_id.map(str::trim).filter(|id| !id.is_empty());
        let Some(connection_id) = connection_id else {
            return Err(IdentityError::Unlinked {
                connection_id: None,
            });
        };

        match self.store.status(connection_id).await? {
            LinkStatus::Linked { user_id } => Ok(ResolvedIdentity {
                user_id,
                source: IdentitySource::Link,
            }),
            LinkStatus::Pending | LinkStatus::Unknown => Err(IdentityError::Unlinked {
                connection_id: Some(connection_id.to_string()),
            }),
        }
    }

    /// Store `connection_id -> user_id` unconditionally. The HTTP link flow
    /// goes through [`IdentityResolver::complete_link`] instead.
    pub async fn link(&self, connection_id: &str, user_id: &str) -> Result<(), IdentityError> {
        let connection_id = connection_id.trim();
        let user_id = user_id.trim();
        if connection_id.is_empty() {
            return Err(IdentityError::InvalidInput("connection_id must be provided"));
        }
        if user_id.is_empty() {
            return Err(IdentityError::InvalidInput("user_id must be provided"));
        }
        self.store.link(connection_id, user_id).await?;
        tracing::info!(event = "connection_linked", connection_id, "connection linked");
        Ok(())
    }

    /// Mark a connection pending and issue a one-time link code. A linked
    /// connection is reported as is, without a code.
    pub async fn start_link(&self, connection_id: &str) -> Result<LinkStart, IdentityError> {
        let connection_id = connection_id.trim();
        if connection_id.is_empty() {
            return Err(IdentityError::InvalidInput("connection_id must be provided"));
        }
        if let status @ LinkStatus::Linked { .. } = self.store.status(connection_id).await? {
            return Ok(LinkStart { status, code: None });
        }

        let (code, code_hash) = generate_link_code();
        self.store
            .mark_pending(connection_id, &code_hash, Utc::now())
            .await?;
        let status = self.store.status(connection_id).await?;
        let code = (status == LinkStatus::Pending).then_some(code);
        tracing::info!(event = "link_started", connection_id, "link code issued");
        Ok(LinkStart { status, code })
    }

    /// Redeem a link code for a pending connection.
    pub async fn complete_link(
        &self,
        connection_id: &str,
        code: &str,
        user_id: &str,
    ) -> Result<LinkStatus, IdentityError> {
        let connection_id = connection_id.trim();
        let user_id = user_id.trim();
        if connection_id.is_empty() {
            return Err(IdentityError::InvalidInput("connection_id must be provided"));
        }
        if code.trim().is_empty() {
            return Err(IdentityError::InvalidInput("code must be provided"));
        }
        if user_id.is_empty() {
            return Err(IdentityError::InvalidInput("user_id must be provided"));
        }

        match self.store.status(connection_id).await? {
            LinkStatus::Pending => {}
            LinkStatus::Unknown => {
                return Err(IdentityError::NotPending {
                    connection_id: connection_id.to_string(),
                });
            }
            LinkStatus::Linked { .. } => {
                return Err(IdentityError::AlreadyLinked {
                    connection_id: connection_id.to_string(),
                });
            }
        }

        let issued_after = Utc::now() - Duration::minutes(LINK_CODE_TTL_MINUTES);
        let linked = self
            .store
            .complete(connection_id, &hash_token(code), user_id, issued_after)
            .await?;
        if !linked {
            tracing::warn!(event = "link_code_rejected", connection_id, "link code rejected");
            return Err(IdentityError::InvalidCode);
        }
        tracing::info!(event = "connection_linked", connection_id, "connection linked");
        Ok(LinkStatus::Linked {
            user_id: user_id.to_string(),
        })
    }

    pub async fn status(&self, connection_id: &str) -> Result<LinkStatus, IdentityError> {
        self.store.status(connection_id.trim()).await
    }

    /// Session identity for this connection (or the connection-less session).
    pub fn session_user(&self, connection_id: Option<&str>) -> Option<String> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(&connection_key(connection_id)).cloned()
    }

    pub fn set_session_user(
        &self,
        connection_id: Option<&str>,
        user_id: &str,
    ) -> Result<(), IdentityError> {
        if !self.session_writes {
            return Err(IdentityError::SessionDisabled);
        }
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(IdentityError::InvalidInput("user_id must be provided"));
        }
        let key = connection_key(connection_id);
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(key.clone(), user_id.to_string());
        tracing::info!(event = "session_user_set", connection_id = %key, "session identity set");
        Ok(())
    }

    /// Returns whether a session identity was removed.
    pub fn clear_session_user(&self, connection_id: Option<&str>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(&connection_key(connection_id)).is_some()
    }
}
