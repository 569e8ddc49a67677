//! Session manager
//!
//! Issues tokens on login and validates them on every request. Sessions are
//! kept in memory for lookup and mirrored to the database so they survive a
//! restart. Expiry is checked lazily at validation time; `sweep_expired`
//! reclaims sessions nobody asked about.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;

use super::token::TokenSigner;
use crate::auth::UserDirectory;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::database::{Database, SessionRecord};
use crate::error::{AuthError, SessionError};

/// Lifecycle state of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    /// Logged out, swept, or never issued. Terminal.
    Revoked,
}

/// Session handed to the client after login
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    sessions: DashMap<String, SessionRecord>,
    users: Arc<UserDirectory>,
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    signer: TokenSigner,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(
        users: Arc<UserDirectory>,
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        core: &CoreConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            users,
            db,
            clock,
            signer: TokenSigner::new(&core.secret_key, &core.previous_secret_keys),
            timeout: core.session_timeout(),
        }
    }

    /// Reloads unexpired sessions from the database.
    pub async fn load(&self) -> Result<usize, SessionError> {
        let now = self.clock.now();
        let purged = self.db.delete_expired_sessions(now).await?;
        if purged > 0 {
            debug!("Dropped {} expired sessions at startup", purged);
        }

        let mut loaded = 0;
        for record in self.db.list_sessions().await? {
            if now < record.expires_at {
                self.sessions.insert(record.id.clone(), record);
                loaded += 1;
            }
        }
        info!("Restored {} sessions", loaded);
        Ok(loaded)
    }

    /// Verifies credentials and opens a new session.
    pub async fn login(&self, user: &str, password: &str) -> Result<Session, SessionError> {
        let account = match self.users.verify_credentials(user, password).await {
            Ok(account) => account,
            Err(AuthError::Database(e)) => return Err(SessionError::Database(e)),
            Err(e) => {
                warn!("Login failed for {:?}: {}", user, e);
                return Err(SessionError::InvalidCredentials);
            }
        };

        let (id, token) = self.signer.issue()?;
        let created_at = self.clock.now();
        let record = SessionRecord {
            id: id.clone(),
            user_id: account.id,
            created_at,
            expires_at: created_at + self.timeout,
        };

        self.db.insert_session(&record).await?;
        self.sessions.insert(id.clone(), record.clone());

        // The account may have been deleted while the password was checked.
        if self.db.get_user(&record.user_id).await?.is_none() {
            self.sessions.remove(&id);
            self.db.delete_session(&id).await?;
            warn!("Login raced deletion of {}", record.user_id);
            return Err(SessionError::InvalidCredentials);
        }

        info!(
            "Session opened for {} (expires {})",
            record.user_id, record.expires_at
        );

        Ok(Session {
            token,
            user_id: record.user_id,
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
    }

    /// Returns the user owning an active session.
    pub async fn validate(&self, token: &str) -> Result<String, SessionError> {
        let id = self.signer.verify(token).ok_or(SessionError::NoSuchSession)?;

        let (user_id, expires_at) = {
            let record = self.sessions.get(&id).ok_or(SessionError::NoSuchSession)?;
            (record.user_id.clone(), record.expires_at)
        };

        if self.clock.now() >= expires_at {
            self.sessions.remove(&id);
            self.db.delete_session(&id).await?;
            debug!("Session for {} expired at {}", user_id, expires_at);
            return Err(SessionError::SessionExpired);
        }

        Ok(user_id)
    }

    /// Current state of a token without side effects
    pub fn state(&self, token: &str) -> SessionState {
        let Some(id) = self.signer.verify(token) else {
            return SessionState::Revoked;
        };
        match self.sessions.get(&id) {
            Some(record) if self.clock.now() >= record.expires_at => SessionState::Expired,
            Some(_) => SessionState::Active,
            None => SessionState::Revoked,
        }
    }

    /// Ends a session. Later validation fails with `NoSuchSession`.
    pub async fn logout(&self, token: &str) -> Result<(), SessionError> {
        let id = self.signer.verify(token).ok_or(SessionError::NoSuchSession)?;
        let (_, record) = self
            .sessions
            .remove(&id)
            .ok_or(SessionError::NoSuchSession)?;
        self.db.delete_session(&id).await?;
        info!("Session closed for {}", record.user_id);
        Ok(())
    }

    /// Drops every session belonging to a user.
    pub async fn revoke_user(&self, user: &str) -> Result<usize, SessionError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.user_id != user);
        let revoked = before.saturating_sub(self.sessions.len());
        self.db.delete_user_sessions(user).await?;
        if revoked > 0 {
            info!("Revoked {} sessions for {}", revoked, user);
        }
        Ok(revoked)
    }

    /// Removes expired sessions from memory and the database.
    pub async fn sweep_expired(&self) -> Result<usize, SessionError> {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, record| now < record.expires_at);
        let swept = before.saturating_sub(self.sessions.len());
        self.db.delete_expired_sessions(now).await?;
        if swept > 0 {
            info!("Swept {} expired sessions", swept);
        }
        Ok(swept)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}
