//! Session records

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::Database;
use crate::clock::from_unix;
use crate::error::DatabaseError;

/// Persisted session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Hex session id (the unsigned half of the token)
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        created_at: from_unix(row.get(2)?),
        expires_at: from_unix(row.get(3)?),
    })
}

impl Database {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id,
                session.user_id,
                session.created_at.timestamp(),
                session.expires_at.timestamp()
            ],
        )?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, DatabaseError> {
        let conn = self.conn.lock().await;
        let session = conn
            .query_row(
                "SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = ?1",
                params![id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id, user_id, created_at, expires_at FROM sessions")?;
        let rows = stmt.query_map([], row_to_session)?;

        let mut sessions = Vec::new();
        for session in rows {
            sessions.push(session?);
        }
        Ok(sessions)
    }

    pub async fn delete_session(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub async fn delete_user_sessions(&self, user_id: &str) -> Result<usize, DatabaseError> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
        Ok(deleted)
    }

    /// Remove every session whose expiry is at or before `now`
    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![now.timestamp()],
        )?;
        Ok(deleted)
    }
}
