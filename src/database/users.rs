//! User records

use rusqlite::{OptionalExtension, params};

use super::{Database, from_sql_u64, to_sql_u64};
use crate::error::DatabaseError;

/// Persisted user account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub password_hash: String,
    /// 0 means unlimited
    pub quota_limit: u64,
    pub quota_used: u64,
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        password_hash: row.get(1)?,
        quota_limit: from_sql_u64(row.get(2)?),
        quota_used: from_sql_u64(row.get(3)?),
    })
}

impl Database {
    /// Insert a new user. Fails if the id is taken.
    pub async fn insert_user(&self, user: &UserRecord) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, password_hash, quota_limit, quota_used) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id,
                user.password_hash,
                to_sql_u64(user.quota_limit),
                to_sql_u64(user.quota_used)
            ],
        )?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                "SELECT id, password_hash, quota_limit, quota_used FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id, password_hash, quota_limit, quota_used FROM users ORDER BY id")?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for user in rows {
            users.push(user?);
        }
        Ok(users)
    }

    pub async fn set_quota_used(&self, id: &str, used: u64) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET quota_used = ?2 WHERE id = ?1",
            params![id, to_sql_u64(used)],
        )?;
        Ok(())
    }

    pub async fn set_quota_limit(&self, id: &str, limit: u64) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE users SET quota_limit = ?2 WHERE id = ?1",
            params![id, to_sql_u64(limit)],
        )?;
        Ok(updated > 0)
    }

    pub async fn set_password_hash(&self, id: &str, hash: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            params![id, hash],
        )?;
        Ok(updated > 0)
    }

    /// Delete a user together with their sessions and entry metadata.
    pub async fn delete_user(&self, id: &str) -> Result<bool, DatabaseError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM entries WHERE owner = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}
