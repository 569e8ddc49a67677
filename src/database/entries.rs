//! Storage entry metadata

use rusqlite::{OptionalExtension, Transaction, params};

use super::{Database, from_sql_u64, to_sql_u64};
use crate::clock::from_unix;
use crate::error::DatabaseError;
use crate::storage::results::{EntryKind, StorageEntry};
use crate::storage::validation::parent_of;

const ENTRY_COLUMNS: &str = "owner, path, kind, size, modified, version";

// (path = ?2 OR path starts with "?2/") for a given owner
const SUBTREE_FILTER: &str = "owner = ?1 AND (path = ?2 OR substr(path, 1, length(?3)) = ?3)";

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<StorageEntry> {
    let kind: String = row.get(2)?;
    let kind = kind.parse::<EntryKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StorageEntry {
        owner: row.get(0)?,
        path: row.get(1)?,
        kind,
        size: from_sql_u64(row.get(3)?),
        modified: from_unix(row.get(4)?),
        version: row.get(5)?,
    })
}

fn subtree_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

fn insert_entry(tx: &Transaction<'_>, entry: &StorageEntry) -> rusqlite::Result<()> {
    let parent = parent_of(&entry.path).unwrap_or_default();
    tx.execute(
        "INSERT OR REPLACE INTO entries (owner, path, parent, kind, size, modified, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.owner,
            entry.path,
            parent,
            entry.kind.as_str(),
            to_sql_u64(entry.size),
            entry.modified.timestamp(),
            entry.version
        ],
    )?;
    Ok(())
}

fn delete_subtree_in(
    tx: &Transaction<'_>,
    owner: &str,
    path: &str,
) -> rusqlite::Result<(usize, u64)> {
    let prefix = subtree_prefix(path);
    let freed: i64 = tx.query_row(
        &format!("SELECT COALESCE(SUM(size), 0) FROM entries WHERE {SUBTREE_FILTER}"),
        params![owner, path, prefix],
        |row| row.get(0),
    )?;
    let removed = tx.execute(
        &format!("DELETE FROM entries WHERE {SUBTREE_FILTER}"),
        params![owner, path, prefix],
    )?;
    Ok((removed, from_sql_u64(freed)))
}

impl Database {
    pub async fn get_entry(
        &self,
        owner: &str,
        path: &str,
    ) -> Result<Option<StorageEntry>, DatabaseError> {
        let conn = self.conn.lock().await;
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE owner = ?1 AND path = ?2"),
                params![owner, path],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Insert or replace one entry
    pub async fn upsert_entry(&self, entry: &StorageEntry) -> Result<(), DatabaseError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        insert_entry(&tx, entry)?;
        tx.commit()?;
        Ok(())
    }

    /// Immediate children of a directory, sorted by path
    pub async fn list_children(
        &self,
        owner: &str,
        parent: &str,
    ) -> Result<Vec<StorageEntry>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE owner = ?1 AND parent = ?2 ORDER BY path"
        ))?;
        let rows = stmt.query_map(params![owner, parent], row_to_entry)?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// The entry at `path` and all of its descendants, sorted by path
    pub async fn subtree(&self, owner: &str, path: &str) -> Result<Vec<StorageEntry>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE {SUBTREE_FILTER} ORDER BY path"
        ))?;
        let rows = stmt.query_map(params![owner, path, subtree_prefix(path)], row_to_entry)?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// Removes `path` and its descendants, returning (entries removed, bytes freed).
    pub async fn delete_subtree(
        &self,
        owner: &str,
        path: &str,
    ) -> Result<(usize, u64), DatabaseError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let result = delete_subtree_in(&tx, owner, path)?;
        tx.commit()?;
        Ok(result)
    }

    /// Atomically removes the given subtrees and inserts `entries`.
    ///
    /// Returns the bytes freed by the removed subtrees.
    pub async fn replace_subtrees(
        &self,
        owner: &str,
        remove: &[&str],
        entries: &[StorageEntry],
    ) -> Result<u64, DatabaseError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut freed = 0u64;
        for path in remove {
            let (_, bytes) = delete_subtree_in(&tx, owner, path)?;
            freed = freed.saturating_add(bytes);
        }
        for entry in entries {
            insert_entry(&tx, entry)?;
        }
        tx.commit()?;
        Ok(freed)
    }

    /// Sum of file sizes recorded for an owner
    pub async fn total_size(&self, owner: &str) -> Result<u64, DatabaseError> {
        let conn = self.conn.lock().await;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM entries WHERE owner = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(from_sql_u64(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(owner: &str, path: &str, kind: EntryKind, size: u64) -> StorageEntry {
        StorageEntry {
            owner: owner.to_string(),
            path: path.to_string(),
            kind,
            size,
            modified: Utc::now(),
            version: format!("v-{path}"),
        }
    }

    async fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        for e in [
            entry("alice", "/docs", EntryKind::Directory, 0),
            entry("alice", "/docs/a.txt", EntryKind::File, 10),
            entry("alice", "/docs/sub", EntryKind::Directory, 0),
            entry("alice", "/docs/sub/b.txt", EntryKind::File, 20),
            entry("alice", "/docsy.txt", EntryKind::File, 5),
            entry("bob", "/docs/a.txt", EntryKind::File, 99),
        ] {
            db.upsert_entry(&e).await.unwrap();
        }
        db
    }

    #[tokio::test]
    async fn children_are_scoped_by_owner_and_parent() {
        let db = seeded().await;
        let names: Vec<_> = db
            .list_children("alice", "/docs")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(names, vec!["/docs/a.txt", "/docs/sub"]);

        let root: Vec<_> = db
            .list_children("alice", "/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(root, vec!["/docs", "/docsy.txt"]);
    }

    #[tokio::test]
    async fn subtree_does_not_match_sibling_prefixes() {
        let db = seeded().await;
        let subtree = db.subtree("alice", "/docs").await.unwrap();
        assert_eq!(subtree.len(), 4);
        assert!(subtree.iter().all(|e| e.path != "/docsy.txt"));
    }

    #[tokio::test]
    async fn delete_subtree_reports_freed_bytes() {
        let db = seeded().await;
        let (removed, freed) = db.delete_subtree("alice", "/docs").await.unwrap();
        assert_eq!(removed, 4);
        assert_eq!(freed, 30);
        assert_eq!(db.total_size("alice").await.unwrap(), 5);
        assert_eq!(db.total_size("bob").await.unwrap(), 99);
    }

    #[tokio::test]
    async fn replace_subtrees_is_atomic_swap() {
        let db = seeded().await;
        let moved = vec![entry("alice", "/moved.txt", EntryKind::File, 5)];
        let freed = db
            .replace_subtrees("alice", &["/docsy.txt"], &moved)
            .await
            .unwrap();
        assert_eq!(freed, 5);
        assert!(db.get_entry("alice", "/docsy.txt").await.unwrap().is_none());
        assert_eq!(
            db.get_entry("alice", "/moved.txt").await.unwrap().unwrap().size,
            5
        );
    }
}
