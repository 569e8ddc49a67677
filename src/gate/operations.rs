//! Access gate operations
//!
//! Every client operation passes through here: the session is validated, the
//! path is resolved inside the caller's root, quota is reserved before any
//! mutation and settled after it.

use log::{error, info};
use std::sync::Arc;
use tokio::io::AsyncRead;

use super::results::Destination;
use crate::auth::UserDirectory;
use crate::database::UserRecord;
use crate::error::{DavError, DavResult, StorageError};
use crate::middleware::thumbnails::{ThumbnailRequest, ThumbnailSink, is_image_path};
use crate::quota::{QuotaLedger, QuotaUsage};
use crate::session::{Session, SessionManager};
use crate::storage::{
    CopyResult, DeleteResult, MoveResult, OpenedFile, PathLocks, ReadResult, ResolvedPath,
    StorageEntry, StorageStore,
};

pub struct AccessGate {
    sessions: Arc<SessionManager>,
    users: Arc<UserDirectory>,
    ledger: Arc<QuotaLedger>,
    store: Arc<StorageStore>,
    locks: PathLocks,
    thumbnails: Option<Arc<dyn ThumbnailSink>>,
}

impl AccessGate {
    pub fn new(
        sessions: Arc<SessionManager>,
        users: Arc<UserDirectory>,
        ledger: Arc<QuotaLedger>,
        store: Arc<StorageStore>,
    ) -> Self {
        Self {
            sessions,
            users,
            ledger,
            store,
            locks: PathLocks::new(),
            thumbnails: None,
        }
    }

    /// Emit thumbnail requests for images written through this gate.
    pub fn with_thumbnails(mut self, sink: Arc<dyn ThumbnailSink>) -> Self {
        self.thumbnails = Some(sink);
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn store(&self) -> &StorageStore {
        &self.store
    }

    /// Exchanges credentials for a session.
    pub async fn authenticate(&self, user: &str, password: &str) -> DavResult<Session> {
        Ok(self.sessions.login(user, password).await?)
    }

    pub async fn logout(&self, token: &str) -> DavResult<()> {
        Ok(self.sessions.logout(token).await?)
    }

    /// Validates a token and returns the user behind it.
    pub async fn authorize(&self, token: &str) -> DavResult<String> {
        Ok(self.sessions.validate(token).await?)
    }

    fn resolve(&self, user: &str, path: &str) -> DavResult<ResolvedPath> {
        Ok(self.store.resolve(user, path)?)
    }

    fn resolve_destination(&self, user: &str, to: &Destination) -> DavResult<ResolvedPath> {
        let owner = to.owner.as_deref().unwrap_or(user);
        self.resolve(owner, &to.path)
    }

    async fn settle_usage(&self, user: &str) {
        if let Err(e) = self.users.persist_usage(user).await {
            error!("Failed to record quota usage for {}: {}", user, e);
        }
    }

    fn notify_thumbnail(&self, entry: &StorageEntry) {
        if let Some(sink) = &self.thumbnails {
            if is_image_path(&entry.path) {
                sink.notify(ThumbnailRequest {
                    owner: entry.owner.clone(),
                    path: entry.path.clone(),
                    version: entry.version.clone(),
                });
            }
        }
    }

    pub async fn stat(&self, token: &str, path: &str) -> DavResult<StorageEntry> {
        let user = self.authorize(token).await?;
        let path = self.resolve(&user, path)?;
        Ok(self.store.stat(&path).await?)
    }

    pub async fn read(&self, token: &str, path: &str) -> DavResult<ReadResult> {
        let user = self.authorize(token).await?;
        let path = self.resolve(&user, path)?;
        Ok(self.store.read(&path).await?)
    }

    /// Opens a file for streaming to the client.
    pub async fn open(&self, token: &str, path: &str) -> DavResult<OpenedFile> {
        let user = self.authorize(token).await?;
        let path = self.resolve(&user, path)?;
        Ok(self.store.open(&path).await?)
    }

    pub async fn list(&self, token: &str, path: &str) -> DavResult<Vec<StorageEntry>> {
        let user = self.authorize(token).await?;
        let path = self.resolve(&user, path)?;
        Ok(self.store.list(&path).await?)
    }

    pub async fn quota(&self, token: &str) -> DavResult<QuotaUsage> {
        let user = self.authorize(token).await?;
        Ok(self.ledger.usage(&user)?)
    }

    /// Writes `len` bytes read from `reader`.
    ///
    /// Only growth over the current size is reserved; a shrinking overwrite
    /// returns the difference once the new content is in place.
    pub async fn write<R>(
        &self,
        token: &str,
        path: &str,
        reader: &mut R,
        len: u64,
        if_match: Option<&str>,
    ) -> DavResult<StorageEntry>
    where
        R: AsyncRead + Unpin,
    {
        let user = self.authorize(token).await?;
        let path = self.resolve(&user, path)?;
        let _lock = self
            .locks
            .lock(PathLocks::key(&user, path.logical()))
            .await;

        let old_size = match self.store.stat(&path).await {
            Ok(entry) => entry.size,
            Err(StorageError::NotFound(_)) => 0,
            Err(e) => return Err(e.into()),
        };

        let reservation = self
            .ledger
            .reserve_guarded(&user, len.saturating_sub(old_size))?;

        let put = match self.store.put(&path, reader, len, if_match).await {
            Ok(put) => put,
            Err(e) => {
                reservation.release()?;
                return Err(e.into());
            }
        };
        reservation.commit()?;

        if old_size > len {
            self.ledger.free(&user, old_size - len)?;
        }
        self.settle_usage(&user).await;
        self.notify_thumbnail(&put.entry);

        Ok(put.entry)
    }

    /// Convenience wrapper around [`AccessGate::write`] for in-memory content
    pub async fn write_bytes(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        if_match: Option<&str>,
    ) -> DavResult<StorageEntry> {
        let mut reader = content;
        self.write(token, path, &mut reader, content.len() as u64, if_match)
            .await
    }

    pub async fn mkdir(&self, token: &str, path: &str) -> DavResult<StorageEntry> {
        let user = self.authorize(token).await?;
        let path = self.resolve(&user, path)?;
        let _lock = self
            .locks
            .lock(PathLocks::key(&user, path.logical()))
            .await;

        // Directories take no space, but the account must still exist.
        let reservation = self.ledger.reserve_guarded(&user, 0)?;
        match self.store.mkdir(&path).await {
            Ok(entry) => {
                reservation.commit()?;
                Ok(entry)
            }
            Err(e) => {
                reservation.release()?;
                Err(e.into())
            }
        }
    }

    pub async fn delete(
        &self,
        token: &str,
        path: &str,
        if_match: Option<&str>,
    ) -> DavResult<DeleteResult> {
        let user = self.authorize(token).await?;
        let path = self.resolve(&user, path)?;
        let _lock = self
            .locks
            .lock(PathLocks::key(&user, path.logical()))
            .await;

        let deleted = self.store.delete(&path, if_match).await?;
        self.ledger.free(&user, deleted.freed_bytes)?;
        self.settle_usage(&user).await;
        Ok(deleted)
    }

    /// Moves an entry within the caller's tree.
    ///
    /// A destination in another user's tree is refused.
    pub async fn move_entry(
        &self,
        token: &str,
        from: &str,
        to: &Destination,
        overwrite: bool,
        if_match: Option<&str>,
    ) -> DavResult<MoveResult> {
        let user = self.authorize(token).await?;
        let from = self.resolve(&user, from)?;
        let to = self.resolve_destination(&user, to)?;
        let _lock = self
            .locks
            .lock_many(vec![
                PathLocks::key(from.owner(), from.logical()),
                PathLocks::key(to.owner(), to.logical()),
            ])
            .await;

        let moved = self.store.move_entry(&from, &to, overwrite, if_match).await?;
        if moved.replaced_bytes > 0 {
            self.ledger.free(&user, moved.replaced_bytes)?;
            self.settle_usage(&user).await;
        }
        Ok(moved)
    }

    /// Copies an entry within the caller's tree, charging the copy's size.
    pub async fn copy_entry(
        &self,
        token: &str,
        from: &str,
        to: &Destination,
        overwrite: bool,
    ) -> DavResult<CopyResult> {
        let user = self.authorize(token).await?;
        let from = self.resolve(&user, from)?;
        let to = self.resolve_destination(&user, to)?;
        if from.owner() != to.owner() {
            return Err(DavError::Forbidden(format!(
                "cannot copy into the tree of {}",
                to.owner()
            )));
        }

        let _lock = self
            .locks
            .lock_many(vec![
                PathLocks::key(from.owner(), from.logical()),
                PathLocks::key(to.owner(), to.logical()),
            ])
            .await;

        let source_size = self.store.subtree_size(&from).await?;
        let replaced_size = if overwrite {
            self.store.subtree_size(&to).await?
        } else {
            0
        };

        let reservation = self
            .ledger
            .reserve_guarded(&user, source_size.saturating_sub(replaced_size))?;

        let copied = match self.store.copy_entry(&from, &to, overwrite).await {
            Ok(copied) => copied,
            Err(e) => {
                reservation.release()?;
                return Err(e.into());
            }
        };
        reservation.commit()?;

        if copied.replaced_bytes > copied.copied_bytes {
            self.ledger
                .free(&user, copied.replaced_bytes - copied.copied_bytes)?;
        }
        self.settle_usage(&user).await;
        Ok(copied)
    }

    /// Provisions a user with the default quota.
    pub async fn create_user(&self, user: &str, password: &str) -> DavResult<UserRecord> {
        Ok(self.users.create_user(user, password).await?)
    }

    /// Deletes a user together with their sessions, entries and content.
    ///
    /// Sessions are revoked after the account row is gone, so a login racing
    /// the deletion either fails or is revoked here.
    pub async fn delete_user(&self, user: &str) -> DavResult<()> {
        self.users.delete_user(user).await?;
        self.sessions.revoke_user(user).await?;
        info!("User {} removed", user);
        Ok(())
    }
}
