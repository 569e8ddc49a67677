//! Storage operations
//!
//! CRUD over a user's files and directories. Content lives on disk under the
//! user's storage root; metadata (size, timestamp, version tag) lives in the
//! database and is only written after the disk operation succeeded.
//!
//! The store does not touch quota counters. It reports sizes (bytes written,
//! freed, copied) so the access gate can settle them with the ledger.

use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::clock::Clock;
use crate::database::Database;
use crate::error::{PathError, StorageError};
use crate::storage::filesystem::{
    SetAside, StagedUpload, create_directory, new_version_tag, remove_path,
};
use crate::storage::results::{
    CopyResult, DeleteResult, EntryKind, MoveResult, OpenedFile, PutResult, ReadResult,
    StorageEntry,
};
use crate::storage::validation::{PathResolver, ResolvedPath, is_within};

/// Version tag reported for a user's root directory, which has no row.
const ROOT_VERSION: &str = "root";

/// File and directory store for all users
pub struct StorageStore {
    resolver: PathResolver,
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    max_upload_bytes: u64,
}

impl StorageStore {
    pub fn new(
        resolver: PathResolver,
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            resolver,
            db,
            clock,
            max_upload_bytes,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn resolve(&self, user: &str, logical_path: &str) -> Result<ResolvedPath, PathError> {
        self.resolver.resolve(user, logical_path)
    }

    fn root_entry(&self, owner: &str) -> StorageEntry {
        StorageEntry {
            owner: owner.to_string(),
            path: "/".to_string(),
            kind: EntryKind::Directory,
            size: 0,
            modified: self.clock.now(),
            version: ROOT_VERSION.to_string(),
        }
    }

    async fn lookup(&self, path: &ResolvedPath) -> Result<Option<StorageEntry>, StorageError> {
        if path.is_root() {
            return Ok(Some(self.root_entry(path.owner())));
        }
        Ok(self.db.get_entry(path.owner(), path.logical()).await?)
    }

    /// Metadata for a path
    pub async fn stat(&self, path: &ResolvedPath) -> Result<StorageEntry, StorageError> {
        self.lookup(path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.logical().to_string()))
    }

    async fn ensure_parent(&self, path: &ResolvedPath) -> Result<(), StorageError> {
        let parent = path
            .parent_logical()
            .ok_or_else(|| StorageError::Forbidden("the root has no parent".into()))?;

        if parent == "/" {
            let root = self.resolver.storage_root_for(path.owner())?;
            create_directory(&root).await?;
            return Ok(());
        }

        match self.db.get_entry(path.owner(), &parent).await? {
            None => Err(StorageError::ParentNotFound(parent)),
            Some(entry) if !entry.is_dir() => Err(StorageError::NotADirectory(parent)),
            Some(_) => Ok(()),
        }
    }

    /// Writes `len` bytes from `reader` to `path`, all or nothing.
    ///
    /// The content is staged in a temporary file and renamed over the
    /// destination only once every byte has been written and synced. A short
    /// read (client gone) aborts the write and the previous entry, if any, is
    /// left untouched.
    pub async fn put<R>(
        &self,
        path: &ResolvedPath,
        reader: &mut R,
        len: u64,
        if_match: Option<&str>,
    ) -> Result<PutResult, StorageError>
    where
        R: AsyncRead + Unpin,
    {
        if path.is_root() {
            return Err(StorageError::Forbidden("cannot write to the root".into()));
        }

        if self.max_upload_bytes > 0 && len > self.max_upload_bytes {
            return Err(StorageError::TooLarge {
                size: len,
                limit: self.max_upload_bytes,
            });
        }

        self.resolver.verify_on_disk(path)?;

        let existing = self.db.get_entry(path.owner(), path.logical()).await?;
        if let Some(entry) = &existing {
            if entry.is_dir() {
                return Err(StorageError::IsADirectory(path.logical().to_string()));
            }
        }
        check_if_match(path.logical(), existing.as_ref(), if_match)?;
        self.ensure_parent(path).await?;

        let staging = self.resolver.staging_dir_for(path.owner())?;
        let staged = StagedUpload::write(&staging, reader, len).await?;
        if staged.size() != len {
            return Err(StorageError::Aborted {
                path: path.logical().to_string(),
                expected: len,
                received: staged.size(),
            });
        }

        staged.publish(path.absolute()).map_err(|e| {
            error!("Failed to publish {}: {}", path.absolute().display(), e);
            StorageError::Io(e)
        })?;

        let entry = StorageEntry {
            owner: path.owner().to_string(),
            path: path.logical().to_string(),
            kind: EntryKind::File,
            size: len,
            modified: self.clock.now(),
            version: new_version_tag()?,
        };
        self.db.upsert_entry(&entry).await?;

        info!(
            "Stored {} for {} ({} bytes, version {})",
            entry.path, entry.owner, entry.size, entry.version
        );

        Ok(PutResult {
            entry,
            previous_size: existing.map(|e| e.size),
        })
    }

    /// Convenience wrapper around [`StorageStore::put`] for in-memory content
    pub async fn put_bytes(
        &self,
        path: &ResolvedPath,
        content: &[u8],
        if_match: Option<&str>,
    ) -> Result<PutResult, StorageError> {
        let mut reader = content;
        self.put(path, &mut reader, content.len() as u64, if_match)
            .await
    }

    /// Opens a file for streaming its content
    pub async fn open(&self, path: &ResolvedPath) -> Result<OpenedFile, StorageError> {
        let entry = self.stat(path).await?;
        if entry.is_dir() {
            return Err(StorageError::IsADirectory(path.logical().to_string()));
        }

        self.resolver.verify_on_disk(path)?;
        let file = match tokio::fs::File::open(path.absolute()).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.logical().to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let len = file.metadata().await?.len();

        Ok(OpenedFile { entry, file, len })
    }

    /// Reads a whole file into memory together with its metadata
    pub async fn read(&self, path: &ResolvedPath) -> Result<ReadResult, StorageError> {
        let mut opened = self.open(path).await?;
        let mut content = Vec::with_capacity(usize::try_from(opened.len).unwrap_or(0));
        opened.file.read_to_end(&mut content).await?;
        Ok(ReadResult {
            entry: opened.entry,
            content,
        })
    }

    /// Creates a directory; the parent must already exist
    pub async fn mkdir(&self, path: &ResolvedPath) -> Result<StorageEntry, StorageError> {
        if self.lookup(path).await?.is_some() {
            return Err(StorageError::AlreadyExists(path.logical().to_string()));
        }

        self.resolver.verify_on_disk(path)?;
        self.ensure_parent(path).await?;

        match tokio::fs::create_dir(path.absolute()).await {
            Ok(()) => {}
            // Left over on disk without metadata: adopt it.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.absolute().is_dir() => {}
            Err(e) => return Err(StorageError::Io(e)),
        }

        let entry = StorageEntry {
            owner: path.owner().to_string(),
            path: path.logical().to_string(),
            kind: EntryKind::Directory,
            size: 0,
            modified: self.clock.now(),
            version: new_version_tag()?,
        };
        self.db.upsert_entry(&entry).await?;

        info!("Created directory {} for {}", entry.path, entry.owner);
        Ok(entry)
    }

    /// Deletes a file, or a directory and everything beneath it.
    ///
    /// The freed size comes from recorded metadata, not from a disk scan.
    pub async fn delete(
        &self,
        path: &ResolvedPath,
        if_match: Option<&str>,
    ) -> Result<DeleteResult, StorageError> {
        if path.is_root() {
            return Err(StorageError::Forbidden("cannot delete the root".into()));
        }

        let entry = self.stat(path).await?;
        check_if_match(path.logical(), Some(&entry), if_match)?;
        self.resolver.verify_on_disk(path)?;

        remove_path(path.absolute(), entry.is_dir()).await.map_err(|e| {
            error!("Failed to delete {}: {}", path.absolute().display(), e);
            StorageError::Io(e)
        })?;

        let (removed, freed_bytes) = self.db.delete_subtree(path.owner(), path.logical()).await?;

        info!(
            "Deleted {} for {} ({} entries, {} bytes)",
            path.logical(),
            path.owner(),
            removed,
            freed_bytes
        );

        Ok(DeleteResult {
            path: path.logical().to_string(),
            removed,
            freed_bytes,
        })
    }

    fn check_transfer(from: &ResolvedPath, to: &ResolvedPath) -> Result<(), StorageError> {
        if from.owner() != to.owner() {
            return Err(StorageError::Forbidden(format!(
                "cannot transfer {} from {} to {}",
                from.logical(),
                from.owner(),
                to.owner()
            )));
        }

        if to.is_root() {
            return Err(StorageError::Forbidden("cannot replace the root".into()));
        }

        if from.logical() == to.logical() {
            return Err(StorageError::Forbidden(
                "source and destination are the same".into(),
            ));
        }

        if is_within(from.logical(), to.logical()) {
            return Err(StorageError::Forbidden(format!(
                "cannot place {} inside itself",
                from.logical()
            )));
        }

        if is_within(to.logical(), from.logical()) {
            return Err(StorageError::Forbidden(format!(
                "cannot replace {} with one of its descendants",
                to.logical()
            )));
        }

        Ok(())
    }

    /// Size of the files at and below `path`
    pub async fn subtree_size(&self, path: &ResolvedPath) -> Result<u64, StorageError> {
        let entries = self.db.subtree(path.owner(), path.logical()).await?;
        Ok(entries.iter().map(|e| e.size).sum())
    }

    /// Renames an entry within its owner's tree.
    ///
    /// Every moved entry receives a new version tag.
    pub async fn move_entry(
        &self,
        from: &ResolvedPath,
        to: &ResolvedPath,
        overwrite: bool,
        if_match: Option<&str>,
    ) -> Result<MoveResult, StorageError> {
        Self::check_transfer(from, to)?;

        self.resolver.verify_on_disk(from)?;
        self.resolver.verify_on_disk(to)?;

        let source = self.stat(from).await?;
        check_if_match(from.logical(), Some(&source), if_match)?;

        let destination = self.lookup(to).await?;
        if destination.is_some() && !overwrite {
            return Err(StorageError::AlreadyExists(to.logical().to_string()));
        }
        self.ensure_parent(to).await?;

        let staging = self.resolver.staging_dir_for(from.owner())?;
        let (replaced_bytes, aside) = match &destination {
            Some(dest) => {
                let size = self.subtree_size(to).await?;
                let aside = SetAside::take(&staging, to.absolute(), dest.is_dir()).await?;
                (size, aside)
            }
            None => (0, None),
        };

        if let Err(e) = tokio::fs::rename(from.absolute(), to.absolute()).await {
            error!(
                "Failed to rename {} to {}: {}",
                from.absolute().display(),
                to.absolute().display(),
                e
            );
            restore_replaced(aside).await;
            return Err(StorageError::Io(e));
        }

        let moved = match self.record_move(from, to).await {
            Ok(moved) => moved,
            Err(e) => {
                if let Err(undo) = tokio::fs::rename(to.absolute(), from.absolute()).await {
                    error!(
                        "Failed to move {} back to {}: {}",
                        to.absolute().display(),
                        from.absolute().display(),
                        undo
                    );
                }
                restore_replaced(aside).await;
                return Err(e);
            }
        };
        discard_replaced(aside).await;

        let entry = moved
            .into_iter()
            .find(|e| e.path == to.logical())
            .ok_or_else(|| StorageError::NotFound(to.logical().to_string()))?;

        info!(
            "Moved {} to {} for {} (version {})",
            from.logical(),
            to.logical(),
            from.owner(),
            entry.version
        );

        Ok(MoveResult {
            entry,
            replaced_bytes,
        })
    }

    /// Copies a file or directory tree within its owner's tree.
    pub async fn copy_entry(
        &self,
        from: &ResolvedPath,
        to: &ResolvedPath,
        overwrite: bool,
    ) -> Result<CopyResult, StorageError> {
        Self::check_transfer(from, to)?;

        self.resolver.verify_on_disk(from)?;
        self.resolver.verify_on_disk(to)?;

        let source = self.stat(from).await?;
        let destination = self.lookup(to).await?;
        if destination.is_some() && !overwrite {
            return Err(StorageError::AlreadyExists(to.logical().to_string()));
        }
        self.ensure_parent(to).await?;

        let sources = if source.is_dir() {
            self.db.subtree(from.owner(), from.logical()).await?
        } else {
            vec![source.clone()]
        };
        let copied_bytes: u64 = sources.iter().map(|e| e.size).sum();

        let staging = self.resolver.staging_dir_for(from.owner())?;
        let (replaced_bytes, aside) = match &destination {
            Some(dest) => {
                let size = self.subtree_size(to).await?;
                let aside = SetAside::take(&staging, to.absolute(), dest.is_dir()).await?;
                (size, aside)
            }
            None => (0, None),
        };

        let recorded = match self.copy_tree(from, to, &sources, &staging).await {
            Ok(copies) => self
                .db
                .replace_subtrees(from.owner(), &[to.logical()], &copies)
                .await
                .map(|_| copies)
                .map_err(StorageError::from),
            Err(e) => Err(e),
        };
        let copies = match recorded {
            Ok(copies) => copies,
            Err(e) => {
                if let Err(cleanup) = remove_path(to.absolute(), source.is_dir()).await {
                    error!(
                        "Failed to clean up partial copy at {}: {}",
                        to.absolute().display(),
                        cleanup
                    );
                }
                restore_replaced(aside).await;
                return Err(e);
            }
        };
        discard_replaced(aside).await;

        let entry = copies
            .into_iter()
            .find(|e| e.path == to.logical())
            .ok_or_else(|| StorageError::NotFound(to.logical().to_string()))?;

        info!(
            "Copied {} to {} for {} ({} bytes)",
            from.logical(),
            to.logical(),
            from.owner(),
            copied_bytes
        );

        Ok(CopyResult {
            entry,
            copied_bytes,
            replaced_bytes,
        })
    }

    /// Records a completed rename: every entry below `from` moves under `to`
    /// with a fresh version, replacing whatever `to` held.
    async fn record_move(
        &self,
        from: &ResolvedPath,
        to: &ResolvedPath,
    ) -> Result<Vec<StorageEntry>, StorageError> {
        let mut moved = Vec::new();
        for entry in self.db.subtree(from.owner(), from.logical()).await? {
            let path = relocate_logical(from.logical(), to.logical(), &entry.path);
            moved.push(StorageEntry {
                path,
                version: new_version_tag()?,
                ..entry
            });
        }

        self.db
            .replace_subtrees(from.owner(), &[to.logical(), from.logical()], &moved)
            .await?;
        Ok(moved)
    }

    /// Copies each of `sources` from under `from` to under `to` on disk.
    async fn copy_tree(
        &self,
        from: &ResolvedPath,
        to: &ResolvedPath,
        sources: &[StorageEntry],
        staging: &Path,
    ) -> Result<Vec<StorageEntry>, StorageError> {
        let now = self.clock.now();
        let mut copies = Vec::with_capacity(sources.len());

        for entry in sources {
            let source_abs = relocate_absolute(from.absolute(), from.logical(), &entry.path);
            let target_abs = relocate_absolute(to.absolute(), from.logical(), &entry.path);

            let copied = if entry.is_dir() {
                create_directory(&target_abs).await
            } else {
                match StagedUpload::copy_of(staging, &source_abs).await {
                    Ok(staged) => staged.publish(&target_abs),
                    Err(e) => Err(e),
                }
            };

            if let Err(e) = copied {
                error!(
                    "Failed to copy {} to {}: {}",
                    source_abs.display(),
                    target_abs.display(),
                    e
                );
                return Err(StorageError::Io(e));
            }

            copies.push(StorageEntry {
                owner: entry.owner.clone(),
                path: relocate_logical(from.logical(), to.logical(), &entry.path),
                kind: entry.kind,
                size: entry.size,
                modified: now,
                version: new_version_tag()?,
            });
        }

        Ok(copies)
    }

    /// Immediate children of a directory, sorted by path
    pub async fn list(&self, dir: &ResolvedPath) -> Result<Vec<StorageEntry>, StorageError> {
        if !dir.is_root() {
            let entry = self.stat(dir).await?;
            if !entry.is_dir() {
                return Err(StorageError::NotADirectory(dir.logical().to_string()));
            }
        }
        Ok(self.db.list_children(dir.owner(), dir.logical()).await?)
    }

    /// Total bytes recorded for an owner
    pub async fn usage(&self, owner: &str) -> Result<u64, StorageError> {
        Ok(self.db.total_size(owner).await?)
    }

    /// Removes a user's whole storage root from disk
    pub async fn remove_user_storage(&self, owner: &str) -> Result<(), StorageError> {
        let root = self.resolver.storage_root_for(owner)?;
        remove_path(&root, true).await?;
        info!("Removed storage root {}", root.display());
        Ok(())
    }
}

async fn restore_replaced(aside: Option<SetAside>) {
    if let Some(aside) = aside {
        let original = aside.original().to_path_buf();
        if let Err(e) = aside.restore().await {
            error!("Failed to restore {}: {}", original.display(), e);
        }
    }
}

async fn discard_replaced(aside: Option<SetAside>) {
    if let Some(aside) = aside {
        let original = aside.original().to_path_buf();
        if let Err(e) = aside.discard().await {
            warn!("Failed to remove replaced content of {}: {}", original.display(), e);
        }
    }
}

fn check_if_match(
    path: &str,
    current: Option<&StorageEntry>,
    if_match: Option<&str>,
) -> Result<(), StorageError> {
    let Some(expected) = if_match else {
        return Ok(());
    };

    match current {
        Some(entry) if entry.version == expected => Ok(()),
        other => Err(StorageError::VersionMismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual: other.map_or_else(|| "none".to_string(), |e| e.version.clone()),
        }),
    }
}

/// Rewrites `path` from under `from` to under `to`
fn relocate_logical(from: &str, to: &str, path: &str) -> String {
    let rest = if from == "/" { path } else { &path[from.len()..] };
    match (to, rest) {
        (_, "") => to.to_string(),
        ("/", rest) => rest.to_string(),
        (to, rest) => format!("{to}{rest}"),
    }
}

/// On-disk location of `path` when `base_logical` lives at `base_abs`
fn relocate_absolute(base_abs: &Path, base_logical: &str, path: &str) -> PathBuf {
    let rest = if base_logical == "/" {
        path
    } else {
        &path[base_logical.len()..]
    };
    let mut absolute = base_abs.to_path_buf();
    for segment in rest.split('/').filter(|s| !s.is_empty()) {
        absolute.push(segment);
    }
    absolute
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: StorageStore,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let template = format!("{}/storage/%s", dir.path().display());
        let store = StorageStore::new(
            PathResolver::new(&template).unwrap(),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(SystemClock),
            0,
        );
        Fixture { _dir: dir, store }
    }

    fn path(store: &StorageStore, user: &str, p: &str) -> ResolvedPath {
        store.resolve(user, p).unwrap()
    }

    #[tokio::test]
    async fn put_then_read() {
        let f = fixture();
        let p = path(&f.store, "alice", "/hello.txt");
        let put = f.store.put_bytes(&p, b"hello", None).await.unwrap();
        assert_eq!(put.entry.size, 5);
        assert_eq!(put.previous_size, None);

        let read = f.store.read(&p).await.unwrap();
        assert_eq!(read.content, b"hello");
        assert_eq!(read.entry.version, put.entry.version);
    }

    #[tokio::test]
    async fn open_streams_in_chunks() {
        let f = fixture();
        let p = path(&f.store, "alice", "/big.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        f.store.put_bytes(&p, &content, None).await.unwrap();

        let mut opened = f.store.open(&p).await.unwrap();
        assert_eq!(opened.len, 200_000);
        let mut first = [0u8; 4096];
        opened.file.read_exact(&mut first).await.unwrap();
        assert_eq!(&first[..], &content[..4096]);

        let dir = path(&f.store, "alice", "/");
        assert!(matches!(
            f.store.open(&dir).await,
            Err(StorageError::IsADirectory(_) | StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn overwrite_changes_version_and_reports_previous_size() {
        let f = fixture();
        let p = path(&f.store, "alice", "/a.txt");
        let first = f.store.put_bytes(&p, b"one", None).await.unwrap();
        let second = f.store.put_bytes(&p, b"second", None).await.unwrap();
        assert_ne!(first.entry.version, second.entry.version);
        assert_eq!(second.previous_size, Some(3));
    }

    #[tokio::test]
    async fn short_upload_keeps_previous_content() {
        let f = fixture();
        let p = path(&f.store, "alice", "/doc.txt");
        let original = f.store.put_bytes(&p, b"original", None).await.unwrap();

        let mut truncated: &[u8] = b"new";
        let err = f.store.put(&p, &mut truncated, 100, None).await.unwrap_err();
        assert!(matches!(err, StorageError::Aborted { received: 3, .. }));

        let read = f.store.read(&p).await.unwrap();
        assert_eq!(read.content, b"original");
        assert_eq!(read.entry.version, original.entry.version);

        let staging = f.store.resolver().staging_dir_for("alice").unwrap();
        assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn if_match_guards_writes() {
        let f = fixture();
        let p = path(&f.store, "alice", "/c.txt");
        let put = f.store.put_bytes(&p, b"v1", None).await.unwrap();

        let err = f.store.put_bytes(&p, b"v2", Some("stale")).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionMismatch { .. }));

        f.store
            .put_bytes(&p, b"v2", Some(&put.entry.version))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_requires_parent_directory() {
        let f = fixture();
        let p = path(&f.store, "alice", "/missing/file.txt");
        let err = f.store.put_bytes(&p, b"x", None).await.unwrap_err();
        assert!(matches!(err, StorageError::ParentNotFound(_)));
    }

    #[tokio::test]
    async fn mkdir_list_and_recursive_delete() {
        let f = fixture();
        f.store.mkdir(&path(&f.store, "alice", "/docs")).await.unwrap();
        f.store.mkdir(&path(&f.store, "alice", "/docs/sub")).await.unwrap();
        f.store
            .put_bytes(&path(&f.store, "alice", "/docs/a.txt"), b"12345", None)
            .await
            .unwrap();
        f.store
            .put_bytes(&path(&f.store, "alice", "/docs/sub/b.txt"), b"123", None)
            .await
            .unwrap();

        let names: Vec<_> = f
            .store
            .list(&path(&f.store, "alice", "/docs"))
            .await
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "sub"]);

        let root_listing = f.store.list(&path(&f.store, "alice", "/")).await.unwrap();
        assert_eq!(root_listing.len(), 1);

        let docs = path(&f.store, "alice", "/docs");
        let deleted = f.store.delete(&docs, None).await.unwrap();
        assert_eq!(deleted.removed, 4);
        assert_eq!(deleted.freed_bytes, 8);
        assert!(!docs.absolute().exists());
        assert_eq!(f.store.usage("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mkdir_existing_conflicts() {
        let f = fixture();
        let docs = path(&f.store, "alice", "/docs");
        f.store.mkdir(&docs).await.unwrap();
        assert!(matches!(
            f.store.mkdir(&docs).await,
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn move_within_owner_renames_and_retags() {
        let f = fixture();
        f.store.mkdir(&path(&f.store, "alice", "/src")).await.unwrap();
        let original = f
            .store
            .put_bytes(&path(&f.store, "alice", "/src/file.txt"), b"data", None)
            .await
            .unwrap();

        let from = path(&f.store, "alice", "/src");
        let to = path(&f.store, "alice", "/dst");
        let moved = f.store.move_entry(&from, &to, false, None).await.unwrap();
        assert_eq!(moved.entry.path, "/dst");

        let file = f
            .store
            .stat(&path(&f.store, "alice", "/dst/file.txt"))
            .await
            .unwrap();
        assert_ne!(file.version, original.entry.version);
        assert!(matches!(
            f.store.stat(&from).await,
            Err(StorageError::NotFound(_))
        ));

        let read = f
            .store
            .read(&path(&f.store, "alice", "/dst/file.txt"))
            .await
            .unwrap();
        assert_eq!(read.content, b"data");
    }

    #[tokio::test]
    async fn cross_owner_move_is_forbidden() {
        let f = fixture();
        let from = path(&f.store, "alice", "/a.txt");
        f.store.put_bytes(&from, b"a", None).await.unwrap();
        let to = path(&f.store, "bob", "/a.txt");
        assert!(matches!(
            f.store.move_entry(&from, &to, true, None).await,
            Err(StorageError::Forbidden(_))
        ));
        assert!(matches!(
            f.store.copy_entry(&from, &to, true).await,
            Err(StorageError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn move_into_itself_is_forbidden() {
        let f = fixture();
        let dir = path(&f.store, "alice", "/dir");
        f.store.mkdir(&dir).await.unwrap();
        let inside = path(&f.store, "alice", "/dir/inner");
        assert!(matches!(
            f.store.move_entry(&dir, &inside, false, None).await,
            Err(StorageError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn move_without_overwrite_conflicts() {
        let f = fixture();
        let a = path(&f.store, "alice", "/a.txt");
        let b = path(&f.store, "alice", "/b.txt");
        f.store.put_bytes(&a, b"aaa", None).await.unwrap();
        f.store.put_bytes(&b, b"bb", None).await.unwrap();

        assert!(matches!(
            f.store.move_entry(&a, &b, false, None).await,
            Err(StorageError::AlreadyExists(_))
        ));

        let moved = f.store.move_entry(&a, &b, true, None).await.unwrap();
        assert_eq!(moved.replaced_bytes, 2);
        assert_eq!(f.store.read(&b).await.unwrap().content, b"aaa");
        assert_eq!(f.store.usage("alice").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn copy_directory_tree() {
        let f = fixture();
        f.store.mkdir(&path(&f.store, "alice", "/photos")).await.unwrap();
        f.store
            .put_bytes(&path(&f.store, "alice", "/photos/a.jpg"), b"jpeg", None)
            .await
            .unwrap();

        let from = path(&f.store, "alice", "/photos");
        let to = path(&f.store, "alice", "/backup");
        let copied = f.store.copy_entry(&from, &to, false).await.unwrap();
        assert_eq!(copied.copied_bytes, 4);
        assert!(copied.entry.is_dir());

        let read = f
            .store
            .read(&path(&f.store, "alice", "/backup/a.jpg"))
            .await
            .unwrap();
        assert_eq!(read.content, b"jpeg");
        assert_eq!(f.store.usage("alice").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn root_is_protected() {
        let f = fixture();
        let root = path(&f.store, "alice", "/");
        assert!(matches!(
            f.store.delete(&root, None).await,
            Err(StorageError::Forbidden(_))
        ));
        assert!(matches!(
            f.store.put_bytes(&root, b"x", None).await,
            Err(StorageError::Forbidden(_))
        ));
        assert!(f.store.stat(&root).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn upload_cap_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let template = format!("{}/%s", dir.path().display());
        let store = StorageStore::new(
            PathResolver::new(&template).unwrap(),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(SystemClock),
            4,
        );
        let p = store.resolve("alice", "/big").unwrap();
        assert!(matches!(
            store.put_bytes(&p, b"12345", None).await,
            Err(StorageError::TooLarge { .. })
        ));
    }

    #[test]
    fn relocation_helpers() {
        assert_eq!(relocate_logical("/a", "/b", "/a"), "/b");
        assert_eq!(relocate_logical("/a", "/b", "/a/x/y"), "/b/x/y");
        assert_eq!(relocate_logical("/", "/copy", "/x"), "/copy/x");
        assert_eq!(
            relocate_absolute(Path::new("/srv/u/b"), "/a", "/a/x/y"),
            PathBuf::from("/srv/u/b/x/y")
        );
    }
}
