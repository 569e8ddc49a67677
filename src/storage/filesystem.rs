//! File system operations
//!
//! Disk-level helpers for the storage store: staged uploads that are
//! published with an atomic rename, tolerant removal, and version tags.

use ring::rand::{SecureRandom, SystemRandom};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const VERSION_TAG_BYTES: usize = 12;

/// Fresh opaque version tag
pub fn new_version_tag() -> io::Result<String> {
    let mut bytes = [0u8; VERSION_TAG_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| io::Error::other("system random source unavailable"))?;
    Ok(hex::encode(bytes))
}

/// Create a directory and any missing parents
pub async fn create_directory(path: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Remove a file or directory tree; a missing path is not an error.
pub async fn remove_path(path: &Path, is_dir: bool) -> io::Result<()> {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// An existing entry parked in the staging directory while its replacement
/// is put in place. It goes back with [`SetAside::restore`] or away with
/// [`SetAside::discard`].
#[derive(Debug)]
pub struct SetAside {
    original: PathBuf,
    held: PathBuf,
    is_dir: bool,
}

impl SetAside {
    /// Renames `original` into `staging_dir`. `None` when nothing is on disk.
    pub async fn take(staging_dir: &Path, original: &Path, is_dir: bool) -> io::Result<Option<Self>> {
        create_directory(staging_dir).await?;
        let held = staging_dir.join(format!("replaced-{}", new_version_tag()?));
        match tokio::fs::rename(original, &held).await {
            Ok(()) => Ok(Some(Self {
                original: original.to_path_buf(),
                held,
                is_dir,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    /// Puts the entry back where it was taken from.
    pub async fn restore(self) -> io::Result<()> {
        tokio::fs::rename(&self.held, &self.original).await
    }

    pub async fn discard(self) -> io::Result<()> {
        remove_path(&self.held, self.is_dir).await
    }
}

/// Content written to a temporary file in the staging directory.
///
/// The temporary file is deleted when this value is dropped, so an upload
/// that is abandoned (error, cancelled request) never leaves debris behind.
#[derive(Debug)]
pub struct StagedUpload {
    temp: NamedTempFile,
    size: u64,
}

impl StagedUpload {
    /// Streams at most `limit` bytes from `reader` into a new staging file, then syncs it.
    pub async fn write<R>(staging_dir: &Path, reader: &mut R, limit: u64) -> io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        create_directory(staging_dir).await?;
        let temp = NamedTempFile::new_in(staging_dir)?;
        let mut file = tokio::fs::File::from_std(temp.as_file().try_clone()?);

        let mut limited = reader.take(limit);
        let size = tokio::io::copy(&mut limited, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        Ok(Self { temp, size })
    }

    /// Copies an existing file into the staging directory.
    pub async fn copy_of(staging_dir: &Path, source: &Path) -> io::Result<Self> {
        let mut file = tokio::fs::File::open(source).await?;
        Self::write(staging_dir, &mut file, u64::MAX).await
    }

    /// Bytes actually written
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Atomically renames the staged file over `dest`.
    pub fn publish(self, dest: &Path) -> io::Result<()> {
        self.temp.persist(dest).map(|_| ()).map_err(|e| e.error)
    }
}
