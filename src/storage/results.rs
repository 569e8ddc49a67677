//! Storage result types
//!
//! Defines the entry metadata returned by storage operations.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::DatabaseError;

/// Kind of a storage entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(EntryKind::File),
            "directory" => Ok(EntryKind::Directory),
            other => Err(DatabaseError::Corrupt(format!("unknown entry kind {other:?}"))),
        }
    }
}

/// Metadata for a file or directory owned by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub owner: String,
    /// Normalized logical path, unique per owner
    pub path: String,
    pub kind: EntryKind,
    /// Always 0 for directories
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Opaque tag that changes on every mutation
    pub version: String,
}

impl StorageEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Last segment of the path
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }
}

/// A file opened for streaming, `len` taken from the open handle
#[derive(Debug)]
pub struct OpenedFile {
    pub entry: StorageEntry,
    pub file: tokio::fs::File,
    pub len: u64,
}

/// Result of a content read
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub entry: StorageEntry,
    pub content: Vec<u8>,
}

/// Result of a delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    pub path: String,
    /// Entries removed, including descendants
    pub removed: usize,
    /// Aggregate size of removed files
    pub freed_bytes: u64,
}

/// Result of a move
#[derive(Debug, Clone)]
pub struct MoveResult {
    pub entry: StorageEntry,
    /// Bytes freed by an overwritten destination
    pub replaced_bytes: u64,
}

/// Result of a copy
#[derive(Debug, Clone)]
pub struct CopyResult {
    pub entry: StorageEntry,
    /// Aggregate size of copied files
    pub copied_bytes: u64,
    /// Bytes freed by an overwritten destination
    pub replaced_bytes: u64,
}

/// Result of a write
#[derive(Debug, Clone)]
pub struct PutResult {
    pub entry: StorageEntry,
    /// Size of the entry that was overwritten, if any
    pub previous_size: Option<u64>,
}
