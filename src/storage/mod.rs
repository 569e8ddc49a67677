//! File system storage management
//!
//! Path resolution, on-disk content, and the metadata-backed store.

pub mod filesystem;
pub mod locks;
pub mod operations;
pub mod results;
pub mod validation;

pub use locks::{PathGuard, PathLocks};
pub use operations::StorageStore;
pub use results::{
    CopyResult, DeleteResult, EntryKind, MoveResult, OpenedFile, PutResult, ReadResult,
    StorageEntry,
};
pub use validation::{PathResolver, ResolvedPath, STAGING_DIR};
