//! Error types
//!
//! Defines domain-specific error types for each module of the server, and the
//! [`DavError`] that the access gate hands back to protocol layers.

use std::fmt;
use std::io;
use thiserror::Error;

/// Stable error classification used for protocol status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    InvalidPath,
    QuotaExceeded,
    NotFound,
    Forbidden,
    StorageIoFailure,
    Conflict,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::InvalidPath => "InvalidPath",
            ErrorKind::QuotaExceeded => "QuotaExceeded",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::StorageIoFailure => "StorageIOFailure",
            ErrorKind::Conflict => "Conflict",
        };
        f.write_str(name)
    }
}

/// Metadata database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Path resolution errors
#[derive(Debug, Error)]
pub enum PathError {
    #[error("Invalid user identifier: {0:?}")]
    InvalidUserId(String),
    #[error("Invalid storage path template: {0}")]
    InvalidTemplate(String),
    #[error("Malformed path: {0}")]
    Malformed(String),
    #[error("Path traversal attempt: {0}")]
    Traversal(String),
    #[error("Reserved path component: {0}")]
    Reserved(String),
    #[error("Path escapes storage root: {0}")]
    EscapesRoot(String),
}

/// Quota ledger errors
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Quota exceeded for {user}: requested {requested} bytes, {available} available")]
    Exceeded {
        user: String,
        requested: u64,
        available: u64,
    },
    #[error("No quota account for user: {0}")]
    UnknownUser(String),
    #[error("Unknown quota reservation: {0}")]
    UnknownReservation(u64),
}

/// Storage module errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Parent directory not found: {0}")]
    ParentNotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Is a directory: {0}")]
    IsADirectory(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Version mismatch on {path}: expected {expected}, found {actual}")]
    VersionMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("Upload of {path} aborted after {received} of {expected} bytes")]
    Aborted {
        path: String,
        expected: u64,
        received: u64,
    },
    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Path(#[from] PathError),
}

impl From<rusqlite::Error> for StorageError {
    fn from(error: rusqlite::Error) -> Self {
        StorageError::Database(DatabaseError::Sqlite(error))
    }
}

/// Session module errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("No such session")]
    NoSuchSession,
    #[error("Session expired")]
    SessionExpired,
    #[error("Random number generator failure")]
    Random,
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Authentication and account provisioning errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username: {0}")]
    InvalidUsername(String),
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Invalid password for user: {0}")]
    InvalidPassword(String),
    #[error("User already exists: {0}")]
    UserExists(String),
    #[error("Credential hashing failed")]
    Hashing,
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Error returned by the access gate, wrapping every component error
#[derive(Debug, Error)]
pub enum DavError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Path error: {0}")]
    Path(#[from] PathError),
    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl DavError {
    /// Classifies the error into one of the stable kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DavError::Auth(e) => match e {
                AuthError::UserExists(_) => ErrorKind::Conflict,
                AuthError::UserNotFound(_) => ErrorKind::NotFound,
                AuthError::Path(_) => ErrorKind::InvalidPath,
                AuthError::Hashing | AuthError::Database(_) | AuthError::Io(_) => {
                    ErrorKind::StorageIoFailure
                }
                AuthError::InvalidUsername(_)
                | AuthError::MalformedInput(_)
                | AuthError::InvalidPassword(_) => ErrorKind::Unauthorized,
            },
            DavError::Session(e) => match e {
                SessionError::Random | SessionError::Database(_) => ErrorKind::StorageIoFailure,
                SessionError::InvalidCredentials
                | SessionError::NoSuchSession
                | SessionError::SessionExpired => ErrorKind::Unauthorized,
            },
            DavError::Path(_) => ErrorKind::InvalidPath,
            DavError::Quota(e) => match e {
                QuotaError::Exceeded { .. } => ErrorKind::QuotaExceeded,
                QuotaError::UnknownUser(_) => ErrorKind::Unauthorized,
                QuotaError::UnknownReservation(_) => ErrorKind::StorageIoFailure,
            },
            DavError::Storage(e) => match e {
                StorageError::NotFound(_) | StorageError::ParentNotFound(_) => ErrorKind::NotFound,
                StorageError::AlreadyExists(_)
                | StorageError::NotADirectory(_)
                | StorageError::IsADirectory(_)
                | StorageError::VersionMismatch { .. } => ErrorKind::Conflict,
                StorageError::Forbidden(_) => ErrorKind::Forbidden,
                StorageError::TooLarge { .. } => ErrorKind::QuotaExceeded,
                StorageError::Path(_) => ErrorKind::InvalidPath,
                StorageError::Aborted { .. } | StorageError::Io(_) | StorageError::Database(_) => {
                    ErrorKind::StorageIoFailure
                }
            },
            DavError::Database(_) => ErrorKind::StorageIoFailure,
            DavError::Forbidden(_) => ErrorKind::Forbidden,
        }
    }
}

pub type DavResult<T> = Result<T, DavError>;

/// Errors that stop the server from starting
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Storage path error: {0}")]
    Path(#[from] PathError),
    #[error("Account error: {0}")]
    Auth(#[from] AuthError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
}
