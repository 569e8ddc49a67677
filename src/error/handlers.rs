//! Error handlers
//!
//! Maps errors to protocol status codes and logs them at the right level.

use crate::error::types::{DavError, ErrorKind};
use log::{error, warn};

/// Log a gate error; I/O failures are server faults, everything else is a rejected request.
pub fn handle_error(err: &DavError) {
    match err.kind() {
        ErrorKind::StorageIoFailure => error!("Storage failure: {}", err),
        _ => warn!("Request rejected ({}): {}", err.kind(), err),
    }
}

/// Convert an error kind to a protocol status code
pub fn status_code(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Unauthorized => 401,
        ErrorKind::InvalidPath => 400,
        ErrorKind::QuotaExceeded => 507,
        ErrorKind::NotFound => 404,
        ErrorKind::Forbidden => 403,
        ErrorKind::StorageIoFailure => 500,
        ErrorKind::Conflict => 409,
    }
}

/// Convert an error to a protocol status code
pub fn error_status_code(err: &DavError) -> u16 {
    status_code(err.kind())
}
