//! Response handling
//!
//! Status codes and line formatting for the control protocol. Codes follow
//! HTTP so WebDAV-minded clients can read them at a glance.

use chrono::SecondsFormat;

use crate::error::DavError;
use crate::error::handlers::error_status_code;
use crate::quota::QuotaUsage;
use crate::storage::StorageEntry;

pub const OK: u16 = 200;
pub const CREATED: u16 = 201;
pub const NO_CONTENT: u16 = 204;
pub const BAD_REQUEST: u16 = 400;
pub const UNAUTHORIZED: u16 = 401;
pub const FORBIDDEN: u16 = 403;
pub const URI_TOO_LONG: u16 = 414;
pub const NOT_IMPLEMENTED: u16 = 501;
pub const SERVICE_UNAVAILABLE: u16 = 503;

/// Format a response line
pub fn format_response(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}

/// Format a gate error as a response line.
///
/// Without `show_details` the client only learns the status and error kind.
pub fn format_error(err: &DavError, show_details: bool) -> String {
    let code = error_status_code(err);
    if show_details {
        format_response(code, &format!("{}: {}", err.kind(), err))
    } else {
        format_response(code, &err.kind().to_string())
    }
}

/// `<kind> <size> <version> <modified> <href>`
pub fn format_entry(entry: &StorageEntry, href: &str) -> String {
    format!(
        "{} {} {} {} {}",
        entry.kind,
        entry.size,
        entry.version,
        entry.modified.to_rfc3339_opts(SecondsFormat::Secs, true),
        href
    )
}

/// `<used> <limit> <available>`, limit and availability spelled out when unlimited
pub fn format_quota(usage: &QuotaUsage) -> String {
    match usage.available() {
        Some(available) => format!("{} {} {}", usage.used, usage.limit, available),
        None => format!("{} unlimited unlimited", usage.used),
    }
}
