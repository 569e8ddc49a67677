//! Quota accounting
//!
//! Tracks bytes used against each user's limit.

pub mod ledger;

pub use ledger::{QuotaLedger, QuotaUsage, ReservationGuard, ReservationId};
