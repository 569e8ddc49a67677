//! Quota ledger
//!
//! Per-user byte accounting. A write claims its bytes up front with
//! [`QuotaLedger::reserve`]; the claim is either committed once the data is
//! published or released if the write fails. The check and the increment
//! happen under the same per-user entry lock, so two concurrent writers can
//! never both pass a check that together would overflow the limit.

use dashmap::DashMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::QuotaError;

/// Handle for a pending reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationId(u64);

impl ReservationId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Snapshot of a user's quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u64,
    /// 0 means unlimited
    pub limit: u64,
}

impl QuotaUsage {
    /// Bytes still available, `None` when unlimited
    pub fn available(&self) -> Option<u64> {
        (self.limit != 0).then(|| self.limit.saturating_sub(self.used))
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }
}

#[derive(Debug)]
struct QuotaAccount {
    limit: u64,
    used: u64,
}

#[derive(Debug)]
struct PendingReservation {
    user: String,
    bytes: u64,
}

/// Concurrent per-user quota accounting
#[derive(Debug, Default)]
pub struct QuotaLedger {
    accounts: DashMap<String, QuotaAccount>,
    pending: DashMap<ReservationId, PendingReservation>,
    next_id: AtomicU64,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the account for a user.
    pub fn register(&self, user: &str, limit: u64, used: u64) {
        self.accounts
            .insert(user.to_string(), QuotaAccount { limit, used });
    }

    /// Drops a user's account and any reservations still pending for it.
    pub fn forget(&self, user: &str) {
        self.accounts.remove(user);
        self.pending.retain(|_, r| r.user != user);
    }

    pub fn set_limit(&self, user: &str, limit: u64) -> Result<(), QuotaError> {
        let mut account = self
            .accounts
            .get_mut(user)
            .ok_or_else(|| QuotaError::UnknownUser(user.to_string()))?;
        account.limit = limit;
        Ok(())
    }

    pub fn usage(&self, user: &str) -> Result<QuotaUsage, QuotaError> {
        self.accounts
            .get(user)
            .map(|a| QuotaUsage {
                used: a.used,
                limit: a.limit,
            })
            .ok_or_else(|| QuotaError::UnknownUser(user.to_string()))
    }

    /// Atomically checks `used + bytes <= limit` and claims the bytes.
    pub fn reserve(&self, user: &str, bytes: u64) -> Result<ReservationId, QuotaError> {
        {
            let mut account = self
                .accounts
                .get_mut(user)
                .ok_or_else(|| QuotaError::UnknownUser(user.to_string()))?;

            if account.limit != 0 {
                let available = account.limit.saturating_sub(account.used);
                if bytes > available {
                    warn!(
                        "Quota exceeded for {}: requested {} bytes, {} of {} used",
                        user, bytes, account.used, account.limit
                    );
                    return Err(QuotaError::Exceeded {
                        user: user.to_string(),
                        requested: bytes,
                        available,
                    });
                }
            }

            account.used = account.used.saturating_add(bytes);
        }

        let id = ReservationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.insert(
            id,
            PendingReservation {
                user: user.to_string(),
                bytes,
            },
        );
        debug!("Reserved {} bytes for {} ({:?})", bytes, user, id);
        Ok(id)
    }

    /// Finalizes a reservation. Counters were already charged by `reserve`.
    pub fn commit(&self, id: ReservationId) -> Result<(), QuotaError> {
        self.pending
            .remove(&id)
            .map(|_| ())
            .ok_or(QuotaError::UnknownReservation(id.0))
    }

    /// Rolls a reservation back, restoring `used` to its prior value.
    pub fn release(&self, id: ReservationId) -> Result<(), QuotaError> {
        let (_, reservation) = self
            .pending
            .remove(&id)
            .ok_or(QuotaError::UnknownReservation(id.0))?;

        if let Some(mut account) = self.accounts.get_mut(&reservation.user) {
            account.used = account.used.saturating_sub(reservation.bytes);
        }
        debug!(
            "Released {} bytes for {} ({:?})",
            reservation.bytes, reservation.user, id
        );
        Ok(())
    }

    /// Returns storage to the user after a delete or a shrinking overwrite.
    pub fn free(&self, user: &str, bytes: u64) -> Result<(), QuotaError> {
        let mut account = self
            .accounts
            .get_mut(user)
            .ok_or_else(|| QuotaError::UnknownUser(user.to_string()))?;
        account.used = account.used.saturating_sub(bytes);
        Ok(())
    }

    /// Reserves with a guard that releases on drop unless committed.
    pub fn reserve_guarded(
        &self,
        user: &str,
        bytes: u64,
    ) -> Result<ReservationGuard<'_>, QuotaError> {
        let id = self.reserve(user, bytes)?;
        Ok(ReservationGuard {
            ledger: self,
            id: Some(id),
        })
    }

    /// Number of reservations neither committed nor released
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Pending reservation that is released when dropped without `commit`.
///
/// Dropping the future of a cancelled request drops the guard, so no
/// reservation outlives its request.
#[derive(Debug)]
pub struct ReservationGuard<'a> {
    ledger: &'a QuotaLedger,
    id: Option<ReservationId>,
}

impl ReservationGuard<'_> {
    pub fn id(&self) -> Option<ReservationId> {
        self.id
    }

    pub fn commit(mut self) -> Result<(), QuotaError> {
        match self.id.take() {
            Some(id) => self.ledger.commit(id),
            None => Ok(()),
        }
    }

    pub fn release(mut self) -> Result<(), QuotaError> {
        match self.id.take() {
            Some(id) => self.ledger.release(id),
            None => Ok(()),
        }
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.ledger.release(id) {
                warn!("Failed to release abandoned reservation: {}", e);
            }
        }
    }
}
