//! User directory
//!
//! Account provisioning on top of the database: creation with the default
//! quota, credential checks, quota changes and cascading deletion. Keeps the
//! quota ledger in step with the persisted accounts.

use log::{info, warn};
use std::sync::Arc;

use super::credentials::{hash_password_async, verify_password_async};
use super::validator::{validate_password, validate_username};
use crate::config::CoreConfig;
use crate::database::{Database, UserRecord};
use crate::error::AuthError;
use crate::quota::QuotaLedger;
use crate::storage::filesystem::{create_directory, remove_path};
use crate::storage::validation::PathResolver;

pub struct UserDirectory {
    db: Arc<Database>,
    ledger: Arc<QuotaLedger>,
    resolver: PathResolver,
    default_quota: u64,
    hash_iterations: u32,
}

impl UserDirectory {
    pub fn new(
        db: Arc<Database>,
        ledger: Arc<QuotaLedger>,
        resolver: PathResolver,
        core: &CoreConfig,
    ) -> Self {
        Self {
            db,
            ledger,
            resolver,
            default_quota: core.default_quota_bytes,
            hash_iterations: core.password_hash_iterations,
        }
    }

    /// Registers every persisted account with the ledger.
    ///
    /// Usage is recomputed from entry metadata, which is authoritative over
    /// the stored counter.
    pub async fn load_accounts(&self) -> Result<usize, AuthError> {
        let users = self.db.list_users().await?;
        for user in &users {
            let used = self.db.total_size(&user.id).await?;
            if used != user.quota_used {
                warn!(
                    "Recorded usage for {} was {} bytes, metadata says {}",
                    user.id, user.quota_used, used
                );
                self.db.set_quota_used(&user.id, used).await?;
            }
            self.ledger.register(&user.id, user.quota_limit, used);
        }
        info!("Loaded {} user accounts", users.len());
        Ok(users.len())
    }

    /// Creates a user with the configured default quota.
    pub async fn create_user(&self, id: &str, password: &str) -> Result<UserRecord, AuthError> {
        self.create_user_with_quota(id, password, self.default_quota)
            .await
    }

    pub async fn create_user_with_quota(
        &self,
        id: &str,
        password: &str,
        quota_limit: u64,
    ) -> Result<UserRecord, AuthError> {
        validate_username(id)?;
        validate_password(password)?;

        if self.db.get_user(id).await?.is_some() {
            return Err(AuthError::UserExists(id.to_string()));
        }

        let root = self.resolver.storage_root_for(id)?;
        create_directory(&root).await?;

        let record = UserRecord {
            id: id.to_string(),
            password_hash: hash_password_async(password, self.hash_iterations).await?,
            quota_limit,
            quota_used: 0,
        };
        self.db.insert_user(&record).await?;
        self.ledger.register(id, quota_limit, 0);

        info!("Created user {} with quota {} bytes", id, quota_limit);
        Ok(record)
    }

    pub async fn get_user(&self, id: &str) -> Result<UserRecord, AuthError> {
        self.db
            .get_user(id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(id.to_string()))
    }

    /// Checks a username and password against the stored hash.
    pub async fn verify_credentials(
        &self,
        id: &str,
        password: &str,
    ) -> Result<UserRecord, AuthError> {
        validate_username(id)?;
        validate_password(password)?;

        let user = self.get_user(id).await?;
        if verify_password_async(password, &user.password_hash).await {
            Ok(user)
        } else {
            Err(AuthError::InvalidPassword(id.to_string()))
        }
    }

    pub async fn set_password(&self, id: &str, password: &str) -> Result<(), AuthError> {
        validate_password(password)?;
        let hash = hash_password_async(password, self.hash_iterations).await?;
        if !self.db.set_password_hash(id, &hash).await? {
            return Err(AuthError::UserNotFound(id.to_string()));
        }
        info!("Password changed for {}", id);
        Ok(())
    }

    /// Changes a user's quota limit. Existing usage above the new limit is
    /// kept; only further growth is refused.
    pub async fn set_quota(&self, id: &str, limit: u64) -> Result<(), AuthError> {
        if !self.db.set_quota_limit(id, limit).await? {
            return Err(AuthError::UserNotFound(id.to_string()));
        }
        if self.ledger.set_limit(id, limit).is_err() {
            let used = self.db.total_size(id).await?;
            self.ledger.register(id, limit, used);
        }
        info!("Quota for {} set to {} bytes", id, limit);
        Ok(())
    }

    /// Writes the ledger's current usage back to the user record.
    pub async fn persist_usage(&self, id: &str) -> Result<(), AuthError> {
        if let Ok(usage) = self.ledger.usage(id) {
            self.db.set_quota_used(id, usage.used).await?;
        }
        Ok(())
    }

    /// Deletes a user's record, sessions rows, entries, and storage root.
    ///
    /// In-memory sessions must be revoked by the caller.
    pub async fn delete_user(&self, id: &str) -> Result<(), AuthError> {
        if !self.db.delete_user(id).await? {
            return Err(AuthError::UserNotFound(id.to_string()));
        }

        self.ledger.forget(id);
        let root = self.resolver.storage_root_for(id)?;
        remove_path(&root, true).await?;

        info!("Deleted user {} and storage root {}", id, root.display());
        Ok(())
    }
}
