//! Persistence for refresh-token lineage and the user directory.
//!
//! The Token Store is the single authority for revocation state. It must stay
//! correct under arbitrary interleaving of calls for unrelated tokens; the
//! concurrency primitives callers may rely on are [`TokenStore::revoke`],
//! which flips a record and reports whether this call was the one that did,
//! and [`TokenStore::rotate`], which does the same and stores the successor
//! in the same step.

pub mod memory;
pub mod models;
pub mod operations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;

pub use memory::{MemoryTokenStore, MemoryUserDirectory};
pub use models::{DeviceType, RefreshTokenRecord, User};
pub use operations::{PgTokenStore, PgUserDirectory};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fails with [`DatabaseError::Duplicate`] if the fingerprint was ever stored.
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), DatabaseError>;

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError>;

    /// Atomically marks one record revoked. Returns `true` only for the call
    /// that performed the transition; `false` if absent or already revoked.
    async fn revoke(&self, fingerprint: &str) -> Result<bool, DatabaseError>;

    /// Claims `fingerprint` and stores `successor` as one unit of work.
    /// Returns `false`, storing nothing, if the claim was lost. If the insert
    /// fails, the claim is rolled back and the presented token stays live.
    async fn rotate(
        &self,
        fingerprint: &str,
        successor: &RefreshTokenRecord,
    ) -> Result<bool, DatabaseError>;

    /// Revokes every record of a family in one operation; returns how many changed.
    async fn revoke_family(&self, family_id: Uuid) -> Result<u64, DatabaseError>;

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, DatabaseError>;

    /// Retention sweep: deletes records whose `expires_at` is before `cutoff`,
    /// regardless of `is_revoked`.
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<User>, DatabaseError>;

    async fn create(&self, user: &User) -> Result<User, DatabaseError>;

    async fn update(&self, user: &User) -> Result<User, DatabaseError>;
}
