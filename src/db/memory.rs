//! Process-local store implementations, used by the `memory` backend and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{RefreshTokenRecord, User};
use crate::db::{TokenStore, UserDirectory};
use crate::error::DatabaseError;

#[derive(Debug, Default, Clone)]
pub struct MemoryTokenStore {
    records: Arc<RwLock<HashMap<String, RefreshTokenRecord>>>,
    // Fingerprints survive the retention sweep so they can never be reissued.
    // Grows by one entry per swept record for the life of the process.
    retired: Arc<RwLock<HashSet<String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn family(&self, family_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.family_id == family_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), DatabaseError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.token_fingerprint)
            || self.retired.read().await.contains(&record.token_fingerprint)
        {
            return Err(DatabaseError::Duplicate);
        }
        records.insert(record.token_fingerprint.clone(), record.clone());
        Ok(())
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        Ok(self.records.read().await.get(fingerprint).cloned())
    }

    async fn revoke(&self, fingerprint: &str) -> Result<bool, DatabaseError> {
        let mut records = self.records.write().await;
        match records.get_mut(fingerprint) {
            Some(record) if !record.is_revoked => {
                record.is_revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate(
        &self,
        fingerprint: &str,
        successor: &RefreshTokenRecord,
    ) -> Result<bool, DatabaseError> {
        let mut records = self.records.write().await;
        if records.contains_key(&successor.token_fingerprint)
            || self.retired.read().await.contains(&successor.token_fingerprint)
        {
            return Err(DatabaseError::Duplicate);
        }
        match records.get_mut(fingerprint) {
            Some(record) if !record.is_revoked => record.is_revoked = true,
            _ => return Ok(false),
        }
        records.insert(successor.token_fingerprint.clone(), successor.clone());
        Ok(true)
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64, DatabaseError> {
        let mut records = self.records.write().await;
        let mut changed = 0;
        for record in records.values_mut() {
            if record.family_id == family_id && !record.is_revoked {
                record.is_revoked = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, DatabaseError> {
        let mut records = self.records.write().await;
        let mut changed = 0;
        for record in records.values_mut() {
            if record.user_id == user_id && !record.is_revoked {
                record.is_revoked = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut records = self.records.write().await;
        let mut retired = self.retired.write().await;
        let before = records.len();
        records.retain(|fingerprint, record| {
            if record.expires_at < cutoff {
                retired.insert(fingerprint.clone());
                false
            } else {
                true
            }
        });
        Ok((before - records.len()) as u64)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<User>, DatabaseError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.subject_id == subject_id)
            .cloned())
    }

    async fn create(&self, user: &User) -> Result<User, DatabaseError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || users.values().any(|u| u.subject_id == user.subject_id) {
            return Err(DatabaseError::Duplicate);
        }
        users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn update(&self, user: &User) -> Result<User, DatabaseError> {
        let mut users = self.users.write().await;
        let slot = users.get_mut(&user.id).ok_or(DatabaseError::NotFound)?;
        *slot = User {
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(slot.clone())
    }
}
