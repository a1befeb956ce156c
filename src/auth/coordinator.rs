//! Deduplicating work queue for refresh-token rotation.
//!
//! Every rotation request becomes a unit of work keyed by the fingerprint of
//! the presented token. While a unit for a key is queued or running, further
//! submissions for that key attach to it and receive its result instead of
//! running the rotation again. Units are spawned onto the runtime, so a caller
//! that gives up waiting never cancels the store mutation in progress.
//!
//! A successful unit is kept for a short grace window after it settles. A
//! caller retrying after `QueueTimeout`, or a duplicate that arrives just
//! late, gets the same pair rather than presenting a consumed token to the
//! store. Failed units are dropped at once so the next submission retries.
//!
//! When the coordinator is disabled or shut down, rotations run directly on
//! the caller's task and results are marked `degraded`. In that mode
//! concurrent duplicates are still prevented from double-rotating by the
//! store's atomic claim, but all but one of them will observe
//! `ReuseDetected` and revoke the family.

use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, warn};

use crate::auth::rotation::RotationProtocol;
use crate::auth::token::{fingerprint, TokenPair};
use crate::config::CoordinatorConfig;
use crate::error::AuthError;

type UnitResult = Result<TokenPair, AuthError>;
type Unit = Shared<BoxFuture<'static, UnitResult>>;
type Registry = Arc<Mutex<HashMap<String, Entry>>>;

enum Entry {
    Running(Unit),
    Settled(TokenPair),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotated {
    pub pair: TokenPair,
    /// Produced without deduplication; concurrent duplicates were not coalesced.
    pub degraded: bool,
}

pub struct RefreshCoordinator {
    rotation: Arc<RotationProtocol>,
    registry: Registry,
    workers: Arc<Semaphore>,
    timeout: Duration,
    settled_grace: Duration,
    enabled: bool,
}

impl RefreshCoordinator {
    /// The settled grace window defaults to `timeout`.
    pub fn new(rotation: Arc<RotationProtocol>, workers: usize, timeout: Duration) -> Self {
        Self {
            rotation,
            registry: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
            settled_grace: timeout,
            enabled: true,
        }
    }

    pub fn from_config(rotation: Arc<RotationProtocol>, config: &CoordinatorConfig) -> Self {
        let mut coordinator = Self::new(
            rotation,
            config.workers,
            Duration::from_secs(config.timeout_secs),
        )
        .with_settled_grace(Duration::from_secs(config.settled_grace_secs));
        coordinator.enabled = config.enabled;
        coordinator
    }

    pub fn with_settled_grace(mut self, grace: Duration) -> Self {
        self.settled_grace = grace;
        self
    }

    /// Direct, unsynchronized execution only.
    pub fn disabled(rotation: Arc<RotationProtocol>) -> Self {
        let mut coordinator = Self::new(rotation, 1, Duration::from_secs(30));
        coordinator.enabled = false;
        coordinator
    }

    pub fn is_available(&self) -> bool {
        self.enabled && !self.workers.is_closed()
    }

    /// Stops admitting units. Already admitted units still run to completion.
    pub fn shutdown(&self) {
        self.workers.close();
    }

    /// Units queued or running; settled entries are not counted.
    pub async fn in_flight(&self) -> usize {
        self.registry
            .lock()
            .await
            .values()
            .filter(|entry| matches!(entry, Entry::Running(_)))
            .count()
    }

    pub async fn submit(&self, refresh_token: &str) -> Result<Rotated, AuthError> {
        if !self.is_available() {
            warn!("refresh coordinator unavailable, rotating without deduplication");
            let pair = self.rotation.rotate(refresh_token).await?;
            return Ok(Rotated { pair, degraded: true });
        }

        let unit = self.admit(refresh_token).await;
        match tokio::time::timeout(self.timeout, unit).await {
            Ok(result) => result.map(|pair| Rotated { pair, degraded: false }),
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "timed out waiting for rotation");
                Err(AuthError::QueueTimeout)
            }
        }
    }

    async fn admit(&self, refresh_token: &str) -> Unit {
        let key = fingerprint(refresh_token);
        let mut registry = self.registry.lock().await;

        match registry.get(&key) {
            Some(Entry::Running(unit)) => {
                debug!("joining in-flight rotation");
                return unit.clone();
            }
            Some(Entry::Settled(pair)) => {
                debug!("replaying settled rotation");
                let result: UnitResult = Ok(pair.clone());
                return future::ready(result).boxed().shared();
            }
            None => {}
        }

        let rotation = self.rotation.clone();
        let workers = self.workers.clone();
        let shared_registry = self.registry.clone();
        let grace = self.settled_grace;
        let token = refresh_token.to_string();
        let unit_key = key.clone();

        // The registry lock is held until the unit is inserted, so the task
        // cannot settle its key before it exists.
        let handle = tokio::spawn(async move {
            let _permit = workers.acquire_owned().await.ok();
            let result = rotation.rotate(&token).await;
            settle(shared_registry, unit_key, &result, grace).await;
            result
        });

        let unit = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    error!("rotation unit failed: {}", e);
                    Err(AuthError::Internal("rotation unit failed".into()))
                })
            })
            .boxed()
            .shared();

        registry.insert(key, Entry::Running(unit.clone()));
        unit
    }
}

async fn settle(registry: Registry, key: String, result: &UnitResult, grace: Duration) {
    let pair = match result {
        Ok(pair) if !grace.is_zero() => pair.clone(),
        _ => {
            registry.lock().await.remove(&key);
            return;
        }
    };

    registry.lock().await.insert(key.clone(), Entry::Settled(pair));
    // A consumed key never gets a new running unit, so only our entry can be here.
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        registry.lock().await.remove(&key);
    });
}
