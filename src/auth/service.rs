use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::coordinator::{RefreshCoordinator, Rotated};
use crate::auth::identity::IdentityVerifier;
use crate::auth::issuer::TokenIssuer;
use crate::auth::token::{fingerprint, TokenPair};
use crate::db::models::{DeviceType, User};
use crate::db::{TokenStore, UserDirectory};
use crate::error::AuthError;

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub pair: TokenPair,
}

/// Session lifecycle on top of the issuer, coordinator and collaborators.
pub struct AuthService {
    identity: Arc<dyn IdentityVerifier>,
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn TokenStore>,
    issuer: Arc<TokenIssuer>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthService {
    pub fn new(
        identity: Arc<dyn IdentityVerifier>,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn TokenStore>,
        issuer: Arc<TokenIssuer>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            identity,
            users,
            store,
            issuer,
            coordinator,
        }
    }

    /// Exchanges an external credential for a fresh token family.
    pub async fn login(
        &self,
        credential: &str,
        device_type: DeviceType,
    ) -> Result<LoginOutcome, AuthError> {
        let identity = self.identity.verify(credential).await?;

        // Find or create user, refreshing the profile fields the provider owns
        let user = match self.users.find_by_subject(&identity.subject_id).await? {
            Some(existing) => {
                let refreshed = User {
                    email: identity.email,
                    display_name: identity.display_name.or(existing.display_name.clone()),
                    avatar: identity.avatar.or(existing.avatar.clone()),
                    last_login: Some(Utc::now()),
                    ..existing
                };
                self.users.update(&refreshed).await?
            }
            None => {
                let mut user = User::new(
                    identity.subject_id,
                    identity.email,
                    identity.display_name,
                    identity.avatar,
                );
                user.last_login = Some(Utc::now());
                let user = self.users.create(&user).await?;
                info!(user_id = %user.id, "created user on first login");
                user
            }
        };

        let pair = self.issuer.issue_pair(user.id, device_type, None).await?;
        info!(user_id = %user.id, %device_type, "login successful");

        Ok(LoginOutcome { user, pair })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Rotated, AuthError> {
        let rotated = self.coordinator.submit(refresh_token).await?;
        if rotated.degraded {
            warn!("token rotated in degraded mode");
        }
        Ok(rotated)
    }

    /// Revokes the presented refresh token. Unknown or already revoked tokens
    /// are not an error; logout always succeeds from the client's view.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        if self.store.revoke(&fingerprint(refresh_token)).await? {
            info!("refresh token revoked on logout");
        }
        Ok(())
    }

    pub async fn revoke_user_sessions(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let revoked = self.store.revoke_all_for_user(user_id).await?;
        info!(%user_id, revoked, "revoked all sessions");
        Ok(revoked)
    }

    pub async fn sweep_expired(&self, retention: chrono::Duration) -> Result<u64, AuthError> {
        let removed = self.store.delete_expired(Utc::now() - retention).await?;
        if removed > 0 {
            info!(removed, "swept expired refresh tokens");
        }
        Ok(removed)
    }
}
