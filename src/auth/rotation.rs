//! Single-use redemption of refresh tokens.
//!
//! A refresh token is good for exactly one successful rotation. Presenting a
//! token the store no longer considers live (absent or revoked) is read as
//! theft: the whole family is revoked and the caller is told to log out.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::issuer::TokenIssuer;
use crate::auth::token::{fingerprint, TokenPair};
use crate::error::AuthError;

pub struct RotationProtocol {
    issuer: Arc<TokenIssuer>,
}

impl RotationProtocol {
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }

    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        // Signature and shape first; a forged token never reaches the store.
        let claims = self.issuer.verify_refresh(refresh_token)?;
        let store = self.issuer.store();
        let token_fingerprint = fingerprint(refresh_token);

        let record = match store.find_by_fingerprint(&token_fingerprint).await? {
            Some(record) => record,
            None => {
                return self
                    .reject_reuse(claims.user_id, claims.family_id, "unknown refresh token presented")
                    .await
            }
        };

        if !record.is_usable(Utc::now()) {
            if record.is_revoked {
                return self
                    .reject_reuse(record.user_id, record.family_id, "revoked refresh token presented")
                    .await;
            }
            store.revoke(&token_fingerprint).await?;
            info!(user_id = %record.user_id, family_id = %record.family_id, "refresh token expired");
            return Err(AuthError::RefreshTokenExpired);
        }

        let (pair, successor) = self
            .issuer
            .mint(record.user_id, record.device_type, record.family_id)?;

        // Claim and successor land together; a failed write leaves the token live.
        if !store.rotate(&token_fingerprint, &successor).await? {
            return self
                .reject_reuse(record.user_id, record.family_id, "refresh token claimed concurrently")
                .await;
        }
        info!(user_id = %record.user_id, family_id = %record.family_id, "refresh token rotated");

        Ok(pair)
    }

    async fn reject_reuse(
        &self,
        user_id: Uuid,
        family_id: Uuid,
        reason: &'static str,
    ) -> Result<TokenPair, AuthError> {
        let revoked = self.issuer.store().revoke_family(family_id).await?;
        warn!(%user_id, %family_id, revoked, reason, "refresh token reuse detected, family revoked");
        Err(AuthError::ReuseDetected)
    }
}
