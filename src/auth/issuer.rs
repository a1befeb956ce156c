use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::auth::token::{fingerprint, AccessTokenClaims, RefreshTokenClaims, TokenClaims, TokenPair};
use crate::config::Settings;
use crate::db::models::{DeviceType, RefreshTokenRecord};
use crate::db::TokenStore;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy)]
pub struct TokenTtls {
    pub access: Duration,
    pub web_refresh: Duration,
    pub mobile_refresh: Duration,
}

impl TokenTtls {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            access: settings.access_ttl(),
            web_refresh: Duration::days(settings.auth.web_refresh_ttl_days),
            mobile_refresh: Duration::days(settings.auth.mobile_refresh_ttl_days),
        }
    }

    pub fn refresh_for(&self, device_type: DeviceType) -> Duration {
        match device_type {
            DeviceType::Web => self.web_refresh,
            DeviceType::Mobile => self.mobile_refresh,
        }
    }
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            access: Duration::minutes(15),
            web_refresh: Duration::days(7),
            mobile_refresh: Duration::days(30),
        }
    }
}

enum Kind {
    Access,
    Refresh,
}

/// Signs and verifies tokens. Issuing a pair writes one refresh-token record.
pub struct TokenIssuer {
    store: Arc<dyn TokenStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttls: TokenTtls,
}

impl TokenIssuer {
    pub fn new(store: Arc<dyn TokenStore>, jwt_secret: &str, ttls: TokenTtls) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            store,
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            ttls,
        }
    }

    pub fn ttls(&self) -> &TokenTtls {
        &self.ttls
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// A missing `family_id` means a fresh login and starts a new family.
    pub async fn issue_pair(
        &self,
        user_id: Uuid,
        device_type: DeviceType,
        family_id: Option<Uuid>,
    ) -> Result<TokenPair, AuthError> {
        let family_id = family_id.unwrap_or_else(Uuid::new_v4);
        let (pair, record) = self.mint(user_id, device_type, family_id)?;
        self.store.insert(&record).await?;
        debug!(%user_id, %family_id, %device_type, "issued token pair");
        Ok(pair)
    }

    /// Signs a pair and builds its refresh record without persisting it.
    pub fn mint(
        &self,
        user_id: Uuid,
        device_type: DeviceType,
        family_id: Uuid,
    ) -> Result<(TokenPair, RefreshTokenRecord), AuthError> {
        let now = Utc::now();
        let access_expires_at = now + self.ttls.access;
        let refresh_expires_at = now + self.ttls.refresh_for(device_type);

        let access_token = self.sign(&TokenClaims::Access(AccessTokenClaims {
            user_id,
            exp: access_expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        }))?;
        let refresh_token = self.sign(&TokenClaims::Refresh(RefreshTokenClaims {
            user_id,
            family_id,
            device_type,
            exp: refresh_expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        }))?;

        let record = RefreshTokenRecord::new(
            user_id,
            fingerprint(&refresh_token),
            family_id,
            device_type,
            refresh_expires_at,
        );
        let pair = TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        };
        Ok((pair, record))
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        match self.decode(token, Kind::Access)? {
            TokenClaims::Access(claims) => Ok(claims),
            TokenClaims::Refresh(_) => Err(AuthError::AccessTokenInvalid),
        }
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, AuthError> {
        match self.decode(token, Kind::Refresh)? {
            TokenClaims::Refresh(claims) => Ok(claims),
            TokenClaims::Access(_) => Err(AuthError::RefreshTokenInvalid),
        }
    }

    /// Signs arbitrary claims without touching the store.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {}", e)))
    }

    fn decode(&self, token: &str, kind: Kind) -> Result<TokenClaims, AuthError> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match (e.kind(), kind) {
                (ErrorKind::ExpiredSignature, Kind::Access) => AuthError::AccessTokenExpired,
                (ErrorKind::ExpiredSignature, Kind::Refresh) => AuthError::RefreshTokenExpired,
                (_, Kind::Access) => AuthError::AccessTokenInvalid,
                (_, Kind::Refresh) => AuthError::RefreshTokenInvalid,
            })
    }
}
