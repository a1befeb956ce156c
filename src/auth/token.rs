use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::models::DeviceType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub user_id: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub device_type: DeviceType,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
}

/// Payload of every token this service signs, tagged by the `type` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenClaims {
    Access(AccessTokenClaims),
    Refresh(RefreshTokenClaims),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// One-way identifier of a token, used as the store key and coordinator key.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_opaque() {
        let a = fingerprint("header.payload.signature");
        assert_eq!(a, fingerprint("header.payload.signature"));
        assert_ne!(a, fingerprint("header.payload.signaturf"));
        assert!(!a.contains("payload"));
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn test_claims_are_tagged_by_type() {
        let claims = TokenClaims::Refresh(RefreshTokenClaims {
            user_id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            device_type: DeviceType::Mobile,
            exp: 10,
            iat: 0,
            jti: Uuid::new_v4(),
        });
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["type"], "refresh");
        assert_eq!(json["device_type"], "mobile");

        let back: TokenClaims = serde_json::from_value(json).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = serde_json::json!({
            "type": "id",
            "user_id": Uuid::new_v4(),
            "exp": 10,
            "iat": 0,
            "jti": Uuid::new_v4(),
        });
        assert!(serde_json::from_value::<TokenClaims>(json).is_err());
    }
}
