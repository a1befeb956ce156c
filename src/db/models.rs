use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Web,
    Mobile,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Web => "web",
            DeviceType::Mobile => "mobile",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(DeviceType::Web),
            "mobile" => Ok(DeviceType::Mobile),
            other => Err(format!("unknown device type: {}", other)),
        }
    }
}

/// One issued refresh token, identified by its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub user_id: Uuid,
    pub token_fingerprint: String,
    pub family_id: Uuid,
    pub device_type: DeviceType,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl RefreshTokenRecord {
    pub fn new(
        user_id: Uuid,
        token_fingerprint: String,
        family_id: Uuid,
        device_type: DeviceType,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            token_fingerprint,
            family_id,
            device_type,
            expires_at,
            created_at: Utc::now(),
            is_revoked: false,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Both flags matter: the retention sweep may lag behind `expires_at`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired_at(now)
    }
}

/// Row shape for `refresh_tokens`; `device_type` is stored as text.
#[derive(Debug, FromRow)]
pub struct RefreshTokenRow {
    pub user_id: Uuid,
    pub token_fingerprint: String,
    pub family_id: Uuid,
    pub device_type: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl TryFrom<RefreshTokenRow> for RefreshTokenRecord {
    type Error = String;

    fn try_from(row: RefreshTokenRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            token_fingerprint: row.token_fingerprint,
            family_id: row.family_id,
            device_type: row.device_type.parse()?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            is_revoked: row.is_revoked,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub subject_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(
        subject_id: String,
        email: String,
        display_name: Option<String>,
        avatar: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject_id,
            email,
            display_name,
            avatar,
            roles: vec!["user".to_string()],
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }
}
