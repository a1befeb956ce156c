use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::AuthError(e) => e.code(),
            AppError::DatabaseError(_) => "store_unavailable",
            AppError::ValidationError(_) => "validation_failed",
            AppError::ConfigError(_) | AppError::InternalError(_) => "internal_error",
        }
    }

    fn force_logout(&self) -> bool {
        matches!(self, AppError::AuthError(e) if e.force_logout())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Never leak driver or config detail to clients.
        let message = match self {
            AppError::AuthError(e) => e.public_message(),
            AppError::ValidationError(_) => self.to_string(),
            _ => "Internal server error".to_string(),
        };
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "code": self.code(),
                "message": message,
                "force_logout": self.force_logout(),
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => e.status_code(),
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DatabaseError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ConfigError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Every way authentication or token rotation can fail.
///
/// `Clone` because a single rotation outcome is shared by every caller that
/// submitted the same refresh token to the coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Access token required")]
    MissingToken,

    #[error("Access token expired")]
    AccessTokenExpired,

    #[error("Invalid access token")]
    AccessTokenInvalid,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Invalid refresh token")]
    RefreshTokenInvalid,

    #[error("Refresh token reuse detected")]
    ReuseDetected,

    #[error("Timed out waiting for token rotation")]
    QueueTimeout,

    #[error("Identity verification failed: {0}")]
    IdentityVerificationFailed(String),

    #[error("Token store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable identifier for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::AccessTokenExpired => "access_token_expired",
            AuthError::AccessTokenInvalid => "access_token_invalid",
            AuthError::RefreshTokenExpired => "refresh_token_expired",
            AuthError::RefreshTokenInvalid => "refresh_token_invalid",
            AuthError::ReuseDetected => "reuse_detected",
            AuthError::QueueTimeout => "queue_timeout",
            AuthError::IdentityVerificationFailed(_) => "identity_verification_failed",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::Forbidden => "forbidden",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// The client must drop every credential it holds and sign in again.
    pub fn force_logout(&self) -> bool {
        matches!(self, AuthError::ReuseDetected)
    }

    /// Retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::QueueTimeout | AuthError::StoreUnavailable(_))
    }

    pub fn public_message(&self) -> String {
        match self {
            AuthError::MissingToken => "Access token required".into(),
            AuthError::AccessTokenExpired => "Access token expired, please refresh".into(),
            AuthError::AccessTokenInvalid => "Invalid access token".into(),
            AuthError::RefreshTokenExpired => "Session expired, please sign in again".into(),
            AuthError::RefreshTokenInvalid => "Invalid refresh token".into(),
            AuthError::ReuseDetected => {
                "Session revoked for security reasons, please sign in again".into()
            }
            AuthError::QueueTimeout => "Token refresh timed out, please retry".into(),
            AuthError::IdentityVerificationFailed(_) => "Invalid credentials".into(),
            AuthError::StoreUnavailable(_) => "Service temporarily unavailable".into(),
            AuthError::Forbidden => "Insufficient permissions".into(),
            AuthError::Internal(_) => "Internal server error".into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::QueueTimeout | AuthError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<DatabaseError> for AuthError {
    fn from(err: DatabaseError) -> Self {
        AuthError::StoreUnavailable(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionError(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => DatabaseError::Duplicate,
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::InternalError(_)));

        let config_err = config::ConfigError::NotFound(String::from("key not found"));
        let app_err: AppError = config_err.into();
        assert!(matches!(app_err, AppError::ConfigError(_)));

        let app_err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(app_err, AppError::DatabaseError(DatabaseError::NotFound)));

        let auth_err: AuthError = DatabaseError::ConnectionError("refused".into()).into();
        assert!(matches!(auth_err, AuthError::StoreUnavailable(_)));
        assert!(auth_err.is_transient());
    }

    #[test]
    fn test_error_status_codes() {
        let err = AppError::AuthError(AuthError::AccessTokenExpired);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = AppError::AuthError(AuthError::Forbidden);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = AppError::AuthError(AuthError::QueueTimeout);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = AppError::ValidationError("invalid input".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_only_reuse_forces_logout() {
        assert!(AuthError::ReuseDetected.force_logout());
        assert!(!AuthError::RefreshTokenExpired.force_logout());
        assert!(!AuthError::RefreshTokenInvalid.force_logout());
        assert!(!AuthError::QueueTimeout.force_logout());
        assert!(!AuthError::ReuseDetected.is_transient());
    }

    #[actix_web::test]
    async fn test_error_body_carries_flag() {
        let resp = AppError::AuthError(AuthError::ReuseDetected).error_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "reuse_detected");
        assert_eq!(json["error"]["force_logout"], true);
    }

    #[test]
    fn test_error_display() {
        let err = AppError::ValidationError("test error".to_string());
        assert_eq!(err.to_string(), "Validation error: test error");

        let err = AppError::AuthError(AuthError::MissingToken);
        assert_eq!(err.to_string(), "Authentication error: Access token required");

        let err = AppError::DatabaseError(DatabaseError::NotFound);
        assert_eq!(err.to_string(), "Database error: Record not found");
    }
}
