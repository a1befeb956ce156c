//! Request authentication.
//!
//! The access token is taken from exactly one place: the access cookie when
//! the request carries one, otherwise the `Authorization: Bearer` header. A
//! present-but-bad cookie is never rescued by a header.

use actix_web::dev::Payload;
use actix_web::{http::header, web, FromRequest, HttpMessage, HttpRequest};
use futures::future::LocalBoxFuture;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::db::models::User;
use crate::error::{AppError, AuthError};
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Cookie,
    Header,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub subject_id: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

/// Identity attached to a request that passed the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub profile: Profile,
}

impl From<User> for AuthenticatedUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            roles: user.roles,
            profile: Profile {
                subject_id: user.subject_id,
                display_name: user.display_name,
                avatar: user.avatar,
            },
        }
    }
}

pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Cookie wins when present; no merging of sources.
pub fn extract_token(req: &HttpRequest, cookie_name: &str) -> Option<(String, TokenSource)> {
    if let Some(cookie) = req.cookie(cookie_name) {
        if !cookie.value().is_empty() {
            return Some((cookie.value().to_string(), TokenSource::Cookie));
        }
    }
    bearer_token(req).map(|token| (token, TokenSource::Header))
}

pub async fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AuthError> {
    if let Some(user) = req.extensions().get::<AuthenticatedUser>() {
        return Ok(user.clone());
    }

    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AuthError::Internal("application state missing".into()))?;

    let (token, _) = extract_token(req, &state.config.cookies.access_name)
        .ok_or(AuthError::MissingToken)?;
    let claims = state.issuer.verify_access(&token)?;

    let user = state
        .users
        .find_by_id(claims.user_id)
        .await
        .map_err(|e| {
            error!(user_id = %claims.user_id, "user lookup failed: {}", e);
            AuthError::Internal("user lookup failed".into())
        })?
        // A signed token for a deleted user is no longer a valid credential.
        .ok_or(AuthError::AccessTokenInvalid)?;

    let user = AuthenticatedUser::from(user);
    req.extensions_mut().insert(user.clone());
    Ok(user)
}

/// Rejects with `Forbidden` unless the identity holds at least one of `allowed`.
pub fn require_role(user: &AuthenticatedUser, allowed: &[&str]) -> Result<(), AuthError> {
    if user.roles.iter().any(|role| allowed.contains(&role.as_str())) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move { authenticate(&req).await.map_err(AppError::from) })
    }
}

/// The optional gate: any failure means "proceed unauthenticated".
#[derive(Debug, Clone)]
pub struct MaybeAuthenticated(pub Option<AuthenticatedUser>);

impl FromRequest for MaybeAuthenticated {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move { Ok(MaybeAuthenticated(authenticate(&req).await.ok())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::MockIdentityVerifier;
    use crate::auth::token::{AccessTokenClaims, TokenClaims};
    use crate::db::models::DeviceType;
    use crate::db::{MemoryTokenStore, MemoryUserDirectory, UserDirectory};
    use crate::Settings;
    use actix_web::cookie::Cookie;
    use actix_web::test::TestRequest;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    async fn state_with_user(roles: &[&str]) -> (web::Data<AppState>, User) {
        let users = MemoryUserDirectory::new();
        let mut user = User::new("sub-1".into(), "a@example.com".into(), Some("A".into()), None);
        user.roles = roles.iter().map(|r| r.to_string()).collect();
        users.create(&user).await.unwrap();

        let state = AppState::with_backends(
            Settings::new_for_test().unwrap(),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(users),
            Arc::new(MockIdentityVerifier::new()),
        );
        (web::Data::new(state), user)
    }

    fn expired_access(state: &AppState, user_id: Uuid) -> String {
        let past = (Utc::now() - Duration::minutes(1)).timestamp();
        state
            .issuer
            .sign(&TokenClaims::Access(AccessTokenClaims {
                user_id,
                exp: past,
                iat: past - 60,
                jti: Uuid::new_v4(),
            }))
            .unwrap()
    }

    #[actix_web::test]
    async fn test_cookie_channel() {
        let (state, user) = state_with_user(&["user"]).await;
        let pair = state.issuer.issue_pair(user.id, DeviceType::Web, None).await.unwrap();

        let req = TestRequest::default()
            .cookie(Cookie::new("access_token", pair.access_token.clone()))
            .app_data(state.clone())
            .to_http_request();

        assert_eq!(
            extract_token(&req, "access_token").map(|(_, s)| s),
            Some(TokenSource::Cookie)
        );
        let authed = authenticate(&req).await.unwrap();
        assert_eq!(authed.id, user.id);
        assert_eq!(authed.email, "a@example.com");
        assert_eq!(authed.profile.display_name.as_deref(), Some("A"));
        assert!(req.extensions().get::<AuthenticatedUser>().is_some());
    }

    #[actix_web::test]
    async fn test_header_fallback() {
        let (state, user) = state_with_user(&["user"]).await;
        let pair = state.issuer.issue_pair(user.id, DeviceType::Mobile, None).await.unwrap();

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", pair.access_token)))
            .app_data(state.clone())
            .to_http_request();

        assert_eq!(
            extract_token(&req, "access_token").map(|(_, s)| s),
            Some(TokenSource::Header)
        );
        assert_eq!(authenticate(&req).await.unwrap().id, user.id);
    }

    #[actix_web::test]
    async fn test_expired_cookie_says_expired() {
        let (state, user) = state_with_user(&["user"]).await;
        let req = TestRequest::default()
            .cookie(Cookie::new("access_token", expired_access(&state, user.id)))
            .app_data(state.clone())
            .to_http_request();

        let err = authenticate(&req).await.unwrap_err();
        assert_eq!(err, AuthError::AccessTokenExpired);
        assert_eq!(err.public_message(), "Access token expired, please refresh");
    }

    #[actix_web::test]
    async fn test_cookie_is_not_merged_with_header() {
        let (state, user) = state_with_user(&["user"]).await;
        let pair = state.issuer.issue_pair(user.id, DeviceType::Web, None).await.unwrap();

        let req = TestRequest::default()
            .cookie(Cookie::new("access_token", expired_access(&state, user.id)))
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", pair.access_token)))
            .app_data(state.clone())
            .to_http_request();

        assert_eq!(authenticate(&req).await, Err(AuthError::AccessTokenExpired));
    }

    #[actix_web::test]
    async fn test_missing_and_invalid() {
        let (state, _) = state_with_user(&["user"]).await;

        let req = TestRequest::default().app_data(state.clone()).to_http_request();
        assert_eq!(authenticate(&req).await, Err(AuthError::MissingToken));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer not-a-token"))
            .app_data(state.clone())
            .to_http_request();
        assert_eq!(authenticate(&req).await, Err(AuthError::AccessTokenInvalid));

        // a refresh token is not an access token
        let pair = state.issuer.issue_pair(Uuid::new_v4(), DeviceType::Web, None).await.unwrap();
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", pair.refresh_token)))
            .app_data(state.clone())
            .to_http_request();
        assert_eq!(authenticate(&req).await, Err(AuthError::AccessTokenInvalid));
    }

    #[actix_web::test]
    async fn test_optional_gate_passes_through() {
        let (state, user) = state_with_user(&["user"]).await;
        let req = TestRequest::default()
            .cookie(Cookie::new("access_token", expired_access(&state, user.id)))
            .app_data(state.clone())
            .to_http_request();

        let MaybeAuthenticated(identity) = MaybeAuthenticated::extract(&req).await.unwrap();
        assert!(identity.is_none());
    }

    #[actix_web::test]
    async fn test_require_role() {
        let (state, user) = state_with_user(&["user", "editor"]).await;
        let pair = state.issuer.issue_pair(user.id, DeviceType::Web, None).await.unwrap();
        let req = TestRequest::default()
            .cookie(Cookie::new("access_token", pair.access_token))
            .app_data(state.clone())
            .to_http_request();
        let authed = AuthenticatedUser::extract(&req).await.unwrap();

        assert!(require_role(&authed, &["editor", "admin"]).is_ok());
        assert_eq!(require_role(&authed, &["admin"]), Err(AuthError::Forbidden));
    }
}
