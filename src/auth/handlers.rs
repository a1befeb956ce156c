use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder, ResponseError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Level};
use uuid::Uuid;

use crate::auth::gate::{bearer_token, require_role, AuthenticatedUser, TokenSource};
use crate::auth::token::TokenPair;
use crate::config::CookieConfig;
use crate::db::models::DeviceType;
use crate::error::{AppError, AuthError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub credential: String,
    pub device_type: DeviceType,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: AuthenticatedUser,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
}

fn build_cookie(config: &CookieConfig, name: &str, value: String, max_age_secs: i64) -> Cookie<'static> {
    let mut cookie = Cookie::build(name.to_string(), value)
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age_secs.max(0)))
        .finish();
    if let Some(domain) = &config.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

fn set_token_cookies(builder: &mut HttpResponseBuilder, config: &CookieConfig, pair: &TokenPair) {
    let now = chrono::Utc::now();
    builder.cookie(build_cookie(
        config,
        &config.access_name,
        pair.access_token.clone(),
        (pair.access_expires_at - now).num_seconds(),
    ));
    builder.cookie(build_cookie(
        config,
        &config.refresh_name,
        pair.refresh_token.clone(),
        (pair.refresh_expires_at - now).num_seconds(),
    ));
}

fn clear_token_cookies(builder: &mut HttpResponseBuilder, config: &CookieConfig) {
    builder.cookie(build_cookie(config, &config.access_name, String::new(), 0));
    builder.cookie(build_cookie(config, &config.refresh_name, String::new(), 0));
}

/// Refresh tokens follow the same one-source rule as access tokens.
fn refresh_token_from(req: &HttpRequest, config: &CookieConfig) -> Option<(String, TokenSource)> {
    match req.cookie(&config.refresh_name) {
        Some(cookie) if !cookie.value().is_empty() => {
            Some((cookie.value().to_string(), TokenSource::Cookie))
        }
        _ => bearer_token(req).map(|token| (token, TokenSource::Header)),
    }
}

/// Web clients get http-only cookies; mobile clients get the pair in the body.
pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    if req.credential.trim().is_empty() {
        return Err(AppError::ValidationError("credential must not be empty".into()));
    }

    let outcome = match state.auth_service.login(&req.credential, req.device_type).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Login failed: {}", e);
            return Err(e.into());
        }
    };

    let cookies = &state.config.cookies;
    let mut response = HttpResponse::Ok();
    let tokens = match req.device_type {
        DeviceType::Web => {
            set_token_cookies(&mut response, cookies, &outcome.pair);
            None
        }
        DeviceType::Mobile => Some(outcome.pair),
    };

    Ok(response.json(AuthResponse {
        user: outcome.user.into(),
        tokens,
    }))
}

pub async fn refresh(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let cookies = &state.config.cookies;
    let (token, source) = refresh_token_from(&req, cookies)
        .ok_or(AppError::AuthError(AuthError::RefreshTokenInvalid))?;

    match state.auth_service.refresh(&token).await {
        Ok(rotated) => {
            let mut response = HttpResponse::Ok();
            let tokens = match source {
                TokenSource::Cookie => {
                    set_token_cookies(&mut response, cookies, &rotated.pair);
                    None
                }
                TokenSource::Header => Some(rotated.pair),
            };
            Ok(response.json(RefreshResponse {
                success: true,
                tokens,
            }))
        }
        Err(e) => {
            log_refresh_failure(&e);
            let err = AppError::AuthError(e);
            let mut response = err.error_response();
            if source == TokenSource::Cookie && err_forces_logout(&err) {
                let mut cleared = HttpResponse::build(response.status());
                cleared.content_type("application/json");
                clear_token_cookies(&mut cleared, cookies);
                let body = response.into_body();
                response = cleared.body(body);
            }
            Ok(response)
        }
    }
}

fn refresh_failure_level(e: &AuthError) -> Level {
    match e {
        AuthError::Internal(_) => Level::ERROR,
        e if e.force_logout() => Level::WARN,
        e if e.is_transient() => Level::INFO,
        _ => Level::DEBUG,
    }
}

fn log_refresh_failure(e: &AuthError) {
    let level = refresh_failure_level(e);
    if level == Level::ERROR {
        error!(code = e.code(), "Token refresh failed");
    } else if level == Level::WARN {
        warn!(code = e.code(), "Token refresh forced logout");
    } else if level == Level::INFO {
        info!(code = e.code(), "Token refresh deferred");
    } else {
        debug!(code = e.code(), "Token refresh rejected");
    }
}

fn err_forces_logout(err: &AppError) -> bool {
    matches!(err, AppError::AuthError(e) if e.force_logout())
}

pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let cookies = &state.config.cookies;
    if let Some((token, _)) = refresh_token_from(&req, cookies) {
        state.auth_service.logout(&token).await?;
    }

    let mut response = HttpResponse::Ok();
    clear_token_cookies(&mut response, cookies);
    Ok(response.json(serde_json::json!({
        "message": "Successfully logged out"
    })))
}

pub async fn logout_all(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let revoked = state.auth_service.revoke_user_sessions(user.id).await?;

    let mut response = HttpResponse::Ok();
    clear_token_cookies(&mut response, &state.config.cookies);
    Ok(response.json(serde_json::json!({ "revoked": revoked })))
}

pub async fn me(user: AuthenticatedUser) -> HttpResponse {
    HttpResponse::Ok().json(user)
}

pub async fn revoke_user_sessions(
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    require_role(&user, &["admin"])?;

    let target = path.into_inner();
    let revoked = state.auth_service.revoke_user_sessions(target).await?;
    info!(admin_id = %user.id, user_id = %target, revoked, "admin revoked sessions");

    Ok(HttpResponse::Ok().json(serde_json::json!({ "revoked": revoked })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/login", web::post().to(login))
            .route("/refresh", web::post().to(refresh))
            .route("/logout", web::post().to(logout))
            .route("/logout-all", web::post().to(logout_all))
            .route("/me", web::get().to(me)),
    )
    .route(
        "/admin/users/{id}/sessions",
        web::delete().to(revoke_user_sessions),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_failure_levels() {
        assert_eq!(refresh_failure_level(&AuthError::ReuseDetected), Level::WARN);
        assert_eq!(refresh_failure_level(&AuthError::QueueTimeout), Level::INFO);
        assert_eq!(
            refresh_failure_level(&AuthError::StoreUnavailable("down".into())),
            Level::INFO
        );
        assert_eq!(refresh_failure_level(&AuthError::RefreshTokenExpired), Level::DEBUG);
        assert_eq!(refresh_failure_level(&AuthError::RefreshTokenInvalid), Level::DEBUG);
        assert_eq!(
            refresh_failure_level(&AuthError::Internal("join".into())),
            Level::ERROR
        );
    }
}
