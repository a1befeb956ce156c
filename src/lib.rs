pub mod auth;
pub mod config;
pub mod db;
pub mod error;

use std::sync::Arc;
use std::time::Duration;
use actix_web::HttpResponse;
use tracing::{info, warn};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use crate::config::Settings;

pub use auth::{
    AuthService, HttpIdentityVerifier, IdentityVerifier, RefreshCoordinator, RotationProtocol,
    TokenIssuer, TokenTtls,
};
pub use db::{MemoryTokenStore, MemoryUserDirectory, PgTokenStore, PgUserDirectory, TokenStore, UserDirectory};

use crate::config::StorageBackend;

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: Arc<dyn TokenStore>,
    pub users: Arc<dyn UserDirectory>,
    pub issuer: Arc<TokenIssuer>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub auth_service: Arc<AuthService>,
}

impl AppState {
    pub async fn new(config: Settings) -> Result<Self> {
        let (store, users): (Arc<dyn TokenStore>, Arc<dyn UserDirectory>) =
            match config.database.backend {
                StorageBackend::Postgres => {
                    let pool = Arc::new(
                        db::operations::connect(
                            &config.database.url,
                            config.database.max_connections,
                            Duration::from_secs(5),
                        )
                        .await?,
                    );
                    (
                        Arc::new(PgTokenStore::new(pool.clone())),
                        Arc::new(PgUserDirectory::new(pool)),
                    )
                }
                StorageBackend::Memory => {
                    warn!("Using in-memory token store; state is lost on restart");
                    (
                        Arc::new(MemoryTokenStore::new()),
                        Arc::new(MemoryUserDirectory::new()),
                    )
                }
            };

        let identity = HttpIdentityVerifier::new(&config.auth.identity_url)
            .map_err(|e| AppError::ConfigError(e.to_string()))?;

        Ok(Self::with_backends(config, store, users, Arc::new(identity)))
    }

    /// Wires the components around already constructed collaborators.
    pub fn with_backends(
        config: Settings,
        store: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let issuer = Arc::new(TokenIssuer::new(
            store.clone(),
            &config.auth.jwt_secret,
            TokenTtls::from_settings(&config),
        ));
        let rotation = Arc::new(RotationProtocol::new(issuer.clone()));
        let coordinator = Arc::new(RefreshCoordinator::from_config(rotation, &config.coordinator));
        if !coordinator.is_available() {
            warn!("Refresh coordinator disabled; concurrent refreshes of one token are not deduplicated");
        }
        let auth_service = Arc::new(AuthService::new(
            identity,
            users.clone(),
            store.clone(),
            issuer.clone(),
            coordinator.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            users,
            issuer,
            coordinator,
            auth_service,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.coordinator.shutdown();
        info!("Refresh coordinator stopped admitting work");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::MockIdentityVerifier;

    fn memory_state(settings: Settings) -> AppState {
        AppState::with_backends(
            settings,
            Arc::new(MemoryTokenStore::new()),
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(MockIdentityVerifier::new()),
        )
    }

    #[tokio::test]
    async fn test_app_state_creation_in_memory() {
        let config = Settings::new_for_test().expect("Failed to load test config");
        let state = AppState::new(config).await.expect("memory backend needs no database");
        assert!(state.coordinator.is_available());
    }

    #[tokio::test]
    async fn test_app_state_clone() {
        let state = memory_state(Settings::new_for_test().unwrap());
        let cloned = state.clone();

        assert!(Arc::ptr_eq(&state.config, &cloned.config));
        assert!(Arc::ptr_eq(&state.coordinator, &cloned.coordinator));
    }

    #[tokio::test]
    async fn test_shutdown_degrades_coordinator() {
        let state = memory_state(Settings::new_for_test().unwrap());
        state.shutdown().await.unwrap();
        assert!(!state.coordinator.is_available());
    }

    #[tokio::test]
    async fn test_disabled_coordinator_from_config() {
        let mut settings = Settings::new_for_test().unwrap();
        settings.coordinator.enabled = false;
        let state = memory_state(settings);
        assert!(!state.coordinator.is_available());
    }
}
