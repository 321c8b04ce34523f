//! Application state management

use crate::auth::{
    repository::{connect_postgres, run_migrations},
    CredentialStore, GoogleIdentityVerifier, IdentityResolver, IdentityVerifier, JwtConfig,
    JwtError, MemoryRefreshTokenRepository, MemoryUserRepository, PasswordConfig,
    PgRefreshTokenRepository, PgUserRepository, RefreshCookie, RefreshTokenRepository,
    RepositoryError, SessionManager, TokenSigner, UserRepository,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use trail_core::config::{AppConfig, StorageBackend};

/// State construction errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid signer configuration: {0}")]
    Signer(#[from] JwtError),

    #[error("Storage initialisation failed: {0}")]
    Storage(#[from] RepositoryError),
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Session lifecycle
    pub sessions: SessionManager,
    /// Refresh cookie attributes
    pub cookie: RefreshCookie,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Wire the session manager over the given storage backends
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn RefreshTokenRepository>,
        password_config: PasswordConfig,
    ) -> Result<Self, StateError> {
        let jwt_config = JwtConfig::from(&config.auth);
        let cookie = RefreshCookie::new(config.auth.cookie_secure, jwt_config.refresh_expiration_secs);
        let signer = Arc::new(TokenSigner::new(jwt_config)?);

        let verifier = config.auth.google_client_id.as_ref().map(|client_id| {
            Arc::new(GoogleIdentityVerifier::new(
                client_id.clone(),
                config.auth.google_tokeninfo_url.clone(),
            )) as Arc<dyn IdentityVerifier>
        });

        let sessions = SessionManager::new(
            signer,
            CredentialStore::new(tokens),
            IdentityResolver::new(users, password_config),
            verifier,
        );

        Ok(Self {
            config,
            sessions,
            cookie,
            start_time: Instant::now(),
        })
    }

    /// State over the in-process backend
    pub fn in_memory(config: AppConfig, password_config: PasswordConfig) -> Result<Self, StateError> {
        Self::new(
            config,
            Arc::new(MemoryUserRepository::new()),
            Arc::new(MemoryRefreshTokenRepository::new()),
            password_config,
        )
    }

    /// State over the backend selected by `config.database.backend`
    ///
    /// For PostgreSQL this connects and applies pending migrations.
    pub async fn from_config(config: AppConfig) -> Result<Self, StateError> {
        match config.database.backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; sessions are lost on restart");
                Self::in_memory(config, PasswordConfig::default())
            }
            StorageBackend::Postgres => {
                let pool = connect_postgres(
                    &config.database.postgres_url,
                    config.database.postgres_pool_size,
                )
                .await?;
                run_migrations(&pool).await?;
                tracing::info!("Database migrations applied");

                Self::new(
                    config,
                    Arc::new(PgUserRepository::new(pool.clone())),
                    Arc::new(PgRefreshTokenRepository::new(pool)),
                    PasswordConfig::default(),
                )
            }
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
