use std::sync::Arc;
use sqlx::{Pool, Sqlite};
use crate::api::middleware::RateLimiter;
use crate::config::Config;
use crate::crypto::CredentialVerifier;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Sqlite>,
    pub verifier: CredentialVerifier,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Pool<Sqlite>, config: Arc<Config>) -> Self {
        let limiter = RateLimiter::new(config.auth_rate_limit, config.auth_rate_window_secs);

        AppState {
            db,
            verifier: CredentialVerifier::new(config.kdf_params()),
            limiter: Arc::new(limiter),
            config,
        }
    }
}
