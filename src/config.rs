use std::fmt::Display;
use std::str::FromStr;

use crate::crypto::KdfParams;
use crate::error::AppError;

/// Upper bound for `SESSION_EXPIRY_HOURS` (one year)
pub const MAX_SESSION_EXPIRY_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub session_expiry_hours: i64,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub request_timeout_secs: u64,
    pub min_password_length: usize,
    pub scrypt_log_n: u8,
    pub scrypt_r: u32,
    pub scrypt_p: u32,
    pub auth_rate_limit: u32,
    pub auth_rate_window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let kdf = KdfParams::default();
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            database_url: "sqlite://scholarship_portal.db".to_string(),
            session_expiry_hours: 24,
            db_max_connections: 20,
            db_min_connections: 5,
            request_timeout_secs: 30,
            min_password_length: 8,
            scrypt_log_n: kdf.log_n,
            scrypt_r: kdf.r,
            scrypt_p: kdf.p,
            auth_rate_limit: 20,
            auth_rate_window_secs: 60,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Config::default();
        let config = Config {
            server_host: env_or("SERVER_HOST", defaults.server_host)?,
            server_port: env_or("SERVER_PORT", defaults.server_port)?,
            database_url: env_or("DATABASE_URL", defaults.database_url)?,
            session_expiry_hours: env_or("SESSION_EXPIRY_HOURS", defaults.session_expiry_hours)?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_min_connections: env_or("DB_MIN_CONNECTIONS", defaults.db_min_connections)?,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            min_password_length: env_or("MIN_PASSWORD_LENGTH", defaults.min_password_length)?,
            scrypt_log_n: env_or("SCRYPT_LOG_N", defaults.scrypt_log_n)?,
            scrypt_r: env_or("SCRYPT_R", defaults.scrypt_r)?,
            scrypt_p: env_or("SCRYPT_P", defaults.scrypt_p)?,
            auth_rate_limit: env_or("AUTH_RATE_LIMIT", defaults.auth_rate_limit)?,
            auth_rate_window_secs: env_or("AUTH_RATE_WINDOW_SECS", defaults.auth_rate_window_secs)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_SESSION_EXPIRY_HOURS).contains(&self.session_expiry_hours) {
            return Err(AppError::Config(format!(
                "Invalid SESSION_EXPIRY_HOURS: {} (must be 1-{})",
                self.session_expiry_hours, MAX_SESSION_EXPIRY_HOURS
            )));
        }

        self.kdf_params()
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            log_n: self.scrypt_log_n,
            r: self.scrypt_r,
            p: self.scrypt_p,
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
