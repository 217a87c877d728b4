use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scholarship_portal::{
    api::{create_router, AppState},
    config::Config,
    db::{self, SessionRepository},
    error::AppError,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scholarship_portal=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting scholarship portal v{}...", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        log_n = config.scrypt_log_n,
        r = config.scrypt_r,
        p = config.scrypt_p,
        "✅ Configuration loaded"
    );

    // Schema changes are applied by the `migrate` binary, not here
    let pool = db::connect(&config).await?;
    tracing::info!("✅ Database connected: {}", config.database_url);

    let state = AppState::new(pool.clone(), config.clone());
    tracing::info!(
        "✅ Auth rate limit: {} attempts per {}s per IP",
        config.auth_rate_limit,
        config.auth_rate_window_secs
    );

    // Spawn background task for session cleanup
    {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600)); // Every hour
            loop {
                interval.tick().await;
                match SessionRepository::cleanup_expired(&pool).await {
                    Ok(removed) => tracing::debug!(removed, "🧹 Expired sessions cleaned up"),
                    Err(e) => tracing::error!("❌ Session cleanup failed: {}", e),
                }
            }
        });
        tracing::info!("✅ Session cleanup task started (runs hourly)");
    }

    // Spawn background task for rate limiter cleanup
    {
        let limiter = state.limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // Every 5 minutes
            loop {
                interval.tick().await;
                let removed = limiter.cleanup().await;
                tracing::debug!(removed, "🧹 Rate limiter windows cleaned up");
            }
        });
        tracing::info!("✅ Rate limiter cleanup task started");
    }

    let app = create_router(state);

    let addr = config.server_address();
    tracing::info!("🌐 Server listening on http://{}", addr);
    tracing::info!("🏥 Health check: http://{}/api/health", addr);
    tracing::info!("");
    tracing::info!("📚 API Endpoints:");
    tracing::info!("  POST   /api/auth/register - Register new user");
    tracing::info!("  POST   /api/auth/login    - Login with username and password");
    tracing::info!("  POST   /api/auth/logout   - Logout (requires auth)");
    tracing::info!("  GET    /api/auth/me       - Get user info (requires auth)");
    tracing::info!("  DELETE /api/auth/me       - Delete account (requires auth)");
    tracing::info!("  POST   /api/auth/password - Change password (requires auth)");
    tracing::info!("");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
