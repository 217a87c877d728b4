use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scholarship_portal::{config::Config, db, error::AppError};

/// Apply pending schema migrations and exit
#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = db::connect(&config).await?;
    tracing::info!("✅ Database connected: {}", config.database_url);

    db::migrate(&pool).await?;
    tracing::info!("✅ Database migrations completed");

    pool.close().await;
    Ok(())
}
