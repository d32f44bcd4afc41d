use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub type DatabasePool = Arc<PgPool>;

pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    if database_url.contains("sslmode=require") || database_url.contains("sslmode=prefer") {
        tracing::info!("Database connection configured to use TLS");
    } else if !database_url.contains("localhost") && !database_url.contains("127.0.0.1") {
        tracing::warn!("Connecting to remote database without explicit sslmode. Consider adding sslmode=require");
    }

    Ok(pool)
}

pub async fn new_pool(database_url: &str, max_connections: u32) -> anyhow::Result<DatabasePool> {
    let pool = create_pool(database_url, max_connections).await?;
    Ok(Arc::new(pool))
}

/// Apply the schema under `migrations/`.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
