use std::time::Duration;

use anyhow::Context;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};

use crate::config::DbConfig;

pub fn connect_options(cfg: &DbConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .database(&cfg.name)
        .username(&cfg.user)
        .password(&cfg.password)
}

fn pool_options(cfg: &DbConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(cfg.pool_max)
        .acquire_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
}

/// Pooled connections to the user database. Connections are opened on
/// demand, so an unreachable server shows up at the first query rather
/// than here.
pub fn init_pool(cfg: &DbConfig) -> PgPool {
    tracing::info!(host = %cfg.host, port = cfg.port, db = %cfg.name, "database pool created");
    pool_options(cfg).connect_lazy_with(connect_options(cfg))
}

pub async fn run_migrations(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run database migrations")?;
    Ok(())
}

pub async fn check_connection(db: &PgPool) -> bool {
    match sqlx::query("SELECT 1").execute(db).await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(error = %e, "database connection check failed");
            false
        }
    }
}
