use std::time::Duration;

use anyhow::Context;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::migrator::Migrator;

/// Type alias for a database connection pool.
pub type DbPool = DatabaseConnection;

/// Connection-pool tuning for the engine's store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> anyhow::Result<DbPool> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };
    establish_connection_with_config(&config).await
}

/// Establishes a connection pool with explicit tuning.
pub async fn establish_connection_with_config(config: &DbConfig) -> anyhow::Result<DbPool> {
    debug!("configuring database connection: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    info!(
        max_connections = config.max_connections,
        "connecting to database"
    );

    Database::connect(opt)
        .await
        .context("failed to connect to database")
}

/// Connects using the application config and, when `auto_migrate` is set,
/// brings the schema up to date before returning the pool.
pub async fn establish_connection_from_app_config(config: &AppConfig) -> anyhow::Result<DbPool> {
    let db_config = DbConfig {
        url: config.database_url.clone(),
        max_connections: config.db_max_connections,
        min_connections: config.db_min_connections,
        ..Default::default()
    };

    let pool = establish_connection_with_config(&db_config).await?;

    if config.auto_migrate {
        info!("running embedded migrations");
        Migrator::up(&pool, None)
            .await
            .context("failed to run migrations")?;
    }

    Ok(pool)
}
