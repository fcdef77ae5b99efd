use anyhow::Result;
use sqlx::{
    PgPool, Postgres,
    migrate::MigrateDatabase,
    postgres::PgPoolOptions,
};
use thiserror::Error;

pub mod models;
pub mod repositories;
pub mod transaction;
pub mod utils;

/// Postgres-backed implementation of every store trait in [`repositories`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Outcome of a write that can trip one of the modelled uniqueness or
/// state rules.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token already issued")]
    DuplicateToken,

    #[error("a pending invitation already exists for this email and organization")]
    DuplicatePending,

    #[error("invitation is no longer open")]
    InvitationClosed,

    #[error("employee already belongs to the organization")]
    AlreadyMember,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Other(error.into())
    }
}

pub async fn init_database(database_url: &str, max_connections: u32) -> Result<PgPool> {
    if !Postgres::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database {}", database_url);
        Postgres::create_database(database_url).await?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    log::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    log::info!("Migrations completed successfully");

    Ok(pool)
}
