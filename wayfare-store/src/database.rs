use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;
use wayfare_core::CoreError;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Whether the error is a unique-constraint violation
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

pub(crate) fn persistence(what: &str) -> impl FnOnce(sqlx::Error) -> CoreError + '_ {
    move |e| {
        tracing::error!("Failed to {}: {}", what, e);
        CoreError::Persistence(format!("failed to {}", what))
    }
}

/// A stored column that no longer parses into its domain type
pub(crate) fn corrupt(column: &str, detail: impl std::fmt::Display) -> CoreError {
    tracing::error!("Unreadable {} column: {}", column, detail);
    CoreError::Persistence(format!("unreadable {}", column))
}
