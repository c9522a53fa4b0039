//! Database access layer for envelope persistence.
//!
//! The repository translates between domain models and the SQLite schema.
//! All database operations go through it; no SQL lives outside this module.

use std::sync::Arc;

use sqlx::SqlitePool;

pub mod envelopes;

use crate::error::Result;

/// Container for repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for envelope operations.
    pub envelopes: Arc<envelopes::Repository>,
}

impl Storage {
    /// Creates a new storage instance over the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        let pool = Arc::new(pool);

        Self { envelopes: Arc::new(envelopes::Repository::new(pool)) }
    }

    /// Verifies database connectivity with a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&*self.envelopes.pool()).await?;

        Ok(())
    }
}

/// Creates the envelope schema if it does not exist.
///
/// Idempotent; run once at startup before constructing [`Storage`].
///
/// # Errors
///
/// Returns error if schema creation fails.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS envelopes (
            id BLOB PRIMARY KEY,
            received_at TEXT NOT NULL,
            source_id TEXT NOT NULL,
            category TEXT NOT NULL,
            payload BLOB NOT NULL,
            state TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            next_attempt_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_envelopes_state
        ON envelopes(state, received_at)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
