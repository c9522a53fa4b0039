//! Repository for envelope database operations.
//!
//! All writes are whole-record overwrites keyed by id, so concurrent
//! captures and processor updates never interleave partial field updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{Envelope, EnvelopeId, ProcessingState},
};

const ENVELOPE_COLUMNS: &str = "id, received_at, source_id, category, payload, state, \
                                attempt_count, last_error, next_attempt_at";

/// Repository for envelope database operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    /// Writes the full envelope, inserting or replacing by id.
    ///
    /// The connection runs with `synchronous=FULL`, so this does not return
    /// until the write has reached stable storage. A failed write is
    /// surfaced to the caller; nothing is partially recorded.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn upsert(&self, envelope: &Envelope) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO envelopes (id, received_at, source_id, category, payload,
                                   state, attempt_count, last_error, next_attempt_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                received_at = excluded.received_at,
                source_id = excluded.source_id,
                category = excluded.category,
                payload = excluded.payload,
                state = excluded.state,
                attempt_count = excluded.attempt_count,
                last_error = excluded.last_error,
                next_attempt_at = excluded.next_attempt_at
            "#,
        )
        .bind(envelope.id)
        .bind(envelope.received_at)
        .bind(&envelope.source_id)
        .bind(&envelope.category)
        .bind(&envelope.payload)
        .bind(envelope.state)
        .bind(envelope.attempt_count)
        .bind(&envelope.last_error)
        .bind(envelope.next_attempt_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds an envelope by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: EnvelopeId) -> Result<Option<Envelope>> {
        let envelope = sqlx::query_as::<_, Envelope>(&format!(
            "SELECT {ENVELOPE_COLUMNS} FROM envelopes WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(envelope)
    }

    /// Loads every envelope still awaiting completion, oldest first.
    ///
    /// Returns envelopes in `pending` or `processing` state ordered by
    /// `received_at`. Rows that cannot be decoded are skipped with a
    /// warning so one corrupt record does not block startup recovery.
    ///
    /// # Errors
    ///
    /// Returns error if the query itself fails.
    pub async fn load_unfinished(&self) -> Result<Vec<Envelope>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENVELOPE_COLUMNS} FROM envelopes
            WHERE state IN ('pending', 'processing')
            ORDER BY received_at ASC
            "#
        ))
        .fetch_all(&*self.pool)
        .await?;

        let mut envelopes = Vec::with_capacity(rows.len());
        for row in rows {
            match Envelope::from_row(&row) {
                Ok(envelope) => envelopes.push(envelope),
                Err(error) => {
                    let id = row.try_get::<Uuid, _>("id").map(|id| id.to_string()).ok();
                    warn!(
                        envelope_id = id.as_deref().unwrap_or("<unreadable>"),
                        error = %error,
                        "skipping unreadable envelope record"
                    );
                },
            }
        }

        Ok(envelopes)
    }

    /// Deletes one envelope record.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, id: EnvelopeId) -> Result<()> {
        sqlx::query("DELETE FROM envelopes WHERE id = ?1").bind(id).execute(&*self.pool).await?;

        Ok(())
    }

    /// Deletes completed envelopes received before the cutoff.
    ///
    /// Only `completed` records are eligible; `failed` envelopes are kept
    /// indefinitely for operator inspection.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM envelopes WHERE state = 'completed' AND received_at < ?1")
                .bind(cutoff)
                .execute(&*self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Counts envelopes in the given state.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_state(&self, state: ProcessingState) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM envelopes WHERE state = ?1")
            .bind(state)
            .fetch_one(&*self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;
    use crate::storage::migrate;

    async fn memory_repository() -> Repository {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .expect("open in-memory database");
        migrate(&pool).await.expect("run migrations");
        Repository::new(Arc::new(pool))
    }

    fn envelope(source_id: &str, received_at: DateTime<Utc>) -> Envelope {
        Envelope::new(source_id.to_string(), "message".to_string(), b"{}".to_vec(), received_at)
    }

    #[tokio::test]
    async fn upsert_then_find_roundtrip() {
        let repo = memory_repository().await;
        let stored = envelope("channel-1", Utc::now());

        repo.upsert(&stored).await.expect("upsert");

        let loaded = repo.find_by_id(stored.id).await.expect("find").expect("exists");
        assert_eq!(loaded.id, stored.id);
        assert_eq!(loaded.source_id, "channel-1");
        assert_eq!(loaded.state, ProcessingState::Pending);
        assert_eq!(loaded.payload, b"{}".to_vec());
    }

    #[tokio::test]
    async fn upsert_overwrites_whole_record() {
        let repo = memory_repository().await;
        let mut stored = envelope("channel-1", Utc::now());
        repo.upsert(&stored).await.expect("insert");

        stored.state = ProcessingState::Processing;
        stored.attempt_count = 2;
        stored.last_error = Some("handler timed out".to_string());
        repo.upsert(&stored).await.expect("overwrite");

        let loaded = repo.find_by_id(stored.id).await.expect("find").expect("exists");
        assert_eq!(loaded.state, ProcessingState::Processing);
        assert_eq!(loaded.attempt_count, 2);
        assert_eq!(loaded.last_error.as_deref(), Some("handler timed out"));
    }

    #[tokio::test]
    async fn load_unfinished_filters_and_orders() {
        let repo = memory_repository().await;
        let base = Utc::now();

        let newer = envelope("late", base + chrono::Duration::seconds(10));
        let older = envelope("early", base);
        let mut done = envelope("done", base);
        done.state = ProcessingState::Completed;
        let mut dead = envelope("dead", base);
        dead.state = ProcessingState::Failed;
        let mut interrupted = envelope("interrupted", base + chrono::Duration::seconds(5));
        interrupted.state = ProcessingState::Processing;

        for record in [&newer, &older, &done, &dead, &interrupted] {
            repo.upsert(record).await.expect("upsert");
        }

        let unfinished = repo.load_unfinished().await.expect("load");
        let sources: Vec<&str> = unfinished.iter().map(|e| e.source_id.as_str()).collect();
        assert_eq!(sources, vec!["early", "interrupted", "late"]);
    }

    #[tokio::test]
    async fn load_unfinished_skips_unreadable_rows() {
        let repo = memory_repository().await;
        let good = envelope("good", Utc::now());
        repo.upsert(&good).await.expect("upsert");

        sqlx::query(
            r#"
            INSERT INTO envelopes (id, received_at, source_id, category, payload,
                                   state, attempt_count, last_error, next_attempt_at)
            VALUES (?1, ?2, 'bad', 'message', x'00', 'exploded', 0, NULL, NULL)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .execute(&*repo.pool())
        .await
        .expect("insert corrupt row");

        let unfinished = repo.load_unfinished().await.expect("load");
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, good.id);
    }

    #[tokio::test]
    async fn delete_completed_before_spares_failed_and_recent() {
        let repo = memory_repository().await;
        let now = Utc::now();

        let mut old_done = envelope("old-done", now - chrono::Duration::hours(48));
        old_done.state = ProcessingState::Completed;
        let mut fresh_done = envelope("fresh-done", now);
        fresh_done.state = ProcessingState::Completed;
        let mut old_failed = envelope("old-failed", now - chrono::Duration::hours(48));
        old_failed.state = ProcessingState::Failed;
        let pending = envelope("pending", now - chrono::Duration::hours(48));

        for record in [&old_done, &fresh_done, &old_failed, &pending] {
            repo.upsert(record).await.expect("upsert");
        }

        let removed = repo
            .delete_completed_before(now - chrono::Duration::hours(1))
            .await
            .expect("delete");
        assert_eq!(removed, 1);

        assert!(repo.find_by_id(old_done.id).await.expect("find").is_none());
        assert!(repo.find_by_id(fresh_done.id).await.expect("find").is_some());
        assert!(repo.find_by_id(old_failed.id).await.expect("find").is_some());
        assert!(repo.find_by_id(pending.id).await.expect("find").is_some());
    }

    #[tokio::test]
    async fn count_by_state_counts_only_matches() {
        let repo = memory_repository().await;
        let now = Utc::now();

        repo.upsert(&envelope("a", now)).await.expect("upsert");
        repo.upsert(&envelope("b", now)).await.expect("upsert");
        let mut done = envelope("c", now);
        done.state = ProcessingState::Completed;
        repo.upsert(&done).await.expect("upsert");

        assert_eq!(repo.count_by_state(ProcessingState::Pending).await.expect("count"), 2);
        assert_eq!(repo.count_by_state(ProcessingState::Completed).await.expect("count"), 1);
        assert_eq!(repo.count_by_state(ProcessingState::Failed).await.expect("count"), 0);
    }
}
