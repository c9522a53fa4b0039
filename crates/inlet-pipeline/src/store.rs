//! Storage abstraction consumed by the pipeline.
//!
//! The pipeline talks to stable storage only through [`EnvelopeStore`].
//! Production uses the SQLite-backed [`SqliteEnvelopeStore`]; tests can
//! substitute the in-memory [`mock::MockEnvelopeStore`] to exercise the
//! processor, recovery, and garbage collection deterministically.

use std::{future::Future, path::Path, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use inlet_core::{
    error::Result,
    models::{Envelope, EnvelopeId, ProcessingState},
    storage::{self, Storage},
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

/// Storage operations required by the ingestion pipeline.
///
/// Every write is a whole-record overwrite keyed by envelope id, so no
/// partial-field updates are ever visible to concurrent readers.
pub trait EnvelopeStore: Send + Sync + 'static {
    /// Writes the full envelope durably.
    ///
    /// Must not resolve until the record has reached stable storage;
    /// a failed write is surfaced to the caller (fail-closed).
    fn persist(&self, envelope: Envelope) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Loads every envelope in `Pending` or `Processing` state, ordered by
    /// `received_at`.
    fn load_unfinished(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>>> + Send + '_>>;

    /// Finds one envelope by id.
    fn find(
        &self,
        id: EnvelopeId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Envelope>>> + Send + '_>>;

    /// Removes one envelope record.
    fn delete(&self, id: EnvelopeId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Deletes completed envelopes received before `cutoff`, returning how
    /// many were removed. Never touches `Pending`, `Processing`, or
    /// `Failed` records.
    fn delete_completed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Counts envelopes currently in `state`.
    fn count_by_state(
        &self,
        state: ProcessingState,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>>;
}

/// Production envelope store backed by SQLite.
///
/// Wraps the repository layer from `inlet-core`. The database is opened
/// with WAL journaling and `synchronous=FULL`, so a resolved `persist` call
/// means the record survived a process crash.
pub struct SqliteEnvelopeStore {
    storage: Arc<Storage>,
}

impl SqliteEnvelopeStore {
    /// Creates a store over an already-migrated storage handle.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Opens (creating if missing) the database at `path` and runs
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool =
            SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
        storage::migrate(&pool).await?;

        Ok(Self::new(Arc::new(Storage::new(pool))))
    }

    /// Opens a private in-memory database, for tests and experiments.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);

        // One connection keeps the in-memory database alive for the pool's
        // lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        storage::migrate(&pool).await?;

        Ok(Self::new(Arc::new(Storage::new(pool))))
    }
}

impl EnvelopeStore for SqliteEnvelopeStore {
    fn persist(&self, envelope: Envelope) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.envelopes.upsert(&envelope).await })
    }

    fn load_unfinished(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.envelopes.load_unfinished().await })
    }

    fn find(
        &self,
        id: EnvelopeId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Envelope>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.envelopes.find_by_id(id).await })
    }

    fn delete(&self, id: EnvelopeId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.envelopes.delete(id).await })
    }

    fn delete_completed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.envelopes.delete_completed_before(cutoff).await })
    }

    fn count_by_state(
        &self,
        state: ProcessingState,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.envelopes.count_by_state(state).await })
    }
}

pub mod mock {
    //! Mock envelope store for testing.
    //!
    //! In-memory records with persist-error injection and a per-envelope
    //! state history, so tests can assert the exact sequence of persisted
    //! transitions without a database.

    use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

    use chrono::{DateTime, Utc};
    use inlet_core::{error::Result, CoreError};
    use tokio::sync::RwLock;

    use super::{Envelope, EnvelopeId, EnvelopeStore, ProcessingState};

    /// Deterministic in-memory store for tests.
    #[derive(Default)]
    pub struct MockEnvelopeStore {
        records: Arc<RwLock<HashMap<EnvelopeId, Envelope>>>,
        history: Arc<RwLock<HashMap<EnvelopeId, Vec<ProcessingState>>>>,
        persist_error: Arc<RwLock<Option<String>>>,
    }

    impl MockEnvelopeStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a record directly, bypassing the persist log.
        pub async fn insert(&self, envelope: Envelope) {
            self.records.write().await.insert(envelope.id, envelope);
        }

        /// Injects an error for the next persist call.
        pub async fn inject_persist_error(&self, error: impl Into<String>) {
            *self.persist_error.write().await = Some(error.into());
        }

        /// Returns the stored envelope, if any.
        pub async fn envelope(&self, id: EnvelopeId) -> Option<Envelope> {
            self.records.read().await.get(&id).cloned()
        }

        /// Returns the stored state of an envelope, if any.
        pub async fn state_of(&self, id: EnvelopeId) -> Option<ProcessingState> {
            self.records.read().await.get(&id).map(|e| e.state)
        }

        /// Every state this envelope was persisted in, oldest first.
        pub async fn state_history(&self, id: EnvelopeId) -> Vec<ProcessingState> {
            self.history.read().await.get(&id).cloned().unwrap_or_default()
        }

        /// Number of stored records.
        pub async fn len(&self) -> usize {
            self.records.read().await.len()
        }

        /// Whether the store holds no records.
        pub async fn is_empty(&self) -> bool {
            self.records.read().await.is_empty()
        }
    }

    impl EnvelopeStore for MockEnvelopeStore {
        fn persist(
            &self,
            envelope: Envelope,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let records = self.records.clone();
            let history = self.history.clone();
            let persist_error = self.persist_error.clone();

            Box::pin(async move {
                if let Some(error) = persist_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                history.write().await.entry(envelope.id).or_default().push(envelope.state);
                records.write().await.insert(envelope.id, envelope);
                Ok(())
            })
        }

        fn load_unfinished(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move {
                let mut unfinished: Vec<Envelope> = records
                    .read()
                    .await
                    .values()
                    .filter(|e| {
                        matches!(e.state, ProcessingState::Pending | ProcessingState::Processing)
                    })
                    .cloned()
                    .collect();
                unfinished.sort_by_key(|e| e.received_at);
                Ok(unfinished)
            })
        }

        fn find(
            &self,
            id: EnvelopeId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Envelope>>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move { Ok(records.read().await.get(&id).cloned()) })
        }

        fn delete(&self, id: EnvelopeId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move {
                records.write().await.remove(&id);
                Ok(())
            })
        }

        fn delete_completed_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move {
                let mut records = records.write().await;
                let before = records.len();
                records.retain(|_, e| {
                    e.state != ProcessingState::Completed || e.received_at >= cutoff
                });
                Ok((before - records.len()) as u64)
            })
        }

        fn count_by_state(
            &self,
            state: ProcessingState,
        ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move {
                Ok(records.read().await.values().filter(|e| e.state == state).count() as i64)
            })
        }
    }
}
