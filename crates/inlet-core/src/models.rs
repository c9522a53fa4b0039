//! Domain models and strongly-typed identifiers for captured events.
//!
//! Defines the envelope record that follows an inbound event through its
//! whole lifecycle, the processing state machine, and the database
//! serialization impls for the SQLite store.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type Db = sqlx::Sqlite;
type DbTypeInfo = sqlx::sqlite::SqliteTypeInfo;
type DbValueRef<'r> = sqlx::sqlite::SqliteValueRef<'r>;
type DbArgumentValue<'q> = sqlx::sqlite::SqliteArgumentValue<'q>;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed envelope identifier.
///
/// Wraps a UUID so envelope ids cannot be confused with other identifiers.
/// Generated once at capture time and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(pub Uuid);

impl EnvelopeId {
    /// Creates a new random envelope ID.
    ///
    /// UUID v4 gives globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EnvelopeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<Db> for EnvelopeId {
    fn type_info() -> DbTypeInfo {
        <Uuid as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for EnvelopeId {
    fn decode(value: DbValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<Db>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl<'q> sqlx::Encode<'q, Db> for EnvelopeId {
    fn encode_by_ref(&self, buf: &mut Vec<DbArgumentValue<'q>>) -> EncodeResult {
        <Uuid as sqlx::Encode<'q, Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Envelope lifecycle state.
///
/// Transitions are strictly controlled:
///
/// ```text
/// Pending -> Processing -> Completed
///                       -> Pending   (retry scheduled)
///                       -> Failed    (retries exhausted)
/// ```
///
/// `Completed` and `Failed` are terminal and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    /// Captured and waiting for a drain pass, or re-queued for retry.
    Pending,

    /// A drain pass handed this envelope to the downstream handler.
    ///
    /// An envelope found in this state at startup was interrupted by a
    /// crash and must not be trusted as complete.
    Processing,

    /// Handler acknowledged the event. Terminal.
    Completed,

    /// Retries exhausted. Terminal, retained for operator inspection.
    Failed,
}

impl ProcessingState {
    /// Whether this state ends the envelope's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Processing),
            Self::Processing => {
                matches!(next, Self::Completed | Self::Pending | Self::Failed)
            },
            Self::Completed | Self::Failed => false,
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<Db> for ProcessingState {
    fn type_info() -> DbTypeInfo {
        <str as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for ProcessingState {
    fn decode(value: DbValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<Db>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid processing state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, Db> for ProcessingState {
    fn encode_by_ref(&self, buf: &mut Vec<DbArgumentValue<'q>>) -> EncodeResult {
        <String as sqlx::Encode<'q, Db>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Durable record of one captured inbound event.
///
/// Created before any processing attempt so durability precedes
/// acknowledgement. Owned exclusively by the pipeline for its entire
/// lifetime: mutated only by the event processor and the recovery loader,
/// deleted only by the garbage collector once `Completed`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Envelope {
    /// Unique identifier, assigned at capture.
    pub id: EnvelopeId,

    /// When the event was captured.
    pub received_at: DateTime<Utc>,

    /// Upstream channel or tenant that produced the event.
    pub source_id: String,

    /// Kind of event. Opaque to the pipeline, meaningful to the handler.
    pub category: String,

    /// Raw event payload, passed through to the handler unmodified.
    pub payload: Vec<u8>,

    /// Current lifecycle state.
    pub state: ProcessingState,

    /// Number of processing attempts started so far.
    ///
    /// Bounded by `max_retries + 1`; an envelope whose attempts are
    /// exhausted moves to [`ProcessingState::Failed`].
    pub attempt_count: i32,

    /// Description of the most recent handler failure, if any.
    pub last_error: Option<String>,

    /// When the next retry attempt is due.
    ///
    /// Recorded for operators and backoff continuity; the in-memory timer
    /// is re-armed immediately after a restart.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Creates a pending envelope for a freshly captured event.
    pub fn new(
        source_id: String,
        category: String,
        payload: Vec<u8>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EnvelopeId::new(),
            received_at,
            source_id,
            category,
            payload,
            state: ProcessingState::Pending,
            attempt_count: 0,
            last_error: None,
            next_attempt_at: None,
        }
    }

    /// Payload as `Bytes` for cheap hand-off to the handler.
    pub fn payload_bytes(&self) -> Bytes {
        Bytes::from(self.payload.clone())
    }
}
