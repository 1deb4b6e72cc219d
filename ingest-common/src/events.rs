//! Event types for the ingest event system
//!
//! Every pipeline stage reports progress through the `EventBus`. The
//! `Log` variant feeds an operator log panel; the remaining variants are
//! structured notifications about individual items and the batch.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Ingest event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// Operator-facing log line
    Log {
        level: LogLevel,
        action: String,
        detail: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item was collected from a candidate path
    ItemCollected {
        session_id: Uuid,
        item_name: String,
        kind: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Validation finished for an item
    ItemValidated {
        session_id: Uuid,
        item_name: String,
        passed: bool,
        warnings: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Source files were copied into the work area
    WorkFileConformed {
        session_id: Uuid,
        item_name: String,
        destination: String,
        file_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A publish record was created
    PublishRegistered {
        session_id: Uuid,
        item_name: String,
        record_id: i64,
        path: String,
        version: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A plate was created or updated and linked to a publish
    PlateRegistered {
        session_id: Uuid,
        plate_id: i64,
        code: String,
        created: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Older publishes had their status cleared
    PublishesSuperseded {
        session_id: Uuid,
        item_name: String,
        record_ids: Vec<i64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A client note was created and linked
    NoteCreated {
        session_id: Uuid,
        note_id: i64,
        subject: String,
        link_count: usize,
        attachment_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item was skipped or failed
    ItemFailed {
        session_id: Uuid,
        item_name: String,
        stage: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The batch finished
    BatchCompleted {
        session_id: Uuid,
        published: usize,
        skipped: usize,
        failed: usize,
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl IngestEvent {
    /// Convenience constructor for `Log` events
    pub fn log(level: LogLevel, action: impl Into<String>, detail: impl Into<String>) -> Self {
        IngestEvent::Log {
            level,
            action: action.into(),
            detail: detail.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Event type name, used for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            IngestEvent::Log { .. } => "Log",
            IngestEvent::ItemCollected { .. } => "ItemCollected",
            IngestEvent::ItemValidated { .. } => "ItemValidated",
            IngestEvent::WorkFileConformed { .. } => "WorkFileConformed",
            IngestEvent::PublishRegistered { .. } => "PublishRegistered",
            IngestEvent::PlateRegistered { .. } => "PlateRegistered",
            IngestEvent::PublishesSuperseded { .. } => "PublishesSuperseded",
            IngestEvent::NoteCreated { .. } => "NoteCreated",
            IngestEvent::ItemFailed { .. } => "ItemFailed",
            IngestEvent::BatchCompleted { .. } => "BatchCompleted",
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over a tokio broadcast channel. Slow subscribers lag and
/// lose the oldest events; the pipeline never blocks on a subscriber.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use ingest_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit a `Log` event and mirror it to tracing
    pub fn log(&self, level: LogLevel, action: &str, detail: impl Into<String>) {
        let detail = detail.into();
        match level {
            LogLevel::Debug => tracing::debug!(action, detail = %detail, "ingest"),
            LogLevel::Info => tracing::info!(action, detail = %detail, "ingest"),
            LogLevel::Warning => tracing::warn!(action, detail = %detail, "ingest"),
            LogLevel::Error => tracing::error!(action, detail = %detail, "ingest"),
        }
        self.emit_lossy(IngestEvent::log(level, action, detail));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
