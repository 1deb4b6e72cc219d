//! Batch session state machine
//!
//! A session moves Collecting → Conforming → Validating → Publishing →
//! Finalizing for each item in turn and ends Completed or Failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Batch workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestState {
    /// Candidate paths are turned into items
    Collecting,
    /// Sources are copied into the work area
    Conforming,
    Validating,
    Publishing,
    /// Older versions are superseded
    Finalizing,
    Completed,
    /// The batch was stopped by an error
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub session_id: Uuid,
    pub old_state: IngestState,
    pub new_state: IngestState,
    pub transitioned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestProgress {
    /// Items handled so far
    pub current: usize,
    pub total: usize,
    /// Item being handled
    pub current_item: String,
}

/// One batch run (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSession {
    pub session_id: Uuid,
    pub state: IngestState,
    /// Candidate paths given to the batch
    pub inputs: Vec<String>,
    pub progress: IngestProgress,
    /// "item: message" for every item that did not publish
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// Set when the session reaches a terminal state
    pub ended_at: Option<DateTime<Utc>>,
}

impl IngestSession {
    pub fn new(inputs: Vec<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: IngestState::Collecting,
            inputs,
            progress: IngestProgress::default(),
            errors: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn transition_to(&mut self, new_state: IngestState) -> StateTransition {
        let transition = StateTransition {
            session_id: self.session_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        tracing::debug!(
            session_id = %self.session_id,
            from = ?self.state,
            to = ?new_state,
            "Session state change"
        );
        self.state = new_state;

        if self.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    pub fn update_progress(&mut self, current: usize, total: usize, item: &str) {
        self.progress.current = current;
        self.progress.total = total;
        self.progress.current_item = item.to_string();
    }

    pub fn add_error(&mut self, item: &str, message: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", item, message));
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, IngestState::Completed | IngestState::Failed)
    }

    /// Milliseconds since start, or until the end for a finished session
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_state_sets_end_time() {
        let mut session = IngestSession::new(vec!["/in/manifest.yaml".to_string()]);
        assert_eq!(session.state, IngestState::Collecting);

        let transition = session.transition_to(IngestState::Validating);
        assert_eq!(transition.old_state, IngestState::Collecting);
        assert!(!session.is_terminal());
        assert!(session.ended_at.is_none());

        session.transition_to(IngestState::Completed);
        assert!(session.is_terminal());
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_state_serializes_uppercase() {
        let json = serde_json::to_value(IngestState::Finalizing).unwrap();
        assert_eq!(json, "FINALIZING");
    }
}
