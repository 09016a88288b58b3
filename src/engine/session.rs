//! Per-request session state

use std::{fmt, path::PathBuf};

use serde::Serialize;
use ulid::Ulid;

/// Lifecycle of a session.
///
/// `Pending -> Fetching -> Streaming -> Completed | Failed`. Failures before
/// streaming are allowed too; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Fetching,
    Streaming,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Streaming)
                | (Streaming, Completed)
                | (Pending | Fetching | Streaming, Failed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fetching => write!(f, "fetching"),
            Self::Streaming => write!(f, "streaming"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Debug, Clone)]
pub struct DownloadSession {
    pub id: Ulid,
    state: SessionState,
    pub target_file: Option<PathBuf>,
    pub total_size: Option<u64>,
    pub downloaded_size: u64,
}

impl DownloadSession {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            state: SessionState::Pending,
            target_file: None,
            total_size: None,
            downloaded_size: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(id = %self.id, from = %self.state, to = %next, "Session state change");
        self.state = next;
        Ok(())
    }

    /// Record a chunk written to disk, returning the new cumulative count
    pub fn advance(&mut self, bytes: u64) -> u64 {
        self.downloaded_size += bytes;
        self.downloaded_size
    }
}
