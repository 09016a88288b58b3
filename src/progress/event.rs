//! Wire format of the per-session event stream.
//!
//! Every event is serialized as a single JSON object followed by a newline, so
//! a caller can parse the response body line by line as it arrives.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const COMPLETE_MESSAGE: &str = "File downloaded successfully.";
pub const TRANSFER_FAILED_MESSAGE: &str = "File download failed.";
pub const STORAGE_FAILED_MESSAGE: &str = "File save failed.";

/// A single record of a session's event stream.
///
/// Progress records are self-contained: a caller that only ever sees the
/// latest one can still reconstruct the state of the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Whole percentage, `None` when the upstream did not announce a size
        progress: Option<u8>,
        downloaded_size: u64,
        total_size: Option<u64>,
        file_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        message: String,
        file_path: String,
        progress: u8,
    },
    Error {
        message: String,
        error: String,
    },
}

impl ProgressEvent {
    pub fn complete(file_path: &Path) -> Self {
        Self::Complete {
            message: COMPLETE_MESSAGE.to_string(),
            file_path: file_path.display().to_string(),
            progress: 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Serialize as one NDJSON line
    pub fn to_line(&self) -> String {
        // Serializing these variants cannot fail: every field is a string or an integer
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"{TRANSFER_FAILED_MESSAGE}","error":"{e}"}}"#)
        });
        line.push('\n');
        line
    }
}
