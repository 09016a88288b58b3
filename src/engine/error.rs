use std::{io, time::Duration};

use reqwest::StatusCode;
use thiserror::Error;

use crate::progress::{STORAGE_FAILED_MESSAGE, TRANSFER_FAILED_MESSAGE};

/// Why a session ended without a complete file
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error: {} {}", .0.as_u16(), .0.canonical_reason().unwrap_or("Unknown"))]
    Status(StatusCode),

    #[error("Too many redirects (limit is {0})")]
    TooManyRedirects(usize),

    #[error("Redirect without Location header")]
    MissingLocation,

    #[error("Invalid redirect target: {0}")]
    InvalidRedirect(String),

    #[error("No data received from upstream for {0:?}")]
    Stalled(Duration),

    #[error("IO error: {0}")]
    Storage(#[from] io::Error),

    #[error("Download cancelled: {0}")]
    Cancelled(&'static str),
}

impl TransferError {
    /// Storage errors come from the local filesystem rather than the upstream
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Short, user facing description used as the error event's message
    pub fn summary(&self) -> &'static str {
        if self.is_storage() {
            STORAGE_FAILED_MESSAGE
        } else {
            TRANSFER_FAILED_MESSAGE
        }
    }
}
