//! Per-session event delivery.
//!
//! The emitter owns the sending half of the session channel. Progress reports
//! go through the throttle; the terminal methods consume the emitter so a
//! session can never produce a second terminal event or a progress event
//! after one.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::event::ProgressEvent;
use super::throttle::{ProgressThrottle, Report};
use crate::engine::TransferError;
use std::path::Path;

/// Capacity of the per-session channel. Sends wait when the caller reads slowly.
pub const EVENT_BUFFER: usize = 16;

#[derive(Debug, Error)]
#[error("event receiver has gone away")]
pub struct ReceiverGone;

pub fn channel() -> (mpsc::Sender<ProgressEvent>, mpsc::Receiver<ProgressEvent>) {
    mpsc::channel(EVENT_BUFFER)
}

#[derive(Debug)]
struct StreamTarget {
    file_name: String,
    throttle: ProgressThrottle,
}

#[derive(Debug)]
pub struct EventEmitter {
    tx: mpsc::Sender<ProgressEvent>,
    unknown_size_step: u64,
    target: Option<StreamTarget>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>, unknown_size_step: u64) -> Self {
        Self {
            tx,
            unknown_size_step,
            target: None,
        }
    }

    /// Attach the resolved file name and announced size once headers are in
    pub fn begin_stream(&mut self, file_name: impl Into<String>, total_size: Option<u64>) {
        self.target = Some(StreamTarget {
            file_name: file_name.into(),
            throttle: ProgressThrottle::new(total_size, self.unknown_size_step),
        });
    }

    /// Resolves once the caller has dropped its end of the stream
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Report the cumulative byte count. Sends an event only when the throttle allows it.
    pub async fn report(&mut self, downloaded: u64) -> Result<(), ReceiverGone> {
        let Some(target) = self.target.as_mut() else {
            return Ok(());
        };
        let progress = match target.throttle.observe(downloaded) {
            Some(Report::Percent(pct)) => Some(pct),
            Some(Report::Bytes) => None,
            None => return Ok(()),
        };
        trace!(downloaded, ?progress, "Emitting progress event");
        let event = ProgressEvent::Progress {
            progress,
            downloaded_size: downloaded,
            total_size: target.throttle.total(),
            file_name: target.file_name.clone(),
        };
        self.tx.send(event).await.map_err(|_| ReceiverGone)
    }

    pub async fn complete(self, file_path: &Path) -> Result<(), ReceiverGone> {
        debug!(path = ?file_path, "Emitting completion event");
        self.finish(ProgressEvent::complete(file_path)).await
    }

    pub async fn fail(self, error: &TransferError) -> Result<(), ReceiverGone> {
        debug!(error = %error, "Emitting error event");
        self.finish(ProgressEvent::Error {
            message: error.summary().to_string(),
            error: error.to_string(),
        })
        .await
    }

    async fn finish(self, event: ProgressEvent) -> Result<(), ReceiverGone> {
        // dropping self afterwards closes the stream
        self.tx.send(event).await.map_err(|_| ReceiverGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn drain(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_reports_before_stream_are_ignored() {
        let (tx, rx) = mpsc::channel(64);
        let mut emitter = EventEmitter::new(tx, 1024);
        emitter.report(500).await.unwrap();
        emitter
            .complete(&PathBuf::from("/tmp/a.bin"))
            .await
            .unwrap();

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn test_stream_ends_with_single_terminal_event() {
        let (tx, rx) = mpsc::channel(64);
        let mut emitter = EventEmitter::new(tx, 1024);
        emitter.begin_stream("book.pdf", Some(1000));
        for downloaded in (0..=1000).step_by(10) {
            emitter.report(downloaded).await.unwrap();
        }
        emitter
            .complete(&PathBuf::from("/tmp/book.pdf"))
            .await
            .unwrap();

        let events = drain(rx).await;
        let (last, progress) = events.split_last().unwrap();
        assert!(last.is_terminal());
        assert_eq!(progress.len(), 20);
        assert!(progress.iter().all(|e| !e.is_terminal()));
        match &progress[progress.len() - 1] {
            ProgressEvent::Progress {
                progress,
                downloaded_size,
                total_size,
                file_name,
            } => {
                assert_eq!(*progress, Some(100));
                assert_eq!(*downloaded_size, 1000);
                assert_eq!(*total_size, Some(1000));
                assert_eq!(file_name, "book.pdf");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_event_carries_summary_and_reason() {
        let (tx, rx) = mpsc::channel(4);
        let emitter = EventEmitter::new(tx, 1024);
        let error = TransferError::Storage(std::io::Error::other("disk full"));
        emitter.fail(&error).await.unwrap();

        let events = drain(rx).await;
        match &events[..] {
            [ProgressEvent::Error { message, error }] => {
                assert_eq!(message, "File save failed.");
                assert!(error.contains("disk full"));
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_reported() {
        let (tx, rx) = mpsc::channel(4);
        let mut emitter = EventEmitter::new(tx, 1);
        emitter.begin_stream("x.bin", None);
        drop(rx);
        emitter.closed().await;
        assert!(emitter.report(10).await.is_err());
    }
}
