//! Fetch-and-stream engine
//!
//! Performs one download per session: opens the upstream connection, resolves
//! the destination file, streams the body to disk and reports progress
//! through the session's [`EventEmitter`]. Any failure after the file has
//! been created removes the partial file before the error event goes out.

mod error;
mod filename;
mod http;
mod session;
mod storage;

use std::{net::IpAddr, path::PathBuf};

use futures_util::StreamExt;
use reqwest::{Response, Url, header::HeaderValue};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use ulid::Ulid;

pub use error::TransferError;
pub use filename::resolve_filename;
pub use http::Fetcher;
pub use session::{DownloadSession, SessionState};
pub use storage::{SavePathError, resolve_save_dir};

use crate::progress::EventEmitter;

/// A validated request, ready to be run
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: Ulid,
    pub url: Url,
    pub cookie: HeaderValue,
    pub save_dir: PathBuf,
    pub caller: IpAddr,
}

/// Run a session to its terminal event.
///
/// Always emits exactly one terminal event (unless the caller is already
/// gone) and returns the final session record.
pub async fn run_session(
    fetcher: Fetcher,
    job: DownloadJob,
    mut emitter: EventEmitter,
    shutdown: CancellationToken,
) -> DownloadSession {
    let span = info_span!("session", id = %job.id, caller = %job.caller);
    async move {
        let mut session = DownloadSession::new(job.id);
        let result = transfer(&fetcher, &job, &mut session, &mut emitter, &shutdown).await;
        // a caller that stopped reading must not pin the session forever
        let deliver_timeout = fetcher.read_timeout();

        match result {
            Ok(path) => {
                enter(&mut session, SessionState::Completed);
                info!(
                    path = ?path,
                    bytes = session.downloaded_size,
                    announced = ?session.total_size,
                    "Download completed"
                );
                let delivered = tokio::time::timeout(deliver_timeout, emitter.complete(&path)).await;
                if !matches!(delivered, Ok(Ok(()))) {
                    warn!("Caller left before the completion event was delivered");
                }
            }
            Err(e) => {
                enter(&mut session, SessionState::Failed);
                if let Some(path) = session.target_file.as_deref() {
                    storage::remove_partial(path).await;
                }
                error!(error = %e, bytes = session.downloaded_size, "Download failed");
                // nobody is listening after a disconnect
                let delivered = tokio::time::timeout(deliver_timeout, emitter.fail(&e)).await;
                if !matches!(delivered, Ok(Ok(()))) {
                    info!("Caller left before the error event was delivered");
                }
            }
        }
        debug_assert!(session.state().is_terminal());
        session
    }
    .instrument(span)
    .await
}

/// Move the session to `next`. An illegal move leaves the state as it was
fn enter(session: &mut DownloadSession, next: SessionState) {
    if let Err(e) = session.transition(next) {
        warn!(error = %e, "Ignoring session state change");
    }
}

async fn transfer(
    fetcher: &Fetcher,
    job: &DownloadJob,
    session: &mut DownloadSession,
    emitter: &mut EventEmitter,
    shutdown: &CancellationToken,
) -> Result<PathBuf, TransferError> {
    enter(session, SessionState::Fetching);

    let response = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Err(TransferError::Cancelled("server shutting down")),
        _ = emitter.closed() => return Err(TransferError::Cancelled("client disconnected")),
        response = fetcher.open(&job.url, &job.cookie) => response?,
    };

    let resolved = resolve_filename(response.headers(), &job.url);
    let total_size = http::announced_size(&response);
    session.total_size = total_size;

    storage::prepare_dir(&job.save_dir).await?;
    let (file, path) = storage::create_unique_file(&job.save_dir, &resolved.name).await?;
    session.target_file = Some(path.clone());

    match total_size {
        Some(size) => info!(
            file = %resolved.name,
            source = ?resolved.source,
            size = %bytesize::ByteSize(size),
            path = ?path,
            "Starting download"
        ),
        None => info!(
            file = %resolved.name,
            source = ?resolved.source,
            path = ?path,
            "Starting download of unknown size"
        ),
    }

    enter(session, SessionState::Streaming);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(resolved.name);
    emitter.begin_stream(file_name, total_size);

    stream_to_file(fetcher, response, file, session, emitter, shutdown).await?;
    Ok(path)
}

async fn stream_to_file(
    fetcher: &Fetcher,
    response: Response,
    mut file: File,
    session: &mut DownloadSession,
    emitter: &mut EventEmitter,
    shutdown: &CancellationToken,
) -> Result<(), TransferError> {
    let read_timeout = fetcher.read_timeout();
    let mut stream = response.bytes_stream();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(TransferError::Cancelled("server shutting down")),
            _ = emitter.closed() => return Err(TransferError::Cancelled("client disconnected")),
            next = tokio::time::timeout(read_timeout, stream.next()) => next,
        };

        let chunk = match next {
            Err(_) => return Err(TransferError::Stalled(read_timeout)),
            Ok(None) => break,
            Ok(Some(chunk)) => chunk?,
        };

        file.write_all(&chunk).await?;
        let downloaded = session.advance(chunk.len() as u64);

        let reported = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(TransferError::Cancelled("server shutting down")),
            reported = emitter.report(downloaded) => reported,
        };
        if reported.is_err() {
            return Err(TransferError::Cancelled("client disconnected"));
        }
    }

    // Make sure the file is completely written
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
