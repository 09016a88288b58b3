//! Download endpoint
//!
//! Validates the request synchronously, then hands the job to a spawned
//! session and streams its events back as newline-delimited JSON.

use std::{convert::Infallible, net::IpAddr};

use axum::{
    Extension, Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderName, header},
    response::{IntoResponse, Response},
};
use futures_util::{Stream, stream};
use reqwest::{Url, header::HeaderValue};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use ulid::Ulid;

use crate::{
    backend::{AppState, CallerIdentity, GatewayError, GatewayResult},
    config::Config,
    engine::{self, DownloadJob, resolve_save_dir},
    progress::{self, EventEmitter, ProgressEvent},
};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson; charset=utf-8";
pub const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Debug, Default, Deserialize)]
pub struct DownloadRequest {
    pub url: Option<String>,
    pub cookie: Option<String>,
    pub save_path: Option<String>,
    pub api_key: Option<String>,
}

impl DownloadRequest {
    /// Check the request in gateway order and turn it into a runnable job
    pub fn into_job(self, config: &Config, caller: IpAddr) -> GatewayResult<DownloadJob> {
        let url = self.url.filter(|u| !u.trim().is_empty());
        let cookie = self.cookie.filter(|c| !c.is_empty());
        let (Some(url), Some(cookie)) = (url, cookie) else {
            return Err(GatewayError::MissingParameters);
        };

        if let Some(expected) = config.gateway.required_api_key() {
            if self.api_key.as_deref() != Some(expected) {
                return Err(GatewayError::InvalidApiKey);
            }
        }

        let url = Url::parse(url.trim()).map_err(|e| GatewayError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(GatewayError::InvalidUrl("missing host".to_string()));
        }

        let cookie = HeaderValue::from_str(&cookie).map_err(|_| GatewayError::InvalidCookie)?;
        let save_dir = resolve_save_dir(&config.save_root, self.save_path.as_deref())?;

        Ok(DownloadJob {
            id: Ulid::new(),
            url,
            cookie,
            save_dir,
            caller,
        })
    }
}

pub async fn start_download(
    State(state): State<AppState>,
    Extension(CallerIdentity(caller)): Extension<CallerIdentity>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> GatewayResult<Response> {
    let Json(request) = payload.map_err(|e| {
        warn!(client = %caller, error = %e.body_text(), "Rejected malformed download request");
        GatewayError::InvalidBody(e.body_text())
    })?;

    info!(
        client = %caller,
        url = request.url.as_deref().unwrap_or("-"),
        save_path = request.save_path.as_deref().unwrap_or("(default)"),
        "Received download request"
    );

    let job = request
        .into_job(&state.config, caller)
        .inspect_err(|e| warn!(client = %caller, error = %e, "Rejected download request"))?;
    let id = job.id;

    let (tx, rx) = progress::channel();
    let emitter = EventEmitter::new(tx, state.config.transfer.unknown_size_step_bytes);
    tokio::spawn(engine::run_session(
        state.fetcher.clone(),
        job,
        emitter,
        state.shutdown.clone(),
    ));

    let headers = [
        (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE.to_string()),
        (header::CACHE_CONTROL, "no-cache".to_string()),
        (HeaderName::from_static(SESSION_ID_HEADER), id.to_string()),
    ];
    Ok((headers, Body::from_stream(event_lines(rx))).into_response())
}

/// One NDJSON line per event. Ends after the terminal event, or when the
/// session drops its sender
fn event_lines(
    rx: mpsc::Receiver<ProgressEvent>,
) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
    stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        let event = rx.recv().await?;
        let next = if event.is_terminal() { None } else { Some(rx) };
        Some((Ok(event.to_line()), next))
    })
}
