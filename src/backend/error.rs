use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::engine::SavePathError;

/// Synchronous rejections. None of these ever start a session.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Missing required parameters: url and cookie.")]
    MissingParameters,

    #[error("Invalid API Key.")]
    InvalidApiKey,

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Invalid cookie: not a valid header value.")]
    InvalidCookie,

    #[error("Invalid save_path: {0}")]
    InvalidSavePath(#[from] SavePathError),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Too many requests, please try again later.")]
    RateLimited { retry_after: Duration },

    #[error("Invalid endpoint.")]
    NotFound,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidApiKey => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "message": self.to_string() }));
        let mut response = (status, body).into_response();

        if let Self::RateLimited { retry_after } = self {
            // round up so a client never retries too early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::MissingParameters.status(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::InvalidApiKey.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::InvalidSavePath(SavePathError::Traversal).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::NotFound.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response = GatewayError::RateLimited {
            retry_after: Duration::from_millis(2500),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }
}
