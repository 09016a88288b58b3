//! Outbound HTTP side of the engine
//!
//! Redirects are followed by hand so the hop count stays bounded and the
//! caller's cookie is only replayed against the host it was issued for.

use std::time::Duration;

use reqwest::{
    Client, Response, Url,
    header::{self, HeaderMap, HeaderValue},
};
use tracing::{debug, instrument, trace};

use super::TransferError;
use crate::config::TransferConfig;

pub const MAX_REDIRECTS: usize = 3;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_redirects: usize,
    read_timeout: Duration,
}

impl Fetcher {
    pub fn new(config: &TransferConfig) -> Result<Self, TransferError> {
        // Setup headers like a regular browser navigation
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );

        // Create a client that doesn't follow redirects automatically
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            max_redirects: MAX_REDIRECTS,
            read_timeout: config.read_timeout(),
        })
    }

    /// Stall bound applied to response headers and to every body chunk
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// GET `url` with the caller's cookie, following redirects.
    ///
    /// Returns the first non-redirect response, which is guaranteed to have a
    /// success status.
    #[instrument(level = "debug", skip(self, cookie), fields(url = %url))]
    pub async fn open(&self, url: &Url, cookie: &HeaderValue) -> Result<Response, TransferError> {
        let referer = url.origin().ascii_serialization();
        let mut current = url.clone();
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(current.clone());
            if let Ok(referer) = HeaderValue::from_str(&referer) {
                request = request.header(header::REFERER, referer);
            }
            if same_host(url, &current) {
                request = request.header(header::COOKIE, cookie.clone());
            } else {
                trace!(target = %current, "Cross-host redirect, not forwarding cookie");
            }

            let response = tokio::time::timeout(self.read_timeout, request.send())
                .await
                .map_err(|_| TransferError::Stalled(self.read_timeout))??;

            let status = response.status();
            trace!(status = %status, url = %current, "Got response");

            if status.is_redirection() {
                if redirects >= self.max_redirects {
                    return Err(TransferError::TooManyRedirects(self.max_redirects));
                }
                current = redirect_target(&current, &response)?;
                redirects += 1;
                debug!(hop = redirects, location = %current, "Following redirect");
                continue;
            }

            if !status.is_success() {
                return Err(TransferError::Status(status));
            }

            return Ok(response);
        }
    }
}

fn redirect_target(current: &Url, response: &Response) -> Result<Url, TransferError> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .ok_or(TransferError::MissingLocation)?
        .to_str()
        .map_err(|e| TransferError::InvalidRedirect(e.to_string()))?;

    // Handle relative URLs
    current
        .join(location)
        .map_err(|e| TransferError::InvalidRedirect(format!("{location}: {e}")))
}

fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Total size announced by the upstream, `None` when absent or zero
pub fn announced_size(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|cl| cl.to_str().ok())
        .and_then(|cl| cl.parse::<u64>().ok())
        .filter(|len| *len > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_host() {
        let a = Url::parse("https://example.com/a").unwrap();
        assert!(same_host(&a, &Url::parse("https://example.com:443/b").unwrap()));
        assert!(!same_host(&a, &Url::parse("https://cdn.example.com/b").unwrap()));
        assert!(!same_host(&a, &Url::parse("https://example.com:8443/b").unwrap()));
    }
}
