//! Request gateway: validation, rate limiting and the HTTP surface

pub mod api;
mod error;
pub mod rate_limit;
pub mod router;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use error::{GatewayError, GatewayResult};
pub use rate_limit::{CallerIdentity, RateLimiter};

use crate::{
    config::Config,
    engine::{Fetcher, TransferError},
};

/// Shared by every handler. Cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub fetcher: Fetcher,
    pub limiter: Arc<RateLimiter>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, shutdown: CancellationToken) -> Result<Self, TransferError> {
        let fetcher = Fetcher::new(&config.transfer)?;
        let limiter = RateLimiter::new(
            config.gateway.rate_limit_max,
            config.gateway.rate_limit_window(),
        );
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            limiter: Arc::new(limiter),
            shutdown,
        })
    }
}
