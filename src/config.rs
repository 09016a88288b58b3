//! Config module for fetch-relay

use std::{net::IpAddr, path::PathBuf, time::Duration};

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct GatewayConfig {
    /// API key callers must present. Unset or empty disables the check
    #[clap(long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// Maximum number of download requests per caller within one window
    #[clap(long, env = "RELAY_RATE_LIMIT_MAX", default_value_t = 15)]
    pub rate_limit_max: u32,

    /// Length of the rate limit window, in seconds
    #[clap(long, env = "RELAY_RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    pub rate_limit_window_secs: u64,

    /// Identify callers by the first X-Forwarded-For address instead of the peer address.
    /// Only enable this behind a reverse proxy that sets the header.
    #[clap(long, env = "RELAY_TRUST_FORWARDED_FOR", default_value = "false")]
    pub trust_forwarded_for: bool,
}

impl GatewayConfig {
    /// The configured API key, ignoring empty values
    pub fn required_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct TransferConfig {
    /// Maximum time to wait for response headers or for the next body chunk
    #[clap(long, env = "RELAY_READ_TIMEOUT_SECS", default_value_t = 30)]
    pub read_timeout_secs: u64,

    #[clap(long, env = "RELAY_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Byte interval between progress events when the upstream sends no Content-Length
    #[clap(long, env = "RELAY_UNKNOWN_SIZE_STEP_BYTES", default_value_t = 1024 * 1024)]
    pub unknown_size_step_bytes: u64,
}

impl TransferConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct LogConfig {
    /// Rolling log file. An empty value disables file logging
    #[clap(long, env = "RELAY_LOG_FILE", default_value = "relay.log")]
    pub log_file: String,

    /// Number of most recent lines kept in the log file
    #[clap(long, env = "RELAY_LOG_MAX_LINES", default_value_t = 1000)]
    pub log_max_lines: usize,
}

impl LogConfig {
    pub fn log_path(&self) -> Option<PathBuf> {
        if self.log_file.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.log_file))
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "fetch-relay", about = "Download relay with streamed progress events")]
pub struct Config {
    #[clap(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[clap(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Root directory every download is saved under
    #[clap(long, env = "DEFAULT_SAVE_PATH", default_value = "./download")]
    pub save_root: PathBuf,

    #[clap(flatten)]
    pub gateway: GatewayConfig,

    #[clap(flatten)]
    pub transfer: TransferConfig,

    #[clap(flatten)]
    pub log: LogConfig,
}

pub fn config() -> Config {
    Config::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_disables_check() {
        let config = Config::parse_from(["fetch-relay", "--api-key", ""]);
        assert_eq!(config.gateway.required_api_key(), None);

        let config = Config::parse_from(["fetch-relay", "--api-key", "hunter2"]);
        assert_eq!(config.gateway.required_api_key(), Some("hunter2"));
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::parse_from([
            "fetch-relay",
            "--port",
            "9000",
            "--save-root",
            "/srv/downloads",
            "--rate-limit-max",
            "3",
            "--log-file",
            "",
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.save_root, PathBuf::from("/srv/downloads"));
        assert_eq!(config.gateway.rate_limit_max, 3);
        assert!(config.log.log_path().is_none());
    }
}
