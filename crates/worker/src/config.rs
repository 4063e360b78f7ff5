use std::time::Duration;

use tona_pipeline::{PipelineConfig, PollConfig};

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Client configuration loaded from environment variables.
///
/// All fields have defaults pointing at the production service.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Service base URL, without the `/api/v1` prefix.
    pub api_url: String,
    pub poll_interval: Duration,
    /// Client-side ceiling on polling; unset means poll until terminal.
    pub max_poll_duration: Option<Duration>,
    pub request_timeout: Duration,
    pub download_concurrency: usize,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                |
    /// |-----------------------------|------------------------|
    /// | `TONA_API_URL`              | `https://api.tona.app` |
    /// | `TONA_POLL_INTERVAL_MS`     | `2000`                 |
    /// | `TONA_MAX_POLL_SECS`        | unset                  |
    /// | `TONA_REQUEST_TIMEOUT_SECS` | `60`                   |
    /// | `TONA_DOWNLOAD_CONCURRENCY` | `3`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("TONA_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| "https://api.tona.app".into());

        let poll_interval_ms: u64 = parse(&lookup, "TONA_POLL_INTERVAL_MS", "a number of milliseconds")?
            .unwrap_or(2000);

        let max_poll_secs: Option<u64> = parse(&lookup, "TONA_MAX_POLL_SECS", "a number of seconds")?;

        let request_timeout_secs: u64 = parse(&lookup, "TONA_REQUEST_TIMEOUT_SECS", "a number of seconds")?
            .unwrap_or(60);

        let download_concurrency: usize = parse(&lookup, "TONA_DOWNLOAD_CONCURRENCY", "a positive integer")?
            .unwrap_or(3);
        if download_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "TONA_DOWNLOAD_CONCURRENCY",
                expected: "a positive integer",
                value: "0".into(),
            });
        }

        Ok(Self {
            api_url,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_poll_duration: max_poll_secs.map(Duration::from_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            download_concurrency,
        })
    }

    /// Pipeline tunables derived from this configuration.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            poll: PollConfig {
                interval: self.poll_interval,
                max_duration: self.max_poll_duration,
            },
            download_concurrency: self.download_concurrency,
            ..Default::default()
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var,
                expected,
                value,
            }),
    }
}
