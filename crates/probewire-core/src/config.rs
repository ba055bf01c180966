use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::paging::{DEFAULT_PAGE_SIZE, DEFAULT_SERIAL_THRESHOLD};
use crate::retry::{millis, Backoff, RetryConfig};

/// Tunables for the request engine and paging streamer.
///
/// # Environment Variables
///
/// | Variable | Field |
/// |----------|-------|
/// | `PROBEWIRE_MAX_RETRIES` | `retry.max_retries` |
/// | `PROBEWIRE_RETRY_DELAY_MS` | `retry.backoff` (linear base) |
/// | `PROBEWIRE_TIMEOUT_MS` | `request_timeout` |
/// | `PROBEWIRE_SERIAL_THRESHOLD` | `serial_threshold` |
/// | `PROBEWIRE_MAX_IN_FLIGHT` | `max_in_flight` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub retry: RetryConfig,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub page_size: usize,
    pub serial_threshold: usize,
    /// Cap on concurrent page requests in parallel mode. `None` leaves the
    /// page count (bounded by `serial_threshold / page_size`) as the only limit.
    pub max_in_flight: Option<usize>,
    /// Buffered events per subscriber before slow subscribers start lagging.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
            serial_threshold: DEFAULT_SERIAL_THRESHOLD,
            max_in_flight: None,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by any `PROBEWIRE_*` variables that are set.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::default();

        if let Some(max_retries) = parse_env::<u32>("PROBEWIRE_MAX_RETRIES")? {
            config.retry.max_retries = max_retries;
        }
        if let Some(delay_ms) = parse_env::<u64>("PROBEWIRE_RETRY_DELAY_MS")? {
            config.retry.backoff = Backoff::Linear {
                base: Duration::from_millis(delay_ms),
            };
        }
        if let Some(timeout_ms) = parse_env::<u64>("PROBEWIRE_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(threshold) = parse_env::<usize>("PROBEWIRE_SERIAL_THRESHOLD")? {
            config.serial_threshold = threshold;
        }
        if let Some(limit) = parse_env::<usize>("PROBEWIRE_MAX_IN_FLIGHT")? {
            config.max_in_flight = Some(limit);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_serial_threshold(mut self, threshold: usize) -> Self {
        self.serial_threshold = threshold;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.page_size == 0 {
            return Err(ClientError::InvalidRequest(String::from(
                "page_size must be greater than zero",
            )));
        }
        if self.max_in_flight == Some(0) {
            return Err(ClientError::InvalidRequest(String::from(
                "max_in_flight must be greater than zero when set",
            )));
        }
        if self.event_capacity == 0 {
            return Err(ClientError::InvalidRequest(String::from(
                "event_capacity must be greater than zero",
            )));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, ClientError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ClientError::InvalidRequest(format!("{name} has invalid value '{raw}'"))),
        Err(_) => Ok(None),
    }
}
