//! Configuration for the event gateway
//!
//! Values come from `EVENTGATE_*` environment variables layered over
//! [`Config::default`].

use crate::admission::{ClientLimits, RateLimit};
use crate::error::{GatewayError, Result};
use crate::processor::ProcessorConfig;
use crate::retry::{BackoffPolicy, RetryConfig};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// A client allowed to ingest, optionally with its own limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSpec {
    pub id: String,
    pub limit: Option<RateLimit>,
}

impl FromStr for ClientSpec {
    type Err = GatewayError;

    /// Parses `id` or `id=requests/window_seconds`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (id, limit) = match s.split_once('=') {
            None => (s, None),
            Some((id, limit)) => {
                let (requests, window) = limit.split_once('/').ok_or_else(|| {
                    GatewayError::Config(format!(
                        "invalid client limit '{limit}' (expected requests/window_seconds)"
                    ))
                })?;
                let requests: u32 = requests.trim().parse().map_err(|e| {
                    GatewayError::Config(format!("invalid request limit for client '{id}': {e}"))
                })?;
                let window: u64 = window.trim().parse().map_err(|e| {
                    GatewayError::Config(format!("invalid window for client '{id}': {e}"))
                })?;
                if window == 0 {
                    return Err(GatewayError::Config(format!(
                        "window for client '{id}' must be positive"
                    )));
                }
                (id.trim(), Some(RateLimit::per_seconds(requests, window)))
            }
        };

        if id.is_empty() {
            return Err(GatewayError::Config("empty client id".to_string()));
        }
        Ok(Self {
            id: id.to_string(),
            limit,
        })
    }
}

/// Main configuration for the gateway
#[derive(Debug, Clone)]
pub struct Config {
    /// Metrics / health server address
    pub metrics_addr: SocketAddr,

    /// Default requests allowed per window
    pub rate_limit_requests_per_window: u32,

    /// Default window length in seconds
    pub rate_limit_window_seconds: u64,

    /// Known clients
    pub clients: Vec<ClientSpec>,

    /// Maximum events per sink write
    pub event_batch_size: usize,

    /// Longest a worker waits to fill a batch, in milliseconds
    pub flush_interval_ms: u64,

    /// Number of queue consumers
    pub worker_count: usize,

    /// Time a dequeued event stays invisible to other consumers
    pub visibility_timeout_secs: u64,

    /// Bound on a single sink write, in milliseconds
    pub sink_timeout_ms: u64,

    pub max_retry_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_sweep_interval_secs: u64,

    /// Age after which a stale retry claim may be taken over
    pub retry_claim_timeout_secs: u64,

    /// Trailing window for latency percentiles
    pub metrics_window_secs: u64,

    /// Cadence of live-metrics pushes
    pub metrics_push_interval_secs: u64,

    /// Maximum buffered latency samples
    pub sampler_capacity: usize,

    /// Retention for stored events (enforced by external cleanup)
    pub event_retention_days: u32,

    /// Path of the queue journal; in-memory queue when unset
    pub queue_journal: Option<PathBuf>,

    /// Log level
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            rate_limit_requests_per_window: 100,
            rate_limit_window_seconds: 60,
            clients: Vec::new(),
            event_batch_size: 100,
            flush_interval_ms: 100,
            worker_count: 4,
            visibility_timeout_secs: 30,
            sink_timeout_ms: 5000,
            max_retry_attempts: 3,
            retry_base_delay_secs: 1,
            retry_max_delay_secs: 300,
            retry_sweep_interval_secs: 10,
            retry_claim_timeout_secs: 300,
            metrics_window_secs: 300,
            metrics_push_interval_secs: 5,
            sampler_capacity: 10_000,
            event_retention_days: 30,
            queue_journal: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        macro_rules! parse_var {
            ($name:literal, $field:ident) => {
                if let Some(value) = lookup($name) {
                    config.$field = value
                        .trim()
                        .parse()
                        .map_err(|e| GatewayError::Config(format!("invalid {}: {e}", $name)))?;
                }
            };
        }

        parse_var!("EVENTGATE_METRICS_ADDR", metrics_addr);
        parse_var!("EVENTGATE_RATE_LIMIT_REQUESTS_PER_WINDOW", rate_limit_requests_per_window);
        parse_var!("EVENTGATE_RATE_LIMIT_WINDOW_SECONDS", rate_limit_window_seconds);
        parse_var!("EVENTGATE_EVENT_BATCH_SIZE", event_batch_size);
        parse_var!("EVENTGATE_FLUSH_INTERVAL_MS", flush_interval_ms);
        parse_var!("EVENTGATE_WORKER_COUNT", worker_count);
        parse_var!("EVENTGATE_VISIBILITY_TIMEOUT_SECS", visibility_timeout_secs);
        parse_var!("EVENTGATE_SINK_TIMEOUT_MS", sink_timeout_ms);
        parse_var!("EVENTGATE_MAX_RETRY_ATTEMPTS", max_retry_attempts);
        parse_var!("EVENTGATE_RETRY_BASE_DELAY_SECS", retry_base_delay_secs);
        parse_var!("EVENTGATE_RETRY_MAX_DELAY_SECS", retry_max_delay_secs);
        parse_var!("EVENTGATE_RETRY_SWEEP_INTERVAL_SECS", retry_sweep_interval_secs);
        parse_var!("EVENTGATE_RETRY_CLAIM_TIMEOUT_SECS", retry_claim_timeout_secs);
        parse_var!("EVENTGATE_METRICS_WINDOW_SECS", metrics_window_secs);
        parse_var!("EVENTGATE_METRICS_PUSH_INTERVAL_SECS", metrics_push_interval_secs);
        parse_var!("EVENTGATE_SAMPLER_CAPACITY", sampler_capacity);
        parse_var!("EVENTGATE_EVENT_RETENTION_DAYS", event_retention_days);

        if let Some(clients) = lookup("EVENTGATE_CLIENTS") {
            config.clients = clients
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<Vec<ClientSpec>>>()?;
        }

        if let Some(path) = lookup("EVENTGATE_QUEUE_JOURNAL") {
            if !path.trim().is_empty() {
                config.queue_journal = Some(PathBuf::from(path.trim()));
            }
        }

        if let Some(level) = lookup("EVENTGATE_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("EVENTGATE_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(GatewayError::Config(format!(
                        "invalid EVENTGATE_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.event_batch_size == 0 {
            return Err(GatewayError::Config("event_batch_size must be positive".into()));
        }
        if self.worker_count == 0 {
            return Err(GatewayError::Config("worker_count must be positive".into()));
        }
        if self.rate_limit_window_seconds == 0 {
            return Err(GatewayError::Config(
                "rate_limit_window_seconds must be positive".into(),
            ));
        }
        if self.retry_max_delay_secs < self.retry_base_delay_secs {
            return Err(GatewayError::Config(format!(
                "retry_max_delay_secs ({}) is below retry_base_delay_secs ({})",
                self.retry_max_delay_secs, self.retry_base_delay_secs
            )));
        }
        if self.retry_sweep_interval_secs == 0 || self.metrics_push_interval_secs == 0 {
            return Err(GatewayError::Config("intervals must be positive".into()));
        }
        Ok(())
    }

    /// Default limit plus the configured clients
    pub fn client_limits(&self) -> ClientLimits {
        let mut limits = ClientLimits::new(RateLimit::per_seconds(
            self.rate_limit_requests_per_window,
            self.rate_limit_window_seconds,
        ));
        for client in &self.clients {
            limits.register(client.id.clone(), client.limit);
        }
        limits
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.retry_base_delay_secs),
            Duration::from_secs(self.retry_max_delay_secs),
            self.max_retry_attempts,
        )
    }

    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            batch_size: self.event_batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            sink_timeout: Duration::from_millis(self.sink_timeout_ms),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            sweep_interval: Duration::from_secs(self.retry_sweep_interval_secs),
            batch_limit: self.event_batch_size,
            claim_timeout: Duration::from_secs(self.retry_claim_timeout_secs),
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_secs)
    }

    pub fn metrics_push_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_push_interval_secs)
    }
}
