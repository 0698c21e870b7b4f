//! Application settings and configuration
//!
//! Settings are layered: `config/default.toml`, then an optional file
//! given on the command line, then `FLOW__`-prefixed environment
//! variables (e.g. `FLOW__VENDOR__API_TOKEN`). Configuration is static
//! for the lifetime of the process; validation failures abort startup.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use flow_common::error::ConfigurationError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Vendor (REST + WebSocket) configuration
    pub vendor: VendorSettings,
    /// Symbol universe configuration
    #[serde(default)]
    pub symbols: SymbolSettings,
    /// REST rate limit budget
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// REST scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Vendor streaming settings
    #[serde(default)]
    pub streaming: StreamingSettings,
    /// Brokerage depth rotation settings
    #[serde(default)]
    pub depth: DepthSettings,
    /// Archive database configuration
    pub database: DatabaseSettings,
    /// Hot cache configuration
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Vendor API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSettings {
    /// REST base URL
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    /// WebSocket endpoint (token is appended as a query parameter)
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,
    /// Bearer token for both REST and WebSocket access
    #[serde(default)]
    pub api_token: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_rest_base_url() -> String {
    "https://api.unusualwhales.com".to_string()
}

fn default_websocket_url() -> String {
    "wss://api.unusualwhales.com/socket".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

/// Symbol universe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSettings {
    /// Symbols to poll and stream
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    /// Symbols pinned to an always-on depth slot (excluded from rotation)
    #[serde(default)]
    pub depth_pinned: Vec<String>,
}

fn default_universe() -> Vec<String> {
    vec!["SPY".to_string(), "QQQ".to_string(), "IWM".to_string()]
}

impl Default for SymbolSettings {
    fn default() -> Self {
        Self {
            universe: default_universe(),
            depth_pinned: Vec::new(),
        }
    }
}

/// REST rate limit budget
///
/// Configured below the provider's advertised quota to leave headroom
/// for retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Sustained budget in requests per minute
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Burst capacity; defaults to the per-minute budget
    #[serde(default)]
    pub burst_capacity: Option<u32>,
    /// How long a worker waits for tokens before requeueing its job
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_requests_per_minute() -> u32 {
    100
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_capacity: None,
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// REST scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Scheduler tick interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay before the single retry of a 5xx/network failure
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Backoff used for 429 responses without a Retry-After header
    #[serde(default = "default_retry_after")]
    pub default_retry_after_secs: u64,
    /// Maximum attempts for a job that keeps hitting 429
    #[serde(default = "default_rate_limited_attempts")]
    pub rate_limited_max_attempts: u32,
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retry_delay() -> u64 {
    5
}

fn default_retry_after() -> u64 {
    10
}

fn default_rate_limited_attempts() -> u32 {
    3
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_delay_secs: default_retry_delay(),
            default_retry_after_secs: default_retry_after(),
            rate_limited_max_attempts: default_rate_limited_attempts(),
        }
    }
}

/// Vendor streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingSettings {
    /// Reconnect if no frame arrives for this many seconds (0 disables)
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,
    /// Reconnection backoff parameters
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Maximum reconnection attempts per window
    #[serde(default = "default_reconnect_attempts")]
    pub rate_limit_attempts: u32,
    /// Reconnection rate limit window in seconds
    #[serde(default = "default_reconnect_window")]
    pub rate_limit_window_secs: u64,
}

fn default_staleness() -> u64 {
    15
}

fn default_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_window() -> u64 {
    60
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness(),
            reconnect: ReconnectSettings::default(),
            rate_limit_attempts: default_reconnect_attempts(),
            rate_limit_window_secs: default_reconnect_window(),
        }
    }
}

/// Reconnection backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Initial reconnection delay in seconds
    #[serde(default = "default_initial_reconnect_delay")]
    pub initial_delay_secs: u64,
    /// Maximum reconnection delay in seconds
    #[serde(default = "default_max_reconnect_delay")]
    pub max_delay_secs: u64,
    /// Uptime after which the attempt counter resets
    #[serde(default = "default_healthy_reset")]
    pub healthy_reset_secs: u64,
}

fn default_initial_reconnect_delay() -> u64 {
    1
}

fn default_max_reconnect_delay() -> u64 {
    60
}

fn default_healthy_reset() -> u64 {
    300
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_reconnect_delay(),
            max_delay_secs: default_max_reconnect_delay(),
            healthy_reset_secs: default_healthy_reset(),
        }
    }
}

/// Brokerage depth rotation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSettings {
    /// Enable the depth rotation controller
    #[serde(default)]
    pub enabled: bool,
    /// Provider cap on concurrent rotating depth subscriptions
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long a symbol holds a rotation slot
    #[serde(default = "default_dwell")]
    pub dwell_secs: u64,
    /// Rotation control loop tick interval
    #[serde(default = "default_rotation_tick")]
    pub tick_secs: u64,
    /// Cooldown after a subscription-limit error
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Error-free cycles required before growing the batch again
    #[serde(default = "default_stable_rotations")]
    pub stable_rotations_required: u32,
    /// How long to wait for a cancel acknowledgment during shutdown
    #[serde(default = "default_cancel_ack_timeout")]
    pub cancel_ack_timeout_secs: u64,
    /// Venue identifier recorded on depth observations
    #[serde(default = "default_venue")]
    pub venue: String,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_dwell() -> u64 {
    120
}

fn default_rotation_tick() -> u64 {
    5
}

fn default_cooldown() -> u64 {
    300
}

fn default_stable_rotations() -> u32 {
    10
}

fn default_cancel_ack_timeout() -> u64 {
    10
}

fn default_venue() -> String {
    "SMART".to_string()
}

impl Default for DepthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent: default_max_concurrent(),
            dwell_secs: default_dwell(),
            tick_secs: default_rotation_tick(),
            cooldown_secs: default_cooldown(),
            stable_rotations_required: default_stable_rotations(),
            cancel_ack_timeout_secs: default_cancel_ack_timeout(),
            venue: default_venue(),
        }
    }
}

/// Archive database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

/// Hot cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Hot cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Backend to use
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,
    /// Redis connection URL (required for the redis backend)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Maximum entries retained per bounded log
    #[serde(default = "default_log_max_entries")]
    pub log_max_entries: usize,
    /// TTL applied to bounded-log keys in Redis (0 disables)
    #[serde(default)]
    pub log_ttl_secs: u64,
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Memory
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_log_max_entries() -> usize {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            redis_url: default_redis_url(),
            log_max_entries: default_log_max_entries(),
            log_ttl_secs: 0,
        }
    }
}

impl Settings {
    /// Load settings from files and environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        builder
            .add_source(
                Environment::with_prefix("FLOW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Validate configured values; called once at startup.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.rate_limit.requests_per_minute == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limit.requests_per_minute",
                "must be positive",
            ));
        }
        if self.scheduler.workers == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.workers",
                "must be positive",
            ));
        }
        if self.symbols.universe.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "symbols.universe",
                "must contain at least one symbol",
            ));
        }
        if self.depth.enabled && self.depth.max_concurrent == 0 {
            return Err(ConfigurationError::invalid_value(
                "depth.max_concurrent",
                "must be at least 1",
            ));
        }
        if self.database.url.is_empty() {
            return Err(ConfigurationError::MissingField("database.url".to_string()));
        }
        Ok(())
    }

    /// Settings suitable for tests and local development.
    pub fn default_settings() -> Self {
        Self {
            vendor: VendorSettings {
                rest_base_url: default_rest_base_url(),
                websocket_url: default_websocket_url(),
                api_token: String::new(),
                request_timeout_secs: default_request_timeout(),
            },
            symbols: SymbolSettings::default(),
            rate_limit: RateLimitSettings::default(),
            scheduler: SchedulerSettings::default(),
            streaming: StreamingSettings::default(),
            depth: DepthSettings::default(),
            database: DatabaseSettings {
                url: "postgresql://localhost:5432/telemetry".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
            },
            cache: CacheSettings::default(),
        }
    }
}
