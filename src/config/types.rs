//! Configuration types

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Position / balance store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Crypto exchange ticker stream
    #[serde(default)]
    pub crypto_feed: CryptoFeedConfig,
    /// Forex market-data stream
    #[serde(default)]
    pub forex_feed: ForexFeedConfig,
    /// Feed and runtime settings
    #[serde(default)]
    pub settings: FeedSettings,
    /// Symbols the runner subscribes to at startup
    #[serde(default)]
    pub watch_symbols: Vec<String>,
}

/// Remote position store (PostgREST-style backend)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the backend, without the `/rest/v1` suffix
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Anonymous / service API key
    #[serde(default)]
    pub api_key: Option<String>,
    /// User access token; falls back to the API key
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            api_key: None,
            access_token: None,
        }
    }
}

fn default_store_url() -> String {
    "http://localhost:54321".to_string()
}

/// Crypto venue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoFeedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Combined-stream WebSocket endpoint
    #[serde(default = "default_crypto_ws_url")]
    pub websocket_url: String,
}

impl Default for CryptoFeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            websocket_url: default_crypto_ws_url(),
        }
    }
}

fn default_crypto_ws_url() -> String {
    "wss://stream.binance.com:9443/stream".to_string()
}

/// Forex venue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForexFeedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Quote stream WebSocket endpoint
    #[serde(default = "default_forex_ws_url")]
    pub websocket_url: String,
    /// Shared key sent at connect time
    #[serde(default)]
    pub api_key: Option<String>,
    /// Keep-alive period; the provider drops connections idle for longer
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

impl Default for ForexFeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            websocket_url: default_forex_ws_url(),
            api_key: None,
            heartbeat_interval_seconds: default_heartbeat_interval(),
        }
    }
}

fn default_forex_ws_url() -> String {
    "wss://api.itick.org/fws".to_string()
}

fn default_true() -> bool {
    true
}

/// Feed and runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Delay before the first reconnection attempt in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Upper bound of the doubling reconnect delay in milliseconds
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    /// Maximum reconnection attempts before the feed degrades (0 = infinite)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Per-subscriber event buffer
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    /// Store request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            channel_size: default_channel_size(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_channel_size() -> usize {
    1000
}

fn default_request_timeout() -> u64 {
    30
}
