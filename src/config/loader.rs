//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;
use url::Url;

use super::types::{AppConfig, CryptoFeedConfig, FeedSettings, ForexFeedConfig, StoreConfig};
use crate::common::errors::{CoreError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (`APP__SETTINGS__LOG_LEVEL` style)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("watch_symbols")
            .try_parsing(true),
    );

    let config: AppConfig = builder
        .build()
        .map_err(|e| CoreError::Configuration(e.to_string()))?
        .try_deserialize()
        .map_err(|e| CoreError::Configuration(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

/// Load configuration from well-known environment variables only
pub fn load_from_env() -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let defaults = AppConfig::default();

    let config = AppConfig {
        store: StoreConfig {
            url: std::env::var("STORE_URL").unwrap_or(defaults.store.url),
            api_key: std::env::var("STORE_API_KEY").ok(),
            access_token: std::env::var("STORE_ACCESS_TOKEN").ok(),
        },
        crypto_feed: CryptoFeedConfig {
            websocket_url: std::env::var("CRYPTO_WS_URL")
                .unwrap_or(defaults.crypto_feed.websocket_url),
            ..defaults.crypto_feed
        },
        forex_feed: ForexFeedConfig {
            websocket_url: std::env::var("FOREX_WS_URL")
                .unwrap_or(defaults.forex_feed.websocket_url),
            api_key: std::env::var("FOREX_API_KEY").ok(),
            ..defaults.forex_feed
        },
        settings: FeedSettings::default(),
        watch_symbols: std::env::var("WATCH_SYMBOLS")
            .map(|s| parse_symbol_list(&s))
            .unwrap_or_default(),
    };

    validate(&config)?;
    Ok(config)
}

/// Split a comma-separated symbol list, dropping blanks
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_url(field: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| CoreError::Configuration(format!("{}: invalid URL '{}': {}", field, value, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(CoreError::Configuration(format!(
            "{}: unsupported scheme '{}'",
            field,
            url.scheme()
        )));
    }
    Ok(())
}

/// Check URLs and numeric bounds
pub fn validate(config: &AppConfig) -> Result<()> {
    validate_url("store.url", &config.store.url, &["http", "https"])?;
    if config.crypto_feed.enabled {
        validate_url("crypto_feed.websocket_url", &config.crypto_feed.websocket_url, &["ws", "wss"])?;
    }
    if config.forex_feed.enabled {
        validate_url("forex_feed.websocket_url", &config.forex_feed.websocket_url, &["ws", "wss"])?;
        if config.forex_feed.heartbeat_interval_seconds == 0 {
            return Err(CoreError::Configuration(
                "forex_feed.heartbeat_interval_seconds must be positive".to_string(),
            ));
        }
    }
    if config.settings.max_reconnect_delay_ms < config.settings.reconnect_delay_ms {
        return Err(CoreError::Configuration(
            "settings.max_reconnect_delay_ms must not be below reconnect_delay_ms".to_string(),
        ));
    }
    Ok(())
}
