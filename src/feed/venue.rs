//! Per-venue protocol: frame encoding, symbol keys and tick normalization

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use super::messages::{
    CombinedStreamFrame, ForexCommand, ForexFrame, ForexQuote, StreamAck, StreamRequest, TickerEvent,
};
use crate::common::errors::Result;
use crate::common::types::Venue;
use crate::config::types::{CryptoFeedConfig, ForexFeedConfig};
use crate::instrument::classifier;

/// Quote decoded from an upstream frame, keyed by upstream pair code
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamQuote {
    pub key: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub price: Decimal,
    pub change: Decimal,
}

/// Protocol spoken by one upstream venue
///
/// Implementations are stateless apart from request counters and must
/// never fail on unknown input: frames they do not understand produce no
/// quotes.
pub trait VenueProtocol: Send + Sync {
    fn venue(&self) -> Venue;

    /// Endpoint to connect to
    fn url(&self) -> &str;

    /// Extra handshake headers (credentials)
    fn auth_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Upstream key for an internal symbol
    fn upstream_key(&self, symbol: &str) -> String {
        classifier::pair_code(symbol)
    }

    fn subscribe_frame(&self, keys: &[String]) -> Result<String>;

    fn unsubscribe_frame(&self, keys: &[String]) -> Result<String>;

    /// Keep-alive frame, for venues that drop idle connections
    fn heartbeat_frame(&self) -> Option<String> {
        None
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        None
    }

    /// Decode an inbound frame; malformed or unrelated frames yield nothing
    fn parse_frame(&self, text: &str) -> Vec<UpstreamQuote>;
}

/// Crypto exchange ticker stream
pub struct CryptoVenue {
    url: String,
    next_request_id: AtomicU64,
}

impl CryptoVenue {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &CryptoFeedConfig) -> Self {
        Self::new(&config.websocket_url)
    }

    fn stream_name(key: &str) -> String {
        format!("{}@ticker", key.to_lowercase())
    }

    fn request(&self, method: &str, keys: &[String]) -> Result<String> {
        let request = StreamRequest {
            method: method.to_string(),
            params: keys.iter().map(|k| Self::stream_name(k)).collect(),
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
        };
        Ok(serde_json::to_string(&request)?)
    }

    fn quote(ticker: TickerEvent) -> UpstreamQuote {
        UpstreamQuote {
            key: ticker.symbol.to_ascii_uppercase(),
            bid: ticker.best_bid,
            ask: ticker.best_ask,
            price: ticker.last_price,
            change: ticker.price_change_percent,
        }
    }
}

impl VenueProtocol for CryptoVenue {
    fn venue(&self) -> Venue {
        Venue::Crypto
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn subscribe_frame(&self, keys: &[String]) -> Result<String> {
        self.request("SUBSCRIBE", keys)
    }

    fn unsubscribe_frame(&self, keys: &[String]) -> Result<String> {
        self.request("UNSUBSCRIBE", keys)
    }

    fn parse_frame(&self, text: &str) -> Vec<UpstreamQuote> {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!("Dropping non-JSON crypto frame: {}", e);
                return Vec::new();
            }
        };

        if value.get("result").is_some() {
            if let Ok(ack) = serde_json::from_value::<StreamAck>(value) {
                debug!("Crypto stream acknowledged request {}", ack.id);
            }
            return Vec::new();
        }

        let parsed = if value.get("stream").is_some() {
            serde_json::from_value::<CombinedStreamFrame<TickerEvent>>(value).map(|f| f.data)
        } else {
            serde_json::from_value::<TickerEvent>(value)
        };

        match parsed {
            Ok(ticker) => vec![Self::quote(ticker)],
            Err(e) => {
                debug!("Dropping unrecognized crypto frame: {}", e);
                Vec::new()
            }
        }
    }
}

/// Forex market-data stream
///
/// Authenticates with a `token` header and must see a ping at least every
/// 30 seconds or the provider drops the connection.
pub struct ForexVenue {
    url: String,
    api_key: Option<String>,
    heartbeat_interval: Duration,
}

/// Keep-alive period required by the forex provider
pub const FOREX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

impl ForexVenue {
    pub fn new(url: &str, api_key: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            api_key,
            heartbeat_interval: FOREX_HEARTBEAT_INTERVAL,
        }
    }

    pub fn from_config(config: &ForexFeedConfig) -> Self {
        Self::new(&config.websocket_url, config.api_key.clone())
            .with_heartbeat_interval(Duration::from_secs(config.heartbeat_interval_seconds))
    }

    /// Override the keep-alive period; zero keeps the provider default
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.heartbeat_interval = interval;
        }
        self
    }

    fn quote(quote: ForexQuote) -> UpstreamQuote {
        UpstreamQuote {
            key: quote.symbol.to_ascii_uppercase(),
            price: quote.last.unwrap_or((quote.bid + quote.ask) / Decimal::TWO),
            bid: quote.bid,
            ask: quote.ask,
            change: quote.change_percent.unwrap_or_default(),
        }
    }
}

impl VenueProtocol for ForexVenue {
    fn venue(&self) -> Venue {
        Venue::Forex
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        self.api_key
            .iter()
            .map(|key| ("token".to_string(), key.clone()))
            .collect()
    }

    fn subscribe_frame(&self, keys: &[String]) -> Result<String> {
        Ok(serde_json::to_string(&ForexCommand::subscribe(keys))?)
    }

    fn unsubscribe_frame(&self, keys: &[String]) -> Result<String> {
        Ok(serde_json::to_string(&ForexCommand::unsubscribe(keys))?)
    }

    fn heartbeat_frame(&self) -> Option<String> {
        let ping = ForexCommand::ping(chrono::Utc::now().timestamp_millis());
        serde_json::to_string(&ping).ok()
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        Some(self.heartbeat_interval)
    }

    fn parse_frame(&self, text: &str) -> Vec<UpstreamQuote> {
        let frame: ForexFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping non-JSON forex frame: {}", e);
                return Vec::new();
            }
        };

        if frame.code != Some(1) {
            debug!("Forex frame without data: {:?}", frame.msg);
            return Vec::new();
        }

        let Some(data) = frame.data else {
            return Vec::new();
        };

        // Pong and auth acknowledgements carry non-quote payloads
        let quotes: Vec<ForexQuote> = match data {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            other => serde_json::from_value(other).into_iter().collect(),
        };

        quotes
            .into_iter()
            .filter(|q| q.kind.as_deref().map_or(true, |k| k == "quote"))
            .map(Self::quote)
            .collect()
    }
}
