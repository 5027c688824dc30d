//! Wire message types for the upstream price venues

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Crypto venue (exchange combined-stream protocol)
// ============================================================================

/// SUBSCRIBE / UNSUBSCRIBE request on the crypto stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// "SUBSCRIBE" or "UNSUBSCRIBE"
    pub method: String,
    /// Stream names, e.g. `btcusdt@ticker`
    pub params: Vec<String>,
    pub id: u64,
}

/// Acknowledgement of a stream request, `{"result":null,"id":1}`
#[derive(Debug, Clone, Deserialize)]
pub struct StreamAck {
    pub result: Option<serde_json::Value>,
    pub id: u64,
}

/// 24h rolling-window ticker
#[derive(Debug, Clone, Deserialize)]
pub struct TickerEvent {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
    #[serde(rename = "s")]
    pub symbol: String,
    /// Last price
    #[serde(rename = "c")]
    pub last_price: Decimal,
    /// Best bid price
    #[serde(rename = "b")]
    pub best_bid: Decimal,
    /// Best ask price
    #[serde(rename = "a")]
    pub best_ask: Decimal,
    /// Price change percent over the window
    #[serde(rename = "P", default)]
    pub price_change_percent: Decimal,
}

/// Combined-stream envelope, `{"stream":"btcusdt@ticker","data":{..}}`
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStreamFrame<T> {
    pub stream: String,
    pub data: T,
}

// ============================================================================
// Forex venue (market-data provider protocol)
// ============================================================================

/// Command frame on the forex stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForexCommand {
    /// Action: "subscribe", "unsubscribe" or "ping"
    pub ac: String,
    /// Comma-separated pair codes, or a timestamp for pings
    pub params: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,
}

impl ForexCommand {
    pub fn subscribe(pairs: &[String]) -> Self {
        Self {
            ac: "subscribe".to_string(),
            params: pairs.join(","),
            types: Some("quote".to_string()),
        }
    }

    pub fn unsubscribe(pairs: &[String]) -> Self {
        Self {
            ac: "unsubscribe".to_string(),
            params: pairs.join(","),
            types: Some("quote".to_string()),
        }
    }

    pub fn ping(timestamp_ms: i64) -> Self {
        Self {
            ac: "ping".to_string(),
            params: timestamp_ms.to_string(),
            types: None,
        }
    }
}

/// Envelope of every inbound forex frame
#[derive(Debug, Clone, Deserialize)]
pub struct ForexFrame {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub resac: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Quote payload inside a forex frame
#[derive(Debug, Clone, Deserialize)]
pub struct ForexQuote {
    /// Six-letter pair code
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(rename = "b")]
    pub bid: Decimal,
    #[serde(rename = "a")]
    pub ask: Decimal,
    /// Last / reference price
    #[serde(rename = "ld", default)]
    pub last: Option<Decimal>,
    /// Change percent
    #[serde(rename = "chp", default)]
    pub change_percent: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_forex_command_serialization() {
        let cmd = ForexCommand::subscribe(&["EURUSD".to_string(), "XAUUSD".to_string()]);
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(
            json,
            r#"{"ac":"subscribe","params":"EURUSD,XAUUSD","types":"quote"}"#
        );

        let ping = serde_json::to_string(&ForexCommand::ping(1704067200000)).unwrap();
        assert_eq!(ping, r#"{"ac":"ping","params":"1704067200000"}"#);
    }

    #[test]
    fn test_ticker_event_parses_string_decimals() {
        let json = r#"{"e":"24hrTicker","E":1704067200000,"s":"BTCUSDT","p":"120.5","P":"0.241","c":"50010.10","b":"50010.00","B":"1.2","a":"50010.20","A":"0.8"}"#;
        let ticker: TickerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.last_price, dec!(50010.10));
        assert_eq!(ticker.best_bid, dec!(50010.00));
        assert_eq!(ticker.best_ask, dec!(50010.20));
        assert_eq!(ticker.price_change_percent, dec!(0.241));
    }
}
