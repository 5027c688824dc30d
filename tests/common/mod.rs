//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use leverage_desk::common::errors::{CoreError, Result};
use leverage_desk::common::traits::{Connector, Transport};
use leverage_desk::common::types::{OrderType, Position, PositionStatus, Side};
use leverage_desk::config::types::FeedSettings;
use leverage_desk::feed::messages::{ForexCommand, StreamRequest};

pub const CRYPTO_URL: &str = "ws://crypto.test/stream";
pub const FOREX_URL: &str = "ws://forex.test/quotes";

/// Feed settings with millisecond backoff so reconnect tests stay fast
pub static FAST_SETTINGS: Lazy<FeedSettings> = Lazy::new(|| FeedSettings {
    reconnect_delay_ms: 10,
    max_reconnect_delay_ms: 40,
    max_reconnect_attempts: 2,
    channel_size: 64,
    ..FeedSettings::default()
});

// ============================================================================
// Recording connector
// ============================================================================

#[derive(Debug)]
struct ConnectionRecord {
    url: String,
    headers: Vec<(String, String)>,
    sent: Vec<String>,
    inbound: Option<mpsc::UnboundedSender<String>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Recorder {
    attempts: Vec<String>,
    connections: Vec<ConnectionRecord>,
    refuse: bool,
    hang_up: bool,
}

/// In-process [`Connector`] that records every connection and frame
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<Recorder>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make subsequent connection attempts fail
    pub fn set_refuse(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Accept subsequent connections but have the peer close them at once
    pub fn set_hang_up(&self, hang_up: bool) {
        self.lock().hang_up = hang_up;
    }

    /// Connection attempts so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.lock().attempts.len()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Indexes of established connections to `url`, oldest first
    pub fn connections_to(&self, url: &str) -> Vec<usize> {
        self.lock()
            .connections
            .iter()
            .enumerate()
            .filter(|(_, c)| c.url == url)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn sent(&self, index: usize) -> Vec<String> {
        self.lock()
            .connections
            .get(index)
            .map(|c| c.sent.clone())
            .unwrap_or_default()
    }

    pub fn headers(&self, index: usize) -> Vec<(String, String)> {
        self.lock()
            .connections
            .get(index)
            .map(|c| c.headers.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.lock().connections.get(index).map_or(false, |c| c.closed)
    }

    /// Deliver an inbound text frame on connection `index`
    pub fn push(&self, index: usize, text: impl Into<String>) {
        if let Some(tx) = self.lock().connections.get(index).and_then(|c| c.inbound.as_ref()) {
            let _ = tx.send(text.into());
        }
    }

    /// Simulate the peer closing connection `index`
    pub fn drop_connection(&self, index: usize) {
        if let Some(c) = self.lock().connections.get_mut(index) {
            c.inbound = None;
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str, headers: &[(String, String)]) -> Result<Box<dyn Transport>> {
        let mut recorder = self.lock();
        recorder.attempts.push(url.to_string());
        if recorder.refuse {
            return Err(CoreError::WebSocketConnection("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let inbound = if recorder.hang_up { None } else { Some(tx) };
        recorder.connections.push(ConnectionRecord {
            url: url.to_string(),
            headers: headers.to_vec(),
            sent: Vec::new(),
            inbound,
            closed: false,
        });
        let index = recorder.connections.len() - 1;

        Ok(Box::new(MockTransport {
            index,
            inner: self.inner.clone(),
            inbound: rx,
        }))
    }
}

struct MockTransport {
    index: usize,
    inner: Arc<Mutex<Recorder>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MockTransport {
    fn record<T>(&self, f: impl FnOnce(&mut ConnectionRecord) -> T) -> T {
        let mut recorder = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut recorder.connections[self.index])
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.record(|c| {
            if c.closed {
                Err(CoreError::WebSocketCommunication("already closed".to_string()))
            } else {
                c.sent.push(text);
                Ok(())
            }
        })
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.record(|c| {
            c.closed = true;
            c.inbound = None;
        });
        self.inbound.close();
        Ok(())
    }
}

// ============================================================================
// Frame replay
// ============================================================================

/// Crypto stream names left subscribed after replaying `frames`
pub fn crypto_subscriptions(frames: &[String]) -> BTreeSet<String> {
    let mut active = BTreeSet::new();
    for frame in frames {
        let Ok(request) = serde_json::from_str::<StreamRequest>(frame) else {
            continue;
        };
        match request.method.as_str() {
            "SUBSCRIBE" => active.extend(request.params),
            "UNSUBSCRIBE" => {
                for param in request.params {
                    active.remove(&param);
                }
            }
            _ => {}
        }
    }
    active
}

/// Forex pair codes left subscribed after replaying `frames`
pub fn forex_subscriptions(frames: &[String]) -> BTreeSet<String> {
    let mut active = BTreeSet::new();
    for frame in frames {
        let Ok(command) = serde_json::from_str::<ForexCommand>(frame) else {
            continue;
        };
        let pairs = command.params.split(',').filter(|p| !p.is_empty()).map(str::to_string);
        match command.ac.as_str() {
            "subscribe" => active.extend(pairs),
            "unsubscribe" => {
                for pair in pairs {
                    active.remove(&pair);
                }
            }
            _ => {}
        }
    }
    active
}

pub fn count_pings(frames: &[String]) -> usize {
    frames
        .iter()
        .filter_map(|f| serde_json::from_str::<ForexCommand>(f).ok())
        .filter(|c| c.ac == "ping")
        .count()
}

// ============================================================================
// Upstream frames
// ============================================================================

/// Combined-stream 24h ticker frame
pub fn crypto_ticker(symbol: &str, bid: &str, ask: &str, last: &str, change: &str) -> String {
    serde_json::json!({
        "stream": format!("{}@ticker", symbol.to_lowercase()),
        "data": {
            "e": "24hrTicker",
            "s": symbol,
            "c": last,
            "b": bid,
            "a": ask,
            "P": change,
        }
    })
    .to_string()
}

/// Forex quote frame
pub fn forex_quote(pair: &str, bid: f64, ask: f64) -> String {
    serde_json::json!({
        "code": 1,
        "data": {"s": pair, "type": "quote", "b": bid, "a": ask}
    })
    .to_string()
}

// ============================================================================
// Async helpers
// ============================================================================

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future` with a test-friendly timeout
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

// ============================================================================
// Positions
// ============================================================================

pub fn position(id: &str, symbol: &str, side: Side, status: PositionStatus) -> Position {
    Position {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        symbol: symbol.to_string(),
        side,
        order_type: OrderType::Market,
        status,
        open_price: dec!(1.1000),
        close_price: None,
        lots: dec!(1),
        leverage: 100,
        margin_amount: dec!(1100),
        pnl: None,
        opened_at: Utc::now(),
        closed_at: None,
    }
}

pub fn with_margin(mut position: Position, margin: Decimal) -> Position {
    position.margin_amount = margin;
    position
}
