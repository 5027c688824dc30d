//! Shared domain types used by the calculator, the feed and the store

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Upstream real-time price venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Crypto exchange ticker stream
    Crypto,
    /// Forex market-data stream (also carries metals)
    Forex,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Crypto => write!(f, "crypto"),
            Venue::Forex => write!(f, "forex"),
        }
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order type chosen on the trading panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Lifecycle of a position
///
/// `Pending -> Open -> Closed`, or `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
    Cancelled,
}

impl PositionStatus {
    /// Whether margin is reserved for a position in this status
    pub fn is_committed(self) -> bool {
        matches!(self, PositionStatus::Pending | PositionStatus::Open)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: PositionStatus) -> bool {
        use PositionStatus::*;
        matches!(
            (self, next),
            (Pending, Open) | (Pending, Cancelled) | (Open, Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PositionStatus::Pending => "pending",
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
            PositionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leveraged trade as persisted by the position store
///
/// The core never mutates the persisted fields; `margin_amount` is fixed
/// at open time and is not recomputed from live prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: PositionStatus,
    pub open_price: Decimal,
    #[serde(default)]
    pub close_price: Option<Decimal>,
    pub lots: Decimal,
    pub leverage: u32,
    pub margin_amount: Decimal,
    /// Realized PnL, set only at close
    #[serde(default)]
    pub pnl: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Whether this position's margin counts against free balance
    pub fn is_committed(&self) -> bool {
        self.status.is_committed()
    }
}

/// Trade request handed to the position store on submit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub lots: Decimal,
    pub leverage: u32,
    /// Market price for market orders, the limit price for limit orders
    pub open_price: Decimal,
    pub margin_amount: Decimal,
}

/// Realtime change notification pushed by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "record", rename_all = "lowercase")]
pub enum PositionChange {
    Inserted(Position),
    Updated(Position),
    Deleted { id: String },
}

/// Normalized price update for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Internal symbol naming (as subscribed locally)
    pub symbol: String,
    pub venue: Venue,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Last traded / reference price
    pub price: Decimal,
    /// Percent change over the venue's reference window
    pub change: Decimal,
    pub received_at: DateTime<Utc>,
}

impl PriceTick {
    /// Midpoint between bid and ask
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Ask minus bid
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// Connection status surfaced to feed subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Connection attempt in progress
    Connecting,
    /// Successfully connected and subscribed
    Connected,
    /// Disconnected (with optional reason)
    Disconnected(Option<String>),
    /// Waiting before the next reconnect attempt
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted; no ticks until interest or visibility changes
    Degraded { attempts: u32 },
}

/// Event delivered to a feed subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedEvent {
    /// Price update for the subscribed symbol
    Tick(PriceTick),
    /// Status change of the venue carrying the subscribed symbol
    Status {
        venue: Venue,
        status: ConnectionStatus,
    },
}

impl FeedEvent {
    /// Venue this event relates to
    pub fn venue(&self) -> Venue {
        match self {
            FeedEvent::Tick(tick) => tick.venue,
            FeedEvent::Status { venue, .. } => *venue,
        }
    }
}
