//! leverage_desk Library
//!
//! Trading-panel core of a leveraged trading platform: instrument
//! classification, margin / pip / PnL math, position sizing guards, a live
//! price feed multiplexer over a crypto and a forex venue, and the session
//! state that binds them to a position store.

pub mod common;
pub mod config;
pub mod feed;
pub mod instrument;
pub mod margin;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use common::errors::{CoreError, Result};
pub use common::types::{
    ConnectionStatus, FeedEvent, OrderType, Position, PositionChange, PositionStatus, PriceTick,
    Side, TradeRequest, Venue,
};
pub use config::types::AppConfig;
pub use feed::{PriceFeedMultiplexer, TickSubscription};
pub use instrument::{classify, AssetClass, Classification, Instrument, InstrumentError};
pub use margin::{MarginCalculator, MarginSnapshot};
pub use session::{TradeTicket, TradingSession};
pub use store::{MemoryStore, RestStore};
