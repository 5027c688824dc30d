//! Trait definitions for the external collaborators of the core

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::errors::Result;
use super::types::{Position, PositionStatus, TradeRequest};
use crate::instrument::Instrument;

/// A live, text-framed upstream connection
///
/// Implemented over tokio-tungstenite for production and by in-process
/// mocks in tests.
#[async_trait]
pub trait Transport: Send {
    /// Send a single text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Wait for the next text frame
    ///
    /// Returns `None` once the peer closed the connection. Must be cancel
    /// safe, since it is raced against timers and control changes.
    async fn next_text(&mut self) -> Option<Result<String>>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports for a venue
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`, sending the given extra handshake headers
    async fn connect(&self, url: &str, headers: &[(String, String)]) -> Result<Box<dyn Transport>>;
}

/// Remote balance and position store
///
/// All mutations are assumed atomic on the remote side. Callers never
/// retry them automatically.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Current free balance of the user
    async fn get_balance(&self, user_id: &str) -> Result<Decimal>;

    /// Positions of the user whose status is in `statuses`
    async fn list_positions(
        &self,
        user_id: &str,
        statuses: &[PositionStatus],
    ) -> Result<Vec<Position>>;

    /// Persist a new trade; returns the stored position
    async fn submit_trade(&self, request: &TradeRequest) -> Result<Position>;

    /// Close an open position at `close_price` with realized `pnl`
    ///
    /// Returns the user's new balance.
    async fn close_position(&self, id: &str, close_price: Decimal, pnl: Decimal) -> Result<Decimal>;

    /// Cancel a pending (unfilled limit) position
    async fn cancel_pending_position(&self, id: &str) -> Result<()>;
}

/// Remote instrument metadata store
#[async_trait]
pub trait InstrumentStore: Send + Sync {
    /// Look up an instrument; `CoreError::InstrumentNotFound` when unknown
    async fn get_instrument(&self, symbol: &str) -> Result<Instrument>;
}
