//! In-process store with the same atomicity contract as the remote one

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::common::errors::{CoreError, Result};
use crate::common::traits::{InstrumentStore, PositionStore};
use crate::common::types::{OrderType, Position, PositionStatus, TradeRequest};
use crate::instrument::Instrument;
use crate::margin::guard::MarginSnapshot;

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<String, Decimal>,
    positions: HashMap<String, Position>,
}

/// Store backed by process memory
///
/// Each mutation runs under a single lock, so balance and position updates
/// are applied together or not at all. Margin is reserved implicitly: it
/// stays in the balance and counts against free margin while the position
/// is committed. Closing credits only the realized PnL.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
    instruments: HashMap<String, Instrument>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, user_id: &str, balance: Decimal) -> Self {
        self.ledger
            .get_mut()
            .balances
            .insert(user_id.to_string(), balance);
        self
    }

    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.instruments.insert(instrument.symbol.clone(), instrument);
        self
    }

    /// Seed an existing position
    pub async fn insert_position(&self, position: Position) {
        self.ledger
            .lock()
            .await
            .positions
            .insert(position.id.clone(), position);
    }

    pub async fn position(&self, id: &str) -> Option<Position> {
        self.ledger.lock().await.positions.get(id).cloned()
    }

    /// Fill a pending limit order at its limit price
    pub async fn fill_pending(&self, id: &str) -> Result<Position> {
        let mut ledger = self.ledger.lock().await;
        let position = ledger
            .positions
            .get_mut(id)
            .ok_or_else(|| CoreError::PositionNotFound(id.to_string()))?;
        if !position.status.can_transition_to(PositionStatus::Open) {
            return Err(CoreError::Rejected(format!(
                "position {} is {}, not pending",
                id, position.status
            )));
        }
        position.status = PositionStatus::Open;
        Ok(position.clone())
    }

    fn generate_id(&self) -> String {
        format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn get_balance(&self, user_id: &str) -> Result<Decimal> {
        self.ledger
            .lock()
            .await
            .balances
            .get(user_id)
            .copied()
            .ok_or_else(|| CoreError::InvalidSession(format!("no profile for user {}", user_id)))
    }

    async fn list_positions(
        &self,
        user_id: &str,
        statuses: &[PositionStatus],
    ) -> Result<Vec<Position>> {
        let ledger = self.ledger.lock().await;
        let mut positions: Vec<Position> = ledger
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .filter(|p| statuses.is_empty() || statuses.contains(&p.status))
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));
        Ok(positions)
    }

    async fn submit_trade(&self, request: &TradeRequest) -> Result<Position> {
        let mut ledger = self.ledger.lock().await;
        let balance = ledger
            .balances
            .get(&request.user_id)
            .copied()
            .ok_or_else(|| CoreError::InvalidSession(format!("no profile for user {}", request.user_id)))?;

        let snapshot = MarginSnapshot::from_positions(
            ledger.positions.values().filter(|p| p.user_id == request.user_id),
        );
        if request.margin_amount > snapshot.available(balance) {
            return Err(CoreError::Rejected(format!(
                "insufficient free margin: required {}, available {}",
                request.margin_amount,
                snapshot.available(balance)
            )));
        }

        let status = match request.order_type {
            OrderType::Market => PositionStatus::Open,
            OrderType::Limit => PositionStatus::Pending,
        };
        let position = Position {
            id: self.generate_id(),
            user_id: request.user_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status,
            open_price: request.open_price,
            close_price: None,
            lots: request.lots,
            leverage: request.leverage,
            margin_amount: request.margin_amount,
            pnl: None,
            opened_at: Utc::now(),
            closed_at: None,
        };
        debug!("Stored {} position {} for {}", status, position.id, position.symbol);
        ledger.positions.insert(position.id.clone(), position.clone());
        Ok(position)
    }

    async fn close_position(&self, id: &str, close_price: Decimal, pnl: Decimal) -> Result<Decimal> {
        let mut ledger = self.ledger.lock().await;
        let position = ledger
            .positions
            .get_mut(id)
            .ok_or_else(|| CoreError::PositionNotFound(id.to_string()))?;
        if !position.status.can_transition_to(PositionStatus::Closed) {
            return Err(CoreError::Rejected(format!("position {} is {}", id, position.status)));
        }

        position.status = PositionStatus::Closed;
        position.close_price = Some(close_price);
        position.pnl = Some(pnl);
        position.closed_at = Some(Utc::now());
        let user_id = position.user_id.clone();

        let balance = ledger.balances.entry(user_id).or_insert(Decimal::ZERO);
        *balance += pnl;
        Ok(*balance)
    }

    async fn cancel_pending_position(&self, id: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        let position = ledger
            .positions
            .get_mut(id)
            .ok_or_else(|| CoreError::PositionNotFound(id.to_string()))?;
        if !position.status.can_transition_to(PositionStatus::Cancelled) {
            return Err(CoreError::Rejected(format!("position {} is {}", id, position.status)));
        }
        position.status = PositionStatus::Cancelled;
        position.closed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl InstrumentStore for MemoryStore {
    async fn get_instrument(&self, symbol: &str) -> Result<Instrument> {
        self.instruments
            .get(symbol)
            .cloned()
            .ok_or_else(|| CoreError::InstrumentNotFound(symbol.to_string()))
    }
}
