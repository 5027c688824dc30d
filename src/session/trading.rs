//! Trading session binding the calculator and guard to a position store

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::book::PositionBook;
use crate::common::errors::{CoreError, Result};
use crate::common::traits::PositionStore;
use crate::common::types::{
    OrderType, Position, PositionChange, PositionStatus, PriceTick, Side, TradeRequest,
};
use crate::instrument::{ClassifierCache, Instrument};
use crate::margin::guard::{self, MarginSnapshot};
use crate::margin::{
    CalcError, LeverageViolation, LimitPriceViolation, LotSizeViolation, MarginCalculator,
};

/// Authenticated user context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub balance: Decimal,
}

impl Session {
    /// Validate session data received from the auth/profile boundary
    pub fn new(user_id: &str, balance: Decimal) -> Result<Self> {
        if user_id.trim().is_empty() {
            return Err(CoreError::InvalidSession("empty user id".to_string()));
        }
        if balance < Decimal::ZERO {
            return Err(CoreError::InvalidSession(format!(
                "negative balance {} for user {}",
                balance, user_id
            )));
        }
        Ok(Self {
            user_id: user_id.to_string(),
            balance,
        })
    }
}

/// User input of the trading panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTicket {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub lots: Decimal,
    pub leverage: u32,
    /// Required for limit orders, ignored for market orders
    #[serde(default)]
    pub limit_price: Option<Decimal>,
}

impl TradeTicket {
    pub fn market(symbol: &str, side: Side, lots: Decimal, leverage: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            lots,
            leverage,
            limit_price: None,
        }
    }

    pub fn limit(symbol: &str, side: Side, lots: Decimal, leverage: u32, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            lots,
            leverage,
            limit_price: Some(price),
        }
    }
}

/// Why a ticket cannot become a trade request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TicketViolation {
    #[error("ticket symbol {ticket} does not match instrument {instrument}")]
    SymbolMismatch { ticket: String, instrument: String },
    #[error(transparent)]
    Leverage(#[from] LeverageViolation),
    #[error(transparent)]
    LimitPrice(#[from] LimitPriceViolation),
    #[error(transparent)]
    Calculation(#[from] CalcError),
    #[error(transparent)]
    LotSize(#[from] LotSizeViolation),
}

/// Session-side state of one user: balance, positions and the trade path
pub struct TradingSession<S> {
    store: Arc<S>,
    session: Session,
    book: PositionBook,
    classifier: ClassifierCache,
}

impl<S: PositionStore> TradingSession<S> {
    /// Load balance and committed positions for `user_id`
    #[instrument(skip(store))]
    pub async fn load(store: Arc<S>, user_id: &str) -> Result<Self> {
        let balance = store.get_balance(user_id).await?;
        let session = Session::new(user_id, balance)?;
        let positions = store
            .list_positions(user_id, &[PositionStatus::Open, PositionStatus::Pending])
            .await?;
        info!(
            "Loaded session for {} with balance {} and {} positions",
            user_id,
            balance,
            positions.len()
        );

        Ok(Self {
            store,
            session,
            book: PositionBook::from_positions(positions),
            classifier: ClassifierCache::new(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    pub fn balance(&self) -> Decimal {
        self.session.balance
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn position(&self, id: &str) -> Option<&Position> {
        self.book.get(id)
    }

    /// Re-read the balance from the store
    pub async fn refresh_balance(&mut self) -> Result<Decimal> {
        let balance = self.store.get_balance(&self.session.user_id).await?;
        self.session = Session::new(&self.session.user_id, balance)?;
        Ok(balance)
    }

    pub fn margin_snapshot(&self) -> MarginSnapshot {
        self.book.margin_snapshot()
    }

    /// Balance not reserved by committed positions
    pub fn free_margin(&self) -> Decimal {
        self.margin_snapshot().available(self.session.balance)
    }

    pub fn max_affordable_lots(&self, instrument: &Instrument, leverage: u32, price: Decimal) -> Decimal {
        guard::max_affordable_lots(
            self.session.balance,
            self.margin_snapshot().committed,
            leverage,
            price,
            &instrument.classification(),
        )
    }

    /// Run every guard over `ticket` and build the store request
    ///
    /// Market orders open at `market_price`; limit orders at their limit
    /// price. Margin and affordability use the open price.
    pub fn prepare_trade(
        &self,
        ticket: &TradeTicket,
        instrument: &Instrument,
        market_price: Decimal,
    ) -> std::result::Result<TradeRequest, TicketViolation> {
        if ticket.symbol != instrument.symbol {
            return Err(TicketViolation::SymbolMismatch {
                ticket: ticket.symbol.clone(),
                instrument: instrument.symbol.clone(),
            });
        }
        guard::validate_leverage(instrument, ticket.leverage)?;
        guard::validate_limit_price(ticket.order_type, ticket.limit_price)?;

        let open_price = match (ticket.order_type, ticket.limit_price) {
            (OrderType::Limit, Some(price)) => price,
            _ => market_price,
        };
        if open_price <= Decimal::ZERO {
            return Err(CalcError::NonPositivePrice.into());
        }

        // Bounds first so an absurd lot size is reported, not computed with
        let affordable = self.max_affordable_lots(instrument, ticket.leverage, open_price);
        guard::validate_lot_size(ticket.lots, instrument, affordable)?;

        let class = instrument.classification();
        let margin_amount =
            MarginCalculator::required_margin(open_price, ticket.lots, ticket.leverage, &class)?;

        Ok(TradeRequest {
            user_id: self.session.user_id.clone(),
            symbol: ticket.symbol.clone(),
            side: ticket.side,
            order_type: ticket.order_type,
            lots: ticket.lots,
            leverage: ticket.leverage,
            open_price,
            margin_amount,
        })
    }

    /// Hand a validated request to the store
    ///
    /// The balance is left as is: the new position's margin is reserved
    /// through the margin snapshot. Never retried.
    #[instrument(skip(self, request), fields(symbol = %request.symbol))]
    pub async fn submit_trade(&mut self, request: TradeRequest) -> Result<Position> {
        if request.user_id != self.session.user_id {
            return Err(CoreError::InvalidSession(format!(
                "request for user {} in session of {}",
                request.user_id, self.session.user_id
            )));
        }
        let position = self.store.submit_trade(&request).await?;
        info!("Submitted {} {} {} lots as {}", position.side, position.symbol, position.lots, position.id);
        self.book.upsert(position.clone());
        Ok(position)
    }

    /// Close an open position at the exit side of `tick`
    ///
    /// Realized PnL is computed locally and persisted once. The session
    /// balance is replaced by the store's new balance.
    #[instrument(skip(self, tick))]
    pub async fn close_position(&mut self, id: &str, tick: &PriceTick) -> Result<Position> {
        let position = self
            .book
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::PositionNotFound(id.to_string()))?;
        if position.status != PositionStatus::Open {
            return Err(CoreError::Rejected(format!("position {} is {}", id, position.status)));
        }
        if tick.symbol != position.symbol {
            return Err(CoreError::Rejected(format!(
                "tick for {} cannot price position on {}",
                tick.symbol, position.symbol
            )));
        }

        let contract_size = self.classifier.classify(&position.symbol)?.contract_size;
        let close_price = MarginCalculator::exit_price(position.side, tick);
        let pnl = MarginCalculator::pnl_at(
            position.side,
            position.open_price,
            close_price,
            position.lots,
            contract_size,
        )?;

        let new_balance = self.store.close_position(id, close_price, pnl).await?;
        self.session.balance = new_balance;

        let closed = Position {
            status: PositionStatus::Closed,
            close_price: Some(close_price),
            pnl: Some(pnl),
            closed_at: Some(Utc::now()),
            ..position
        };
        self.book.upsert(closed.clone());
        info!("Closed {} at {} with pnl {}", id, close_price, pnl);
        Ok(closed)
    }

    /// Cancel a pending limit order
    #[instrument(skip(self))]
    pub async fn cancel_position(&mut self, id: &str) -> Result<()> {
        let position = self
            .book
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::PositionNotFound(id.to_string()))?;
        if position.status != PositionStatus::Pending {
            return Err(CoreError::Rejected(format!("position {} is {}", id, position.status)));
        }

        self.store.cancel_pending_position(id).await?;
        self.book.upsert(Position {
            status: PositionStatus::Cancelled,
            closed_at: Some(Utc::now()),
            ..position
        });
        Ok(())
    }

    /// Display PnL of a position against a live tick
    ///
    /// Pending positions have none yet; closed ones report their realized PnL.
    pub fn live_pnl(&self, id: &str, tick: &PriceTick) -> Result<Decimal> {
        let position = self
            .book
            .get(id)
            .ok_or_else(|| CoreError::PositionNotFound(id.to_string()))?;

        match position.status {
            PositionStatus::Open => {
                if tick.symbol != position.symbol {
                    return Err(CoreError::Rejected(format!(
                        "tick for {} cannot price position on {}",
                        tick.symbol, position.symbol
                    )));
                }
                let contract_size = self.classifier.classify(&position.symbol)?.contract_size;
                Ok(MarginCalculator::unrealized_pnl(position, tick, contract_size)?)
            }
            PositionStatus::Closed => Ok(position.pnl.unwrap_or(Decimal::ZERO)),
            PositionStatus::Pending | PositionStatus::Cancelled => Ok(Decimal::ZERO),
        }
    }

    /// Reconcile a realtime push; returns whether local state changed
    pub fn apply_change(&mut self, change: PositionChange) -> bool {
        let foreign = match &change {
            PositionChange::Inserted(p) | PositionChange::Updated(p) => {
                p.user_id != self.session.user_id
            }
            PositionChange::Deleted { .. } => false,
        };
        if foreign {
            warn!("Ignoring position change for another user");
            return false;
        }
        self.book.apply(change)
    }

    /// Committed positions, ordered by open time, for the price feed
    pub fn committed_positions(&self) -> Vec<Position> {
        self.book.committed_positions()
    }

    pub fn symbols_of_interest(&self) -> BTreeSet<String> {
        self.book.symbols_of_interest()
    }
}
