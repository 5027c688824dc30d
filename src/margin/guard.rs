//! Position sizing guard
//!
//! Synchronous validators over a caller-supplied balance / margin / price
//! snapshot. Nothing here fetches state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::{OrderType, Position};
use crate::instrument::classifier::METAL_CONTRACT_SIZE;
use crate::instrument::{AssetClass, Classification, Instrument};

/// Capital already reserved by open and pending positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginSnapshot {
    /// Sum of `margin_amount` over committed positions
    pub committed: Decimal,
    /// Number of committed positions
    pub position_count: usize,
}

impl MarginSnapshot {
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        positions
            .into_iter()
            .filter(|p| p.is_committed())
            .fold(Self::default(), |acc, p| Self {
                committed: acc.committed.saturating_add(p.margin_amount),
                position_count: acc.position_count + 1,
            })
    }

    /// Balance left after committed margin, floored at zero
    pub fn available(&self, balance: Decimal) -> Decimal {
        balance.saturating_sub(self.committed).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LotSizeViolation {
    #[error("lot size {requested} is below the minimum of {min}")]
    BelowMinimum { requested: Decimal, min: Decimal },
    #[error("lot size {requested} exceeds the instrument maximum of {max}")]
    AboveInstrumentMaximum { requested: Decimal, max: Decimal },
    #[error("lot size {requested} exceeds the affordable maximum of {max}")]
    AboveAffordableMaximum { requested: Decimal, max: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimitPriceViolation {
    #[error("limit price must be positive")]
    NonPositive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LeverageViolation {
    #[error("leverage {0}x is not offered for this instrument")]
    NotOffered(u32),
}

fn price_denominator(price: Decimal, class: &Classification) -> Option<Decimal> {
    match class.asset_class {
        AssetClass::Crypto => Some(price),
        AssetClass::Metal => price.checked_mul(METAL_CONTRACT_SIZE),
        AssetClass::Forex => price.checked_mul(class.contract_size),
    }
}

/// Largest lot size the free balance can margin at `leverage`
///
/// Returns zero while price, leverage or balance is still unknown; that is
/// a not-ready state rather than an error. A result beyond the decimal
/// range saturates at `Decimal::MAX`, which no instrument maximum reaches.
pub fn max_affordable_lots(
    balance: Decimal,
    committed_margin: Decimal,
    leverage: u32,
    price: Decimal,
    class: &Classification,
) -> Decimal {
    if balance <= Decimal::ZERO || leverage == 0 || price <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    // A denominator past the decimal range affords nothing
    let denominator = match price_denominator(price, class) {
        Some(d) if d > Decimal::ZERO => d,
        _ => return Decimal::ZERO,
    };

    let available = balance.saturating_sub(committed_margin).max(Decimal::ZERO);
    available
        .checked_mul(Decimal::from(leverage))
        .and_then(|buying_power| buying_power.checked_div(denominator))
        .unwrap_or(Decimal::MAX)
}

/// Ceiling offered to the user: the tighter of instrument and affordability limits
pub fn effective_max_lots(instrument: &Instrument, max_affordable: Decimal) -> Decimal {
    instrument.max_lot.min(max_affordable)
}

pub fn validate_lot_size(
    requested: Decimal,
    instrument: &Instrument,
    max_affordable: Decimal,
) -> Result<(), LotSizeViolation> {
    if requested < instrument.min_lot {
        return Err(LotSizeViolation::BelowMinimum {
            requested,
            min: instrument.min_lot,
        });
    }
    if requested > instrument.max_lot {
        return Err(LotSizeViolation::AboveInstrumentMaximum {
            requested,
            max: instrument.max_lot,
        });
    }
    if requested > max_affordable {
        return Err(LotSizeViolation::AboveAffordableMaximum {
            requested,
            max: max_affordable,
        });
    }
    Ok(())
}

/// Limit orders need a positive price; market orders always pass
pub fn validate_limit_price(
    order_type: OrderType,
    limit_price: Option<Decimal>,
) -> Result<(), LimitPriceViolation> {
    match (order_type, limit_price) {
        (OrderType::Market, _) => Ok(()),
        (OrderType::Limit, Some(price)) if price > Decimal::ZERO => Ok(()),
        (OrderType::Limit, _) => Err(LimitPriceViolation::NonPositive),
    }
}

pub fn validate_leverage(instrument: &Instrument, leverage: u32) -> Result<(), LeverageViolation> {
    if instrument.offers_leverage(leverage) {
        Ok(())
    } else {
        Err(LeverageViolation::NotOffered(leverage))
    }
}
