//! Margin, pip value and PnL formulas over exact decimals

use rust_decimal::Decimal;
use thiserror::Error;

use crate::common::types::{Position, PriceTick, Side};
use crate::instrument::classifier::{
    pip_size, CRYPTO_CONTRACT_SIZE, FOREX_CONTRACT_SIZE, METAL_CONTRACT_SIZE,
};
use crate::instrument::{AssetClass, Classification};

/// Calculator precondition failures
///
/// These indicate a caller bug (the panel should never ask for a margin
/// without a live price and a chosen leverage) or an input too large to
/// represent, but are still returned as values rather than panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CalcError {
    #[error("price must be positive")]
    NonPositivePrice,
    #[error("leverage must be positive")]
    NonPositiveLeverage,
    #[error("result is out of the representable range")]
    Overflow,
}

fn mul(a: Decimal, b: Decimal) -> Result<Decimal, CalcError> {
    a.checked_mul(b).ok_or(CalcError::Overflow)
}

fn div(a: Decimal, b: Decimal) -> Result<Decimal, CalcError> {
    a.checked_div(b).ok_or(CalcError::Overflow)
}

/// Units per lot used by the margin formula of each asset class
pub fn margin_contract_size(asset_class: AssetClass) -> Decimal {
    match asset_class {
        AssetClass::Crypto => CRYPTO_CONTRACT_SIZE,
        AssetClass::Metal => METAL_CONTRACT_SIZE,
        AssetClass::Forex => FOREX_CONTRACT_SIZE,
    }
}

/// Margin, pip value and PnL formulas
///
/// Every function here is pure and deterministic.
pub struct MarginCalculator;

impl MarginCalculator {
    /// Capital to reserve when opening a position
    ///
    /// - metal: `lots * 100 * price / leverage`
    /// - crypto: `lots * price / leverage`
    /// - forex: `lots * 100000 * price / leverage`
    ///
    /// # Arguments
    /// * `price` - Entry price (market price or limit price)
    /// * `lots` - Position size in lots
    /// * `leverage` - Selected leverage, e.g. 100 for 100x
    /// * `class` - Classification of the traded symbol
    pub fn required_margin(
        price: Decimal,
        lots: Decimal,
        leverage: u32,
        class: &Classification,
    ) -> Result<Decimal, CalcError> {
        if price <= Decimal::ZERO {
            return Err(CalcError::NonPositivePrice);
        }
        if leverage == 0 {
            return Err(CalcError::NonPositiveLeverage);
        }

        let notional = Self::notional_value(price, lots, margin_contract_size(class.asset_class))?;
        div(notional, Decimal::from(leverage))
    }

    /// Position value at `price` before leverage
    pub fn notional_value(price: Decimal, lots: Decimal, contract_size: Decimal) -> Result<Decimal, CalcError> {
        mul(mul(lots, contract_size)?, price)
    }

    /// Value of a one-pip move, in USD
    ///
    /// A pip is `10^-decimals` price units. For forex pairs quoted in a
    /// currency other than USD the quote-currency value is converted using
    /// the pair's own price, which is an approximation of the true cross
    /// rate. Returns zero when that conversion has no usable price.
    pub fn pip_value(lots: Decimal, price: Decimal, class: &Classification) -> Result<Decimal, CalcError> {
        let in_quote = mul(mul(class.contract_size, lots)?, pip_size(class.decimals))?;

        match class.asset_class {
            AssetClass::Forex if class.quote_currency != "USD" => {
                if price > Decimal::ZERO {
                    div(in_quote, price)
                } else {
                    Ok(Decimal::ZERO)
                }
            }
            _ => Ok(in_quote),
        }
    }

    /// Price a position exits at: buys close against the bid, sells against the ask
    pub fn exit_price(side: Side, tick: &PriceTick) -> Decimal {
        match side {
            Side::Buy => tick.bid,
            Side::Sell => tick.ask,
        }
    }

    /// Signed PnL of a position between `open_price` and `close_price`
    ///
    /// Positive when the move favours the position.
    pub fn pnl_at(
        side: Side,
        open_price: Decimal,
        close_price: Decimal,
        lots: Decimal,
        contract_size: Decimal,
    ) -> Result<Decimal, CalcError> {
        let diff = match side {
            Side::Buy => close_price.checked_sub(open_price),
            Side::Sell => open_price.checked_sub(close_price),
        }
        .ok_or(CalcError::Overflow)?;
        mul(mul(diff, lots)?, contract_size)
    }

    /// Mark-to-market PnL of a position against a live tick
    ///
    /// Display only; never persisted.
    pub fn unrealized_pnl(
        position: &Position,
        tick: &PriceTick,
        contract_size: Decimal,
    ) -> Result<Decimal, CalcError> {
        Self::pnl_at(
            position.side,
            position.open_price,
            Self::exit_price(position.side, tick),
            position.lots,
            contract_size,
        )
    }

    /// Signed move from `open_price` to `current_price` in pips
    pub fn pnl_in_pips(
        side: Side,
        open_price: Decimal,
        current_price: Decimal,
        decimals: u32,
    ) -> Result<Decimal, CalcError> {
        let diff = match side {
            Side::Buy => current_price.checked_sub(open_price),
            Side::Sell => open_price.checked_sub(current_price),
        }
        .ok_or(CalcError::Overflow)?;
        div(diff, pip_size(decimals))
    }
}
