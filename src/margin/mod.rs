//! Margin, PnL and position-sizing math
//!
//! - [`MarginCalculator`]: required margin, pip value, unrealized and
//!   realized PnL
//! - [`guard`]: affordability ceiling and lot / limit-price / leverage
//!   validation against a [`MarginSnapshot`]
//!
//! Everything in this module is synchronous and side-effect free, so it
//! can run on every input change of the trading panel.

mod calculator;
pub mod guard;

pub use calculator::{margin_contract_size, CalcError, MarginCalculator};
pub use guard::{
    effective_max_lots, max_affordable_lots, validate_leverage, validate_limit_price,
    validate_lot_size, LeverageViolation, LimitPriceViolation, LotSizeViolation, MarginSnapshot,
};
