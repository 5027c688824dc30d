//! Instrument reference data

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::classifier::{self, InstrumentError};
use crate::common::types::Venue;

/// Asset class of a tradable symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Forex,
    Metal,
}

impl AssetClass {
    /// Venue whose stream carries prices for this class
    pub fn venue(self) -> Venue {
        match self {
            AssetClass::Crypto => Venue::Crypto,
            AssetClass::Forex | AssetClass::Metal => Venue::Forex,
        }
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetClass::Crypto => write!(f, "crypto"),
            AssetClass::Forex => write!(f, "forex"),
            AssetClass::Metal => write!(f, "metal"),
        }
    }
}

/// Derived properties of a symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub asset_class: AssetClass,
    /// Units per lot
    pub contract_size: Decimal,
    pub quote_currency: String,
    /// Price decimal precision
    pub decimals: u32,
    /// Venue-neutral pair code, e.g. `EURUSD` for `FX:EUR/USD`
    pub pair_code: String,
}

impl Classification {
    pub fn venue(&self) -> Venue {
        self.asset_class.venue()
    }

    /// Smallest price increment at this precision
    pub fn pip_size(&self) -> Decimal {
        classifier::pip_size(self.decimals)
    }
}

/// Tradable instrument with its trading constraints
///
/// Immutable reference data, fetched once from the metadata store and
/// cached for the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub contract_size: Decimal,
    pub quote_currency: String,
    pub decimals: u32,
    pub min_lot: Decimal,
    pub max_lot: Decimal,
    /// Allowed leverage values, ascending
    pub leverage_options: Vec<u32>,
}

/// Default lot bounds and leverage ladder for instruments built locally
pub const DEFAULT_MIN_LOT: Decimal = dec!(0.01);
pub const DEFAULT_MAX_LOT: Decimal = dec!(100);
pub const DEFAULT_LEVERAGE_OPTIONS: [u32; 7] = [1, 10, 20, 50, 100, 200, 500];

impl Instrument {
    /// Build an instrument from the classifier with default constraints
    pub fn from_symbol(symbol: &str) -> Result<Self, InstrumentError> {
        let class = classifier::classify(symbol)?;
        Ok(Self {
            symbol: symbol.to_string(),
            asset_class: class.asset_class,
            contract_size: class.contract_size,
            quote_currency: class.quote_currency,
            decimals: class.decimals,
            min_lot: DEFAULT_MIN_LOT,
            max_lot: DEFAULT_MAX_LOT,
            leverage_options: DEFAULT_LEVERAGE_OPTIONS.to_vec(),
        })
    }

    pub fn with_lot_bounds(mut self, min_lot: Decimal, max_lot: Decimal) -> Self {
        self.min_lot = min_lot;
        self.max_lot = max_lot;
        self
    }

    pub fn with_leverage_options(mut self, mut options: Vec<u32>) -> Self {
        options.sort_unstable();
        options.dedup();
        self.leverage_options = options;
        self
    }

    /// Classification view of this instrument's reference data
    pub fn classification(&self) -> Classification {
        Classification {
            asset_class: self.asset_class,
            contract_size: self.contract_size,
            quote_currency: self.quote_currency.clone(),
            decimals: self.decimals,
            pair_code: classifier::pair_code(&self.symbol),
        }
    }

    pub fn venue(&self) -> Venue {
        self.asset_class.venue()
    }

    pub fn offers_leverage(&self, leverage: u32) -> bool {
        self.leverage_options.contains(&leverage)
    }

    pub fn max_leverage(&self) -> Option<u32> {
        self.leverage_options.iter().copied().max()
    }
}
