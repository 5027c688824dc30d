//! Symbol classification rules
//!
//! A symbol is classified by a handful of prefix/suffix rules plus a
//! closed precision table keyed by exact pair code. Downstream margin and
//! PnL math depends on these results, so the rules are exhaustive and
//! deterministic.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use super::types::{AssetClass, Classification};

/// Venue prefix marking a crypto-exchange symbol, e.g. `BINANCE:BTCUSDT`
pub const CRYPTO_VENUE_PREFIX: &str = "BINANCE";
/// Venue prefix marking a forex symbol, e.g. `FX:EUR/USD`
pub const FOREX_VENUE_PREFIX: &str = "FX";
/// Quote suffixes identifying a crypto pair
pub const STABLECOIN_SUFFIXES: [&str; 3] = ["USDT", "USDC", "BUSD"];
/// The only metal instrument
pub const METAL_TICKER: &str = "XAUUSD";

pub const CRYPTO_CONTRACT_SIZE: Decimal = dec!(1);
pub const METAL_CONTRACT_SIZE: Decimal = dec!(100);
pub const FOREX_CONTRACT_SIZE: Decimal = dec!(100000);

/// Exact-code precision overrides for crypto pairs
const CRYPTO_DECIMALS: [(&str, u32); 9] = [
    ("BTCUSDT", 2),
    ("ETHUSDT", 2),
    ("SOLUSDT", 2),
    ("LINKUSDT", 2),
    ("BNBUSDT", 2),
    ("DOGEUSDT", 5),
    ("ADAUSDT", 4),
    ("TRXUSDT", 4),
    ("DOTUSDT", 3),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    #[error("empty symbol")]
    EmptySymbol,
    #[error("unrecognized symbol: {0}")]
    UnrecognizedSymbol(String),
}

/// Split an optional `VENUE:` prefix off a symbol
fn split_venue(symbol: &str) -> (Option<String>, &str) {
    match symbol.split_once(':') {
        Some((venue, rest)) => (Some(venue.trim().to_ascii_uppercase()), rest),
        None => (None, symbol),
    }
}

/// Venue-neutral pair code: prefix stripped, separators removed, uppercased
pub fn pair_code(symbol: &str) -> String {
    let (_, rest) = split_venue(symbol.trim());
    rest.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn stablecoin_suffix(code: &str) -> Option<&'static str> {
    STABLECOIN_SUFFIXES
        .iter()
        .copied()
        .find(|suffix| code.len() > suffix.len() && code.ends_with(suffix))
}

fn is_currency_pair(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_alphabetic())
}

/// Price decimal precision for a pair code
pub fn price_decimals(code: &str, asset_class: AssetClass) -> u32 {
    if asset_class == AssetClass::Metal {
        return 2;
    }
    if code.ends_with("JPY") {
        return 3;
    }
    if let Some((_, decimals)) = CRYPTO_DECIMALS.iter().find(|(pair, _)| *pair == code) {
        return *decimals;
    }
    if stablecoin_suffix(code).is_none() {
        return 5;
    }
    2
}

/// Smallest price increment for a given precision, `10^-decimals`
pub fn pip_size(decimals: u32) -> Decimal {
    Decimal::new(1, decimals)
}

/// Classify a symbol into asset class, contract size, quote currency
/// and precision.
pub fn classify(symbol: &str) -> Result<Classification, InstrumentError> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return Err(InstrumentError::EmptySymbol);
    }

    let (venue, _) = split_venue(trimmed);
    let code = pair_code(trimmed);
    if code.is_empty() {
        return Err(InstrumentError::UnrecognizedSymbol(symbol.to_string()));
    }

    let stablecoin = stablecoin_suffix(&code);
    let (asset_class, contract_size, quote_currency) =
        if venue.as_deref() == Some(CRYPTO_VENUE_PREFIX) || stablecoin.is_some() {
            (
                AssetClass::Crypto,
                CRYPTO_CONTRACT_SIZE,
                stablecoin.unwrap_or("USDT").to_string(),
            )
        } else if code == METAL_TICKER {
            (AssetClass::Metal, METAL_CONTRACT_SIZE, "USD".to_string())
        } else if is_currency_pair(&code)
            && (venue.is_none() || venue.as_deref() == Some(FOREX_VENUE_PREFIX))
        {
            (AssetClass::Forex, FOREX_CONTRACT_SIZE, code[3..].to_string())
        } else {
            return Err(InstrumentError::UnrecognizedSymbol(symbol.to_string()));
        };

    Ok(Classification {
        asset_class,
        contract_size,
        quote_currency,
        decimals: price_decimals(&code, asset_class),
        pair_code: code,
    })
}

/// Per-symbol memo of [`classify`] results
#[derive(Debug, Default)]
pub struct ClassifierCache {
    entries: RwLock<HashMap<String, Classification>>,
}

impl ClassifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `symbol`, reusing an earlier result when present
    pub fn classify(&self, symbol: &str) -> Result<Classification, InstrumentError> {
        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
        {
            return Ok(hit.clone());
        }

        let class = classify(symbol)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.to_string(), class.clone());
        Ok(class)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
