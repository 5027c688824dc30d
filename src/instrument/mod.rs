//! Instrument classification and reference data

pub mod classifier;
pub mod types;

pub use classifier::{classify, pair_code, pip_size, ClassifierCache, InstrumentError};
pub use types::{AssetClass, Classification, Instrument};
