//! Session-side state: balance, position book and the trade path
//!
//! [`TradingSession`] is the only place that talks to a
//! [`PositionStore`](crate::common::traits::PositionStore). Validation runs
//! locally through the margin guard before anything is submitted.

pub mod book;
pub mod trading;

pub use book::PositionBook;
pub use trading::{Session, TicketViolation, TradeTicket, TradingSession};
