//! Live price feed
//!
//! # Architecture
//!
//! ```text
//!  subscribe / viewed instrument / positions / visibility
//!                         │
//!                         ▼
//!               ┌───────────────────┐   last tick cache
//!               │    Coordinator    │── fan-out to TickSubscriptions
//!               └───────────────────┘
//!                 │ watch        ▲ mpsc (ticks, status)
//!                 ▼              │
//!        ┌────────────────┐  ┌────────────────┐
//!        │ crypto venue   │  │ forex venue    │   one connection each,
//!        │ connection     │  │ connection     │   reconnect + heartbeat
//!        └────────────────┘  └────────────────┘
//! ```

pub mod connection;
pub mod messages;
pub mod multiplexer;
pub mod transport;
pub mod venue;

pub use connection::{ConnectionControl, ConnectionState, ReconnectPolicy};
pub use multiplexer::{PriceFeedMultiplexer, TickSubscription};
pub use transport::{WsConnector, WsTransport};
pub use venue::{CryptoVenue, ForexVenue, UpstreamQuote, VenueProtocol};
