//! Error types for the library

use thiserror::Error;

/// Result type alias using our CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for feed and store operations
///
/// Validation failures from the guard are not represented
/// here; those return their own discriminated results.
#[derive(Error, Debug)]
pub enum CoreError {
    /// WebSocket connection errors
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    /// WebSocket send/receive errors
    #[error("WebSocket communication error: {0}")]
    WebSocketCommunication(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Symbol the classifier cannot place
    #[error(transparent)]
    Instrument(#[from] crate::instrument::InstrumentError),

    /// Margin or PnL arithmetic failed
    #[error(transparent)]
    Calculation(#[from] crate::margin::CalcError),

    /// Instrument metadata not found
    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    /// Position not found in the store or the local book
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    /// The store refused a trade mutation
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Session data failed boundary validation
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// The multiplexer has been shut down
    #[error("Price feed has been shut down")]
    FeedShutdown,

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for CoreError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CoreError::WebSocketCommunication(err.to_string())
    }
}
