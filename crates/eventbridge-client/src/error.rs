use eventbridge_core::{AddressParseError, ConnectionState};

/// Errors surfaced synchronously by the event bus.
///
/// Connection failures are not errors here: they arrive through the
/// `on_closed` callback as a [`crate::CloseEvent`].
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("event bus is {0}, expected open")]
    NotOpen(ConnectionState),
    #[error("transport is gone")]
    Closed,
    #[error("message has no reply address")]
    NoReplyAddress,
    #[error(transparent)]
    Address(#[from] AddressParseError),
    #[error("body encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
