//! Core types for eventbridge.
//!
//! This crate holds the bridge wire frames and the local dispatcher. It has
//! no transport; `eventbridge-client` connects frames to a socket.

mod address;
mod dispatcher;
mod frame;

pub use address::{Address, AddressParseError};
pub use dispatcher::{Delivery, Dispatcher, Event, ListenerError, ListenerId};
pub use frame::{ClientFrame, Failure, Headers, Message, ServerFrame};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport handshake in progress.
    Connecting,
    /// Frames flow both ways.
    Open,
    /// Close requested locally, waiting for the transport.
    Closing,
    /// Terminal. No further frames are delivered.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
