//! Client side of the eventbridge event-bus bridge.
//!
//! [`EventBus`] wraps one connection and routes frames to per-address
//! handlers. The transport behind it is pluggable through [`Connector`]:
//! [`WebSocketConnector`] for real bridges, [`MemoryConnector`] for tests.
//!
//! ```no_run
//! use eventbridge_client::{BusOptions, EventBus, WebSocketConnector};
//!
//! # async fn demo() -> Result<(), eventbridge_client::BridgeError> {
//! let mut bus = EventBus::open(
//!     "http://localhost:9999/randomnumber",
//!     BusOptions::default(),
//!     &WebSocketConnector,
//! )?;
//! bus.on_opened(|bus| {
//!     let _ = bus.register_handler("randomnumber", |result| println!("{result:?}"));
//! });
//! bus.run().await;
//! # Ok(())
//! # }
//! ```

mod bus;
mod error;
mod options;
pub mod transport;
mod websocket;

pub use bus::{EventBus, HandlerId, Replier};
pub use error::BridgeError;
pub use options::BusOptions;
pub use transport::{CloseEvent, Connector, MemoryConnector, MemoryPeer, TransportEvent};
pub use websocket::{WebSocketConnector, sockjs_websocket_url};

pub use eventbridge_core::{Address, ConnectionState, Failure, Headers, Message};
