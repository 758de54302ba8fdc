//! The event-bus connection wrapper.
//!
//! An [`EventBus`] owns one transport link. It tracks the connection state,
//! routes inbound frames to per-address handlers and turns handler
//! registrations into `register`/`unregister` frames. It never reconnects:
//! once `on_closed` fires the bus is spent.
//!
//! All callbacks run on the task that drives the bus ([`EventBus::run`],
//! [`EventBus::turn`] or [`EventBus::pump`]), one at a time, so they may hold
//! `Rc`/`RefCell` state.

use crate::transport::{CloseEvent, Connector, Outbound, TransportEvent, TransportLink};
use crate::{BridgeError, BusOptions};
use eventbridge_core::{
    Address, ClientFrame, ConnectionState, Failure, Headers, Message, ServerFrame,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use url::Url;

type Handler = Box<dyn FnMut(Result<Message, Failure>)>;
type ReplyHandler = Box<dyn FnOnce(Result<Message, Failure>)>;
type OpenedCallback = Box<dyn FnOnce(&mut EventBus)>;
type ClosedCallback = Box<dyn FnOnce(&CloseEvent)>;
type ErrorCallback = Box<dyn FnMut(&Failure)>;

/// Handle for [`EventBus::unregister_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A single connection to a remote event bus.
pub struct EventBus {
    url: Url,
    options: BusOptions,
    state: ConnectionState,
    link: TransportLink,
    handlers: HashMap<Address, Vec<(HandlerId, Handler)>>,
    reply_handlers: HashMap<Address, ReplyHandler>,
    next_handler: u64,
    on_opened: Option<OpenedCallback>,
    on_closed: Option<ClosedCallback>,
    on_error: Option<ErrorCallback>,
}

impl EventBus {
    /// Start connecting to `url`. Returns immediately; the outcome arrives
    /// through [`on_opened`](Self::on_opened) or [`on_closed`](Self::on_closed)
    /// once the bus is driven.
    pub fn open(
        url: &str,
        options: BusOptions,
        connector: &impl Connector,
    ) -> Result<Self, BridgeError> {
        let url = Url::parse(url)?;
        tracing::info!("Connecting to {}", url);
        let link = connector.connect(&url, &options);
        Ok(Self {
            url,
            options,
            state: ConnectionState::Connecting,
            link,
            handlers: HashMap::new(),
            reply_handlers: HashMap::new(),
            next_handler: 0,
            on_opened: None,
            on_closed: None,
            on_error: None,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Called once when the transport reports readiness. The bus is passed
    /// in so the callback can register handlers.
    pub fn on_opened<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut EventBus) + 'static,
    {
        self.on_opened = Some(Box::new(callback));
    }

    /// Called at most once when the connection ends, including when it
    /// never opened.
    pub fn on_closed<F>(&mut self, callback: F)
    where
        F: FnOnce(&CloseEvent) + 'static,
    {
        self.on_closed = Some(Box::new(callback));
    }

    /// Called for `err` frames that no handler claims.
    pub fn on_error<F>(&mut self, callback: F)
    where
        F: FnMut(&Failure) + 'static,
    {
        self.on_error = Some(Box::new(callback));
    }

    /// Receive messages sent to `address`.
    ///
    /// Only valid while the bus is open. The first handler for an address
    /// sends a `register` frame; later ones share the registration.
    pub fn register_handler<F>(
        &mut self,
        address: impl AsRef<str>,
        handler: F,
    ) -> Result<HandlerId, BridgeError>
    where
        F: FnMut(Result<Message, Failure>) + 'static,
    {
        self.ensure_open()?;
        let address = Address::new(address.as_ref())?;
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;

        if !self.handlers.contains_key(&address) {
            tracing::debug!("Registering {}", address);
            self.transmit(ClientFrame::Register {
                address: address.clone(),
                headers: self.options.headers.clone(),
            })?;
        }
        self.handlers
            .entry(address)
            .or_default()
            .push((id, Box::new(handler)));
        Ok(id)
    }

    /// Remove a handler. Sends `unregister` when it was the last one for its
    /// address. Returns `false` if the handler was unknown.
    pub fn unregister_handler(&mut self, id: HandlerId) -> Result<bool, BridgeError> {
        self.ensure_open()?;
        let Some(address) = self
            .handlers
            .iter()
            .find(|(_, entries)| entries.iter().any(|(hid, _)| *hid == id))
            .map(|(address, _)| address.clone())
        else {
            return Ok(false);
        };

        let now_empty = match self.handlers.get_mut(&address) {
            Some(entries) => {
                entries.retain(|(hid, _)| *hid != id);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.handlers.remove(&address);
            tracing::debug!("Unregistering {}", address);
            self.transmit(ClientFrame::Unregister {
                address,
                headers: self.options.headers.clone(),
            })?;
        }
        Ok(true)
    }

    /// Broadcast `body` to every consumer of `address`.
    pub fn publish<T: Serialize>(
        &self,
        address: impl AsRef<str>,
        body: &T,
    ) -> Result<(), BridgeError> {
        self.ensure_open()?;
        self.transmit(ClientFrame::Publish {
            address: Address::new(address.as_ref())?,
            headers: self.options.headers.clone(),
            body: serde_json::to_value(body)?,
        })
    }

    /// Deliver `body` to one consumer of `address`.
    pub fn send<T: Serialize>(&self, address: impl AsRef<str>, body: &T) -> Result<(), BridgeError> {
        self.ensure_open()?;
        self.transmit(ClientFrame::Send {
            address: Address::new(address.as_ref())?,
            headers: self.options.headers.clone(),
            body: serde_json::to_value(body)?,
            reply_address: None,
        })
    }

    /// Deliver `body` to one consumer of `address` and wait for its reply.
    /// `reply` runs once, with the reply message or the bridge's failure.
    pub fn request<T, F>(
        &mut self,
        address: impl AsRef<str>,
        body: &T,
        reply: F,
    ) -> Result<(), BridgeError>
    where
        T: Serialize,
        F: FnOnce(Result<Message, Failure>) + 'static,
    {
        self.ensure_open()?;
        let address = Address::new(address.as_ref())?;
        let body = serde_json::to_value(body)?;
        let reply_address = Address::new(uuid::Uuid::new_v4().to_string())?;
        self.transmit(ClientFrame::Send {
            address,
            headers: self.options.headers.clone(),
            body,
            reply_address: Some(reply_address.clone()),
        })?;
        self.reply_handlers.insert(reply_address, Box::new(reply));
        Ok(())
    }

    /// Answer a message that carries a reply address.
    pub fn reply<T: Serialize>(&self, message: &Message, body: &T) -> Result<(), BridgeError> {
        let frame = reply_frame(message, &self.options.headers, body)?;
        self.ensure_open()?;
        self.transmit(frame)
    }

    /// A handle for answering messages from inside a handler, where the bus
    /// itself is not reachable.
    pub fn replier(&self) -> Replier {
        Replier {
            outbound: self.link.outbound.clone(),
            headers: self.options.headers.clone(),
        }
    }

    /// Ask the transport to close. `on_closed` fires once it has.
    pub fn close(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            tracing::debug!("Closing connection to {}", self.url);
            self.state = ConnectionState::Closing;
            if self.link.outbound.send(Outbound::Close).is_err() {
                tracing::debug!("Transport already gone");
            }
        }
    }

    /// Drive the bus until the connection is closed.
    pub async fn run(&mut self) {
        while self.turn().await {}
    }

    /// Wait for and process one transport event. Returns `false` once the
    /// bus is closed.
    pub async fn turn(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        let event = match self.link.inbound.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed(CloseEvent::failed("transport went away")),
        };
        self.dispatch(event);
        self.state != ConnectionState::Closed
    }

    /// Process every event already queued, without waiting. Returns how many
    /// were processed.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while self.state != ConnectionState::Closed {
            match self.link.inbound.try_recv() {
                Ok(event) => self.dispatch(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.dispatch(TransportEvent::Closed(CloseEvent::failed(
                        "transport went away",
                    )));
                }
            }
            processed += 1;
        }
        processed
    }

    /// Apply one transport event.
    ///
    /// Frames that arrive before open or after close are dropped.
    pub fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.state != ConnectionState::Connecting {
                    tracing::warn!("Ignoring open signal while {}", self.state);
                    return;
                }
                self.state = ConnectionState::Open;
                tracing::info!("Connected to {}", self.url);
                if let Some(callback) = self.on_opened.take() {
                    callback(self);
                }
            }
            TransportEvent::Frame(frame) => {
                if !matches!(
                    self.state,
                    ConnectionState::Open | ConnectionState::Closing
                ) {
                    tracing::debug!("Dropping frame received while {}: {:?}", self.state, frame);
                    return;
                }
                self.handle_frame(frame);
            }
            TransportEvent::Closed(event) => {
                if self.state == ConnectionState::Closed {
                    tracing::debug!("Ignoring repeated close: {}", event);
                    return;
                }
                self.state = ConnectionState::Closed;
                self.handlers.clear();
                self.reply_handlers.clear();
                tracing::info!("Connection to {} closed ({})", self.url, event);
                if let Some(callback) = self.on_closed.take() {
                    callback(&event);
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Rec(message) => self.deliver(message),
            ServerFrame::Err(failure) => self.fail(failure),
            ServerFrame::Pong => tracing::trace!("pong"),
        }
    }

    fn deliver(&mut self, message: Message) {
        if let Some(entries) = self.handlers.get_mut(&message.address) {
            for (_, handler) in entries.iter_mut() {
                handler(Ok(message.clone()));
            }
            return;
        }
        if let Some(reply) = self.reply_handlers.remove(&message.address) {
            reply(Ok(message));
            return;
        }
        tracing::warn!("No handler found for message on {}", message.address);
    }

    fn fail(&mut self, failure: Failure) {
        if let Some(address) = failure.address.clone() {
            if let Some(entries) = self.handlers.get_mut(&address) {
                for (_, handler) in entries.iter_mut() {
                    handler(Err(failure.clone()));
                }
                return;
            }
            if let Some(reply) = self.reply_handlers.remove(&address) {
                reply(Err(failure));
                return;
            }
        }
        match self.on_error.as_mut() {
            Some(callback) => callback(&failure),
            None => tracing::warn!("Bridge error: {}", failure),
        }
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        match self.state {
            ConnectionState::Open => Ok(()),
            other => Err(BridgeError::NotOpen(other)),
        }
    }

    fn transmit(&self, frame: ClientFrame) -> Result<(), BridgeError> {
        self.link
            .outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| BridgeError::Closed)
    }
}

/// Sends replies on behalf of an [`EventBus`]. Fails with
/// [`BridgeError::Closed`] once the transport is gone.
#[derive(Debug, Clone)]
pub struct Replier {
    outbound: mpsc::UnboundedSender<Outbound>,
    headers: Headers,
}

impl Replier {
    pub fn reply<T: Serialize>(&self, message: &Message, body: &T) -> Result<(), BridgeError> {
        let frame = reply_frame(message, &self.headers, body)?;
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| BridgeError::Closed)
    }
}

fn reply_frame<T: Serialize>(
    message: &Message,
    headers: &Headers,
    body: &T,
) -> Result<ClientFrame, BridgeError> {
    let address = message
        .reply_address
        .clone()
        .ok_or(BridgeError::NoReplyAddress)?;
    Ok(ClientFrame::Send {
        address,
        headers: headers.clone(),
        body: serde_json::to_value(body)?,
        reply_address: None,
    })
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("url", &self.url.as_str())
            .field("state", &self.state)
            .field("addresses", &self.handlers.keys().collect::<Vec<_>>())
            .field("pending_replies", &self.reply_handlers.len())
            .finish()
    }
}
