//! The seam between the event bus and whatever carries its frames.
//!
//! A [`Connector`] starts a connection in the background and hands back a
//! [`TransportLink`]: a pair of channels. Everything the transport observes
//! (open, frames, close) is queued on `inbound`, and the bus consumes that
//! queue on a single task, so callbacks never run concurrently.

use crate::BusOptions;
use eventbridge_core::{Address, AddressParseError, ClientFrame, Failure, Message, ServerFrame};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tokio::sync::mpsc;
use url::Url;

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(ServerFrame),
    Closed(CloseEvent),
}

/// Something the bus asks the transport to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(ClientFrame),
    Close,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code from the peer, if a close handshake happened.
    pub code: Option<u16>,
    pub reason: String,
    /// `false` when the connection failed or was dropped without a handshake.
    pub was_clean: bool,
}

impl CloseEvent {
    /// A clean close without a peer-supplied code.
    pub fn normal() -> Self {
        Self {
            code: None,
            reason: String::new(),
            was_clean: true,
        }
    }

    /// An unclean close: refused, timed out, reset.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.was_clean { "clean" } else { "unclean" })?;
        if let Some(code) = self.code {
            write!(f, ", code {code}")?;
        }
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

/// The bus's end of a transport.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The transport's end of a link.
#[derive(Debug)]
pub struct TransportEnd {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub commands: mpsc::UnboundedReceiver<Outbound>,
}

impl TransportLink {
    /// Create a connected link/end pair.
    pub fn pair() -> (TransportLink, TransportEnd) {
        let (outbound, commands) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        (
            TransportLink { outbound, inbound },
            TransportEnd { events, commands },
        )
    }
}

/// Starts connections. Must not block: the outcome is reported as
/// [`TransportEvent::Opened`] or [`TransportEvent::Closed`] on the link.
pub trait Connector {
    fn connect(&self, url: &Url, options: &BusOptions) -> TransportLink;
}

/// In-memory connector for driving a bus from tests.
///
/// The paired [`MemoryPeer`] plays the part of the remote bridge.
#[derive(Debug)]
pub struct MemoryConnector {
    link: RefCell<Option<TransportLink>>,
    connected_to: Rc<RefCell<Option<Url>>>,
}

impl MemoryConnector {
    pub fn new() -> (MemoryConnector, MemoryPeer) {
        let (link, end) = TransportLink::pair();
        let connected_to = Rc::new(RefCell::new(None));
        (
            MemoryConnector {
                link: RefCell::new(Some(link)),
                connected_to: connected_to.clone(),
            },
            MemoryPeer { end, connected_to },
        )
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &Url, _options: &BusOptions) -> TransportLink {
        *self.connected_to.borrow_mut() = Some(url.clone());
        match self.link.borrow_mut().take() {
            Some(link) => link,
            None => {
                let (link, end) = TransportLink::pair();
                let _ = end.events.send(TransportEvent::Closed(CloseEvent::failed(
                    "memory connector already used",
                )));
                link
            }
        }
    }
}

/// Remote side of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryPeer {
    end: TransportEnd,
    connected_to: Rc<RefCell<Option<Url>>>,
}

impl MemoryPeer {
    /// URL the bus connected to, once `connect` has been called.
    pub fn url(&self) -> Option<Url> {
        self.connected_to.borrow().clone()
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn frame(&self, frame: ServerFrame) {
        self.emit(TransportEvent::Frame(frame));
    }

    /// Deliver a `rec` frame on `address`.
    pub fn rec(&self, address: &str, body: Value) -> Result<(), AddressParseError> {
        let address = Address::new(address)?;
        self.frame(ServerFrame::Rec(Message::new(address, body)));
        Ok(())
    }

    /// Deliver an `err` frame.
    pub fn fail(&self, failure: Failure) {
        self.frame(ServerFrame::Err(failure));
    }

    pub fn close(&self, event: CloseEvent) {
        self.emit(TransportEvent::Closed(event));
    }

    /// Everything the bus has asked the transport to do since the last call.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(command) = self.end.commands.try_recv() {
            out.push(command);
        }
        out
    }

    /// Like [`drain`](Self::drain), keeping only frames.
    pub fn sent_frames(&mut self) -> Vec<ClientFrame> {
        self.drain()
            .into_iter()
            .filter_map(|command| match command {
                Outbound::Frame(frame) => Some(frame),
                Outbound::Close => None,
            })
            .collect()
    }

    fn emit(&self, event: TransportEvent) {
        if self.end.events.send(event).is_err() {
            tracing::debug!("Memory peer emitted after the bus was dropped");
        }
    }
}
