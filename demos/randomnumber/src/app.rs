//! Wiring between the bridge, the dispatcher and the surface.

use crate::view::Surface;
use eventbridge_client::{Address, EventBus, Failure, Message};
use eventbridge_core::{Dispatcher, Event};
use std::cell::RefCell;
use std::rc::Rc;

/// Text rendered once the connection is gone.
pub const CLOSED_TEXT: &str = "Closed";

/// Local events raised by the bridge handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    NewRandomNumber(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppEventKind {
    NewRandomNumber,
}

impl Event for AppEvent {
    type Kind = AppEventKind;

    fn kind(&self) -> AppEventKind {
        match self {
            AppEvent::NewRandomNumber(_) => AppEventKind::NewRandomNumber,
        }
    }
}

/// Render numbers and the closed marker on `surface`, and subscribe to
/// `address` as soon as the bus opens.
pub fn install(
    bus: &mut EventBus,
    dispatcher: &Rc<Dispatcher<AppEvent>>,
    surface: Rc<RefCell<dyn Surface>>,
    address: Address,
) {
    let render = Rc::clone(&surface);
    dispatcher.subscribe(AppEventKind::NewRandomNumber, move |event| {
        let AppEvent::NewRandomNumber(number) = event;
        render.borrow_mut().insert_text(0, &number.to_string())?;
        Ok(())
    });

    bus.on_closed(move |event| {
        tracing::info!("Bridge closed: {}", event);
        if let Err(e) = surface.borrow_mut().insert_text(0, CLOSED_TEXT) {
            tracing::warn!("Failed to render close: {}", e);
        }
    });

    let dispatcher = Rc::clone(dispatcher);
    bus.on_opened(move |bus| {
        let source = address.clone();
        let handler = move |result: Result<Message, Failure>| match result {
            Ok(message) => match number_from(&message) {
                Some(number) => {
                    dispatcher.publish(&AppEvent::NewRandomNumber(number));
                }
                None => tracing::warn!(
                    "Ignoring non-numeric body on {}: {}",
                    message.address,
                    message.body
                ),
            },
            Err(failure) => tracing::warn!("Bridge failure on {}: {}", source, failure),
        };
        match bus.register_handler(&address, handler) {
            Ok(_) => tracing::info!("Subscribed to {}", address),
            Err(e) => tracing::warn!("Could not subscribe to {}: {}", address, e),
        }
    });
}

/// Numeric body truncated toward zero, saturating at the `i32` bounds.
fn number_from(message: &Message) -> Option<i32> {
    message.body.as_f64().map(|value| value.trunc() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::RecordingSurface;
    use eventbridge_client::{BusOptions, CloseEvent, MemoryConnector, MemoryPeer, TransportEvent};
    use eventbridge_core::{ClientFrame, ServerFrame};
    use serde_json::json;

    struct Harness {
        bus: EventBus,
        peer: MemoryPeer,
        surface: Rc<RefCell<RecordingSurface>>,
        events: Rc<RefCell<Vec<AppEvent>>>,
    }

    fn harness() -> Harness {
        let (connector, peer) = MemoryConnector::new();
        let mut bus = EventBus::open("ws://test/bus", BusOptions::default(), &connector).unwrap();
        let dispatcher = Rc::new(Dispatcher::<AppEvent>::new());
        let surface = Rc::new(RefCell::new(RecordingSurface::default()));

        let events = Rc::new(RefCell::new(Vec::new()));
        let e = events.clone();
        dispatcher.subscribe(AppEventKind::NewRandomNumber, move |event| {
            e.borrow_mut().push(*event);
            Ok(())
        });

        install(
            &mut bus,
            &dispatcher,
            surface.clone(),
            "randomnumber".parse().unwrap(),
        );
        Harness {
            bus,
            peer,
            surface,
            events,
        }
    }

    #[test]
    fn renders_a_received_number() {
        let mut h = harness();
        h.peer.open();
        h.peer.rec("randomnumber", json!(42)).unwrap();
        h.bus.pump();

        assert_eq!(*h.events.borrow(), vec![AppEvent::NewRandomNumber(42)]);
        assert_eq!(h.surface.borrow().lines, vec!["42"]);
    }

    #[test]
    fn subscribes_on_open() {
        let mut h = harness();
        assert!(h.peer.sent_frames().is_empty());

        h.peer.open();
        h.bus.pump();

        let frames = h.peer.sent_frames();
        assert!(matches!(
            frames.as_slice(),
            [ClientFrame::Register { address, .. }] if address.as_str() == "randomnumber"
        ));
    }

    #[test]
    fn every_message_renders_once_in_order() {
        let mut h = harness();
        h.peer.open();
        for n in [5, 7, 11, 13] {
            h.peer.rec("randomnumber", json!(n)).unwrap();
        }
        h.bus.pump();

        assert_eq!(
            *h.events.borrow(),
            vec![
                AppEvent::NewRandomNumber(5),
                AppEvent::NewRandomNumber(7),
                AppEvent::NewRandomNumber(11),
                AppEvent::NewRandomNumber(13),
            ]
        );
        // Newest on top.
        assert_eq!(h.surface.borrow().lines, vec!["13", "11", "7", "5"]);
    }

    #[test]
    fn closed_before_open_renders_marker_once() {
        let mut h = harness();
        h.peer.close(CloseEvent::failed("connection refused"));
        h.peer.open();
        h.bus.pump();

        assert_eq!(h.surface.borrow().lines, vec![CLOSED_TEXT]);
        assert!(h.peer.sent_frames().is_empty());
        assert!(h.events.borrow().is_empty());
    }

    #[test]
    fn messages_after_close_are_not_rendered() {
        let mut h = harness();
        h.peer.open();
        h.peer.rec("randomnumber", json!(1)).unwrap();
        h.peer.close(CloseEvent::normal());
        h.bus.pump();
        h.bus.dispatch(TransportEvent::Frame(ServerFrame::Rec(Message::new(
            "randomnumber".parse().unwrap(),
            json!(2),
        ))));

        assert_eq!(h.surface.borrow().lines, vec![CLOSED_TEXT, "1"]);
        assert_eq!(*h.events.borrow(), vec![AppEvent::NewRandomNumber(1)]);
    }

    #[test]
    fn failures_and_non_numbers_are_skipped() {
        let mut h = harness();
        h.peer.open();
        h.peer.rec("randomnumber", json!("seven")).unwrap();
        h.peer.fail(Failure {
            address: Some("randomnumber".parse().unwrap()),
            body: Some(json!("access_denied")),
            ..Failure::default()
        });
        h.peer.rec("randomnumber", json!(3.9)).unwrap();
        h.bus.pump();

        assert_eq!(*h.events.borrow(), vec![AppEvent::NewRandomNumber(3)]);
        assert_eq!(h.surface.borrow().lines, vec!["3"]);
    }

    #[test]
    fn numbers_saturate() {
        let message = Message::new("randomnumber".parse().unwrap(), json!(1e12));
        assert_eq!(number_from(&message), Some(i32::MAX));
        let message = Message::new("randomnumber".parse().unwrap(), json!(-2.5));
        assert_eq!(number_from(&message), Some(-2));
    }
}
