//! In-process publish/subscribe.
//!
//! The dispatcher decouples producers (bridge handlers) from consumers (UI
//! code). Events are routed by their [`Event::Kind`] tag, listeners run
//! synchronously in registration order, and everything stays on the thread
//! that owns the dispatcher.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

/// An application event routable by a fixed tag.
pub trait Event {
    /// Routing key. Usually a field-less enum mirroring the event enum.
    type Kind: Copy + Eq + Hash + fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

/// Error returned by a listener. Logged and counted, never propagated.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener<E> = Rc<dyn Fn(&E) -> Result<(), ListenerError>>;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Listeners that returned `Ok`.
    pub delivered: usize,
    /// Listeners that returned `Err`.
    pub failed: usize,
}

/// Registry of listeners keyed by event kind.
pub struct Dispatcher<E: Event> {
    listeners: RefCell<HashMap<E::Kind, Vec<(ListenerId, Listener<E>)>>>,
    next_id: Cell<u64>,
}

impl<E: Event> Dispatcher<E> {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        }
    }

    /// Register a listener for `kind`. Listeners for the same kind are
    /// invoked in the order they were subscribed.
    pub fn subscribe<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) -> Result<(), ListenerError> + 'static,
    {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut found = false;
        // Kinds left without listeners are dropped from the map.
        self.listeners.borrow_mut().retain(|_, entries| {
            if !found {
                if let Some(pos) = entries.iter().position(|(lid, _)| *lid == id) {
                    entries.remove(pos);
                    found = true;
                }
            }
            !entries.is_empty()
        });
        found
    }

    /// Invoke every listener registered for the event's kind.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe,
    /// unsubscribe or publish re-entrantly; such changes apply from the next
    /// publish. A failing listener does not stop the fan-out.
    pub fn publish(&self, event: &E) -> Delivery {
        let kind = event.kind();
        let snapshot: Vec<(ListenerId, Listener<E>)> = self
            .listeners
            .borrow()
            .get(&kind)
            .map(|entries| entries.iter().map(|(id, l)| (*id, Rc::clone(l))).collect())
            .unwrap_or_default();

        let mut delivery = Delivery::default();
        for (id, listener) in snapshot {
            match listener(event) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    tracing::warn!("Listener {} for {:?} failed: {}", id.0, kind, e);
                    delivery.failed += 1;
                }
            }
        }
        delivery
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.borrow().get(&kind).map_or(0, Vec::len)
    }
}

impl<E: Event> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.borrow();
        let mut map = f.debug_map();
        for (kind, entries) in listeners.iter() {
            map.entry(kind, &entries.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Number(i32),
        Text(String),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestKind {
        Number,
        Text,
    }

    impl Event for TestEvent {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            match self {
                TestEvent::Number(_) => TestKind::Number,
                TestEvent::Text(_) => TestKind::Text,
            }
        }
    }

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn publish_without_listeners_is_noop() {
        let dispatcher = Dispatcher::<TestEvent>::new();
        let delivery = dispatcher.publish(&TestEvent::Number(1));
        assert_eq!(delivery, Delivery::default());
    }

    #[test]
    fn listeners_run_once_in_registration_order() {
        let dispatcher = Dispatcher::<TestEvent>::new();
        let log = recorder();
        for name in ["first", "second", "third"] {
            let log = log.clone();
            dispatcher.subscribe(TestKind::Number, move |event| {
                log.borrow_mut().push(format!("{name}:{event:?}"));
                Ok(())
            });
        }

        let delivery = dispatcher.publish(&TestEvent::Number(7));

        assert_eq!(delivery.delivered, 3);
        assert_eq!(
            *log.borrow(),
            vec!["first:Number(7)", "second:Number(7)", "third:Number(7)"]
        );
    }

    #[test]
    fn routes_by_kind() {
        let dispatcher = Dispatcher::<TestEvent>::new();
        let log = recorder();
        let l = log.clone();
        dispatcher.subscribe(TestKind::Text, move |event| {
            if let TestEvent::Text(text) = event {
                l.borrow_mut().push(text.clone());
            }
            Ok(())
        });

        dispatcher.publish(&TestEvent::Number(1));
        dispatcher.publish(&TestEvent::Text("hello".into()));

        assert_eq!(*log.borrow(), vec!["hello"]);
    }

    #[test]
    fn failing_listener_does_not_stop_fanout() {
        let dispatcher = Dispatcher::<TestEvent>::new();
        let log = recorder();
        dispatcher.subscribe(TestKind::Number, |_| Err("boom".into()));
        let l = log.clone();
        dispatcher.subscribe(TestKind::Number, move |_| {
            l.borrow_mut().push("after".into());
            Ok(())
        });

        let delivery = dispatcher.publish(&TestEvent::Number(3));

        assert_eq!(delivery, Delivery { delivered: 1, failed: 1 });
        assert_eq!(*log.borrow(), vec!["after"]);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let dispatcher = Dispatcher::<TestEvent>::new();
        let id = dispatcher.subscribe(TestKind::Number, |_| Ok(()));
        assert_eq!(dispatcher.listener_count(TestKind::Number), 1);

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert_eq!(dispatcher.listener_count(TestKind::Number), 0);
        assert_eq!(dispatcher.publish(&TestEvent::Number(1)).delivered, 0);
    }

    #[test]
    fn last_unsubscribe_forgets_the_kind() {
        let dispatcher = Dispatcher::<TestEvent>::new();
        let first = dispatcher.subscribe(TestKind::Text, |_| Ok(()));
        let second = dispatcher.subscribe(TestKind::Text, |_| Ok(()));

        assert!(dispatcher.unsubscribe(first));
        assert_eq!(format!("{dispatcher:?}"), "{Text: 1}");
        assert!(dispatcher.unsubscribe(second));
        assert_eq!(format!("{dispatcher:?}"), "{}");
    }

    #[test]
    fn subscribe_during_publish_applies_next_time() {
        let dispatcher = Rc::new(Dispatcher::<TestEvent>::new());
        let log = recorder();
        let d = Rc::downgrade(&dispatcher);
        let l = log.clone();
        dispatcher.subscribe(TestKind::Number, move |_| {
            if let Some(d) = d.upgrade() {
                let l = l.clone();
                d.subscribe(TestKind::Number, move |_| {
                    l.borrow_mut().push("late".into());
                    Ok(())
                });
            }
            Ok(())
        });

        assert_eq!(dispatcher.publish(&TestEvent::Number(1)).delivered, 1);
        assert!(log.borrow().is_empty());

        dispatcher.publish(&TestEvent::Number(2));
        assert_eq!(*log.borrow(), vec!["late"]);
    }
}
