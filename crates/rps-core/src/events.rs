//! Publish/subscribe for session and match events
//!
//! Dispatch iterates over a snapshot taken when `publish` starts. A handler
//! added or removed while a dispatch pass is running takes effect from the
//! next pass on; the current pass neither skips nor repeats anyone.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// An event that can be routed by kind.
pub trait Event {
    type Kind: Copy + Eq;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

type Handler<E> = Rc<dyn Fn(&E)>;

struct Listener<E: Event> {
    id: ListenerId,
    kind: E::Kind,
    handler: Handler<E>,
}

/// Ordered listener registry keyed by event kind.
pub struct EventBus<E: Event> {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<Listener<E>>>,
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            next_id: Cell::new(1),
            listeners: RefCell::new(Vec::new()),
        }
    }
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: E::Kind, handler: impl Fn(&E) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            kind,
            handler: Rc::new(handler),
        });
        id
    }

    /// Returns whether a listener was removed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn publish(&self, event: &E) {
        let kind = event.kind();
        let snapshot: Vec<Handler<E>> = self
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Rc::clone(&l.handler))
            .collect();

        for handler in snapshot {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Ping {
        A(u32),
        B,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum PingKind {
        A,
        B,
    }

    impl Event for Ping {
        type Kind = PingKind;

        fn kind(&self) -> PingKind {
            match self {
                Ping::A(_) => PingKind::A,
                Ping::B => PingKind::B,
            }
        }
    }

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_registration_order() {
        let bus = EventBus::<Ping>::new();
        let log = recorder();
        for name in ["first", "second", "third"] {
            let log = Rc::clone(&log);
            bus.subscribe(PingKind::A, move |_| log.borrow_mut().push(name.to_string()));
        }

        bus.publish(&Ping::A(1));
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_routes_by_kind() {
        let bus = EventBus::<Ping>::new();
        let log = recorder();
        let l = Rc::clone(&log);
        bus.subscribe(PingKind::B, move |_| l.borrow_mut().push("b".into()));

        bus.publish(&Ping::A(7));
        assert!(log.borrow().is_empty());
        bus.publish(&Ping::B);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::<Ping>::new();
        let log = recorder();
        let l = Rc::clone(&log);
        let id = bus.subscribe(PingKind::A, move |e| l.borrow_mut().push(format!("{:?}", e)));

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&Ping::A(1));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_unsubscribe_during_dispatch_keeps_current_pass() {
        let bus = Rc::new(EventBus::<Ping>::new());
        let log = recorder();
        let later_id = Rc::new(Cell::new(None));

        // First handler removes itself and the third handler mid-dispatch.
        let self_id = Rc::new(Cell::new(None));
        {
            let bus_ref = Rc::clone(&bus);
            let log = Rc::clone(&log);
            let later_id = Rc::clone(&later_id);
            let own_id = Rc::clone(&self_id);
            let id = bus.subscribe(PingKind::A, move |_| {
                log.borrow_mut().push("first".into());
                if let Some(id) = own_id.get() {
                    bus_ref.unsubscribe(id);
                }
                if let Some(id) = later_id.get() {
                    bus_ref.unsubscribe(id);
                }
            });
            self_id.set(Some(id));
        }
        {
            let log = Rc::clone(&log);
            bus.subscribe(PingKind::A, move |_| log.borrow_mut().push("second".into()));
        }
        {
            let log = Rc::clone(&log);
            let id = bus.subscribe(PingKind::A, move |_| log.borrow_mut().push("third".into()));
            later_id.set(Some(id));
        }

        bus.publish(&Ping::A(1));
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);

        bus.publish(&Ping::A(2));
        assert_eq!(*log.borrow(), vec!["first", "second", "third", "second"]);
    }

    #[test]
    fn test_subscribe_during_dispatch_waits_for_next_pass() {
        let bus = Rc::new(EventBus::<Ping>::new());
        let count = Rc::new(Cell::new(0));
        {
            let bus_ref = Rc::clone(&bus);
            let count = Rc::clone(&count);
            bus.subscribe(PingKind::B, move |_| {
                let count = Rc::clone(&count);
                bus_ref.subscribe(PingKind::B, move |_| count.set(count.get() + 1));
            });
        }

        bus.publish(&Ping::B);
        assert_eq!(count.get(), 0);
        bus.publish(&Ping::B);
        assert_eq!(count.get(), 1);
    }
}
