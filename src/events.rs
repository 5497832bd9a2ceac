use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::protocol::{ElementSubscription, EventPayload, EventSubscription, MessageKind, ProxyId};
use crate::queue::Outbox;

/// Who an event was dispatched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// The session-wide queue ("window"/"document").
    Session,
    Element(ProxyId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: String,
    pub detail: JsonMap<String, JsonValue>,
    pub target: Option<EventTarget>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            detail: JsonMap::new(),
            target: None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.detail.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.detail.get(key).and_then(JsonValue::as_f64)
    }

    pub(crate) fn to_payload(&self, return_id: Option<ProxyId>) -> EventPayload {
        EventPayload {
            event_type: self.event_type.clone(),
            return_id: return_id.map(|id| id.to_string()),
            detail: self.detail.clone(),
        }
    }
}

impl From<EventPayload> for Event {
    fn from(payload: EventPayload) -> Self {
        Self {
            event_type: payload.event_type,
            detail: payload.detail,
            target: None,
        }
    }
}

/// A registered callback. Identity is the allocation, so the same `Listener`
/// value (or a clone of it) is needed to unregister.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&Event)>);

impl Listener {
    pub fn new(callback: impl Fn(&Event) + 'static) -> Self {
        Self(Rc::new(callback))
    }

    /// Builds a listener whose callback holds a weak handle to itself, so a
    /// one-shot listener can unregister itself without a reference cycle.
    pub fn new_cyclic<C>(build: impl FnOnce(WeakListener) -> C) -> Self
    where
        C: Fn(&Event) + 'static,
    {
        let callback: Rc<C> = Rc::new_cyclic(|weak: &Weak<C>| {
            let weak: Weak<dyn Fn(&Event)> = weak.clone();
            build(WeakListener(weak))
        });
        Self(callback)
    }

    pub fn same(&self, other: &Listener) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.0) as *const (),
            Rc::as_ptr(&other.0) as *const (),
        )
    }

    fn call(&self, event: &Event) {
        (self.0)(event)
    }
}

/// Non-owning handle to a [`Listener`].
#[derive(Clone)]
pub struct WeakListener(Weak<dyn Fn(&Event)>);

impl WeakListener {
    pub fn upgrade(&self) -> Option<Listener> {
        self.0.upgrade().map(Listener)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// Listener registry that mirrors every (un)registration to the peer.
pub struct EventDispatcher {
    owner: EventTarget,
    outbox: Outbox,
    listeners: RefCell<HashMap<String, Vec<Listener>>>,
}

impl EventDispatcher {
    pub fn new(owner: EventTarget, outbox: Outbox) -> Self {
        Self {
            owner,
            outbox,
            listeners: RefCell::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> EventTarget {
        self.owner
    }

    pub fn add_event_listener(&self, event_type: &str, listener: &Listener) {
        self.mirror(event_type, true);
        let mut listeners = self.listeners.borrow_mut();
        let entries = listeners.entry(event_type.to_string()).or_default();
        if !entries.iter().any(|existing| existing.same(listener)) {
            entries.push(listener.clone());
        }
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.mirror(event_type, false);
        let mut listeners = self.listeners.borrow_mut();
        if let Some(entries) = listeners.get_mut(event_type) {
            entries.retain(|existing| !existing.same(listener));
            if entries.is_empty() {
                listeners.remove(event_type);
            }
        }
    }

    pub fn has_event_listener(&self, event_type: &str, listener: &Listener) -> bool {
        self.listeners
            .borrow()
            .get(event_type)
            .is_some_and(|entries| entries.iter().any(|existing| existing.same(listener)))
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .borrow()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Invokes the listeners registered for the event's type at the moment
    /// dispatch starts. Returns how many were called.
    pub fn dispatch_event(&self, mut event: Event) -> usize {
        let snapshot = match self.listeners.borrow().get(&event.event_type) {
            Some(entries) => entries.clone(),
            None => return 0,
        };
        event.target = Some(self.owner);
        for listener in &snapshot {
            listener.call(&event);
        }
        snapshot.len()
    }

    fn mirror(&self, event_type: &str, add: bool) {
        let event_type = event_type.to_string();
        match (self.owner, add) {
            (EventTarget::Session, true) => self
                .outbox
                .post(MessageKind::AddEvent, &EventSubscription { event_type }),
            (EventTarget::Session, false) => self
                .outbox
                .post(MessageKind::RemoveEvent, &EventSubscription { event_type }),
            (EventTarget::Element(id), true) => self.outbox.post(
                MessageKind::ElementAddEvent,
                &ElementSubscription { id, event_type },
            ),
            (EventTarget::Element(id), false) => self.outbox.post(
                MessageKind::ElementRemoveEvent,
                &ElementSubscription { id, event_type },
            ),
        }
    }
}

/// Event types the peer asked us to forward, counted per registration.
#[derive(Debug, Default, Clone)]
pub struct Subscriptions {
    counts: HashMap<String, usize>,
}

impl Subscriptions {
    pub fn add(&mut self, event_type: &str) {
        *self.counts.entry(event_type.to_string()).or_insert(0) += 1;
    }

    /// Returns false when there was no subscription to remove.
    pub fn remove(&mut self, event_type: &str) -> bool {
        let Some(count) = self.counts.get_mut(event_type) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(event_type);
        }
        true
    }

    pub fn is_active(&self, event_type: &str) -> bool {
        self.counts.contains_key(event_type)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn active_types(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn dispatcher() -> (EventDispatcher, Outbox) {
        let outbox = Outbox::default();
        (EventDispatcher::new(EventTarget::Session, outbox.clone()), outbox)
    }

    #[test]
    fn add_is_idempotent_but_always_mirrored() {
        let (dispatcher, outbox) = dispatcher();
        let listener = Listener::new(|_| {});
        dispatcher.add_event_listener("keydown", &listener);
        dispatcher.add_event_listener("keydown", &listener);

        assert_eq!(dispatcher.listener_count("keydown"), 1);
        let kinds: Vec<MessageKind> = outbox.take().into_iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MessageKind::AddEvent, MessageKind::AddEvent]);
    }

    #[test]
    fn remove_uses_listener_identity() {
        let (dispatcher, _outbox) = dispatcher();
        let first = Listener::new(|_| {});
        let second = Listener::new(|_| {});
        dispatcher.add_event_listener("click", &first);
        dispatcher.add_event_listener("click", &second);
        dispatcher.remove_event_listener("click", &first);

        assert!(!dispatcher.has_event_listener("click", &first));
        assert!(dispatcher.has_event_listener("click", &second));
        assert!(dispatcher.has_event_listener("click", &second.clone()));
    }

    #[test]
    fn dispatch_uses_snapshot_of_listeners() {
        let outbox = Outbox::default();
        let dispatcher = Rc::new(EventDispatcher::new(EventTarget::Session, outbox));
        let late_calls = Rc::new(Cell::new(0));

        let late = {
            let late_calls = Rc::clone(&late_calls);
            Listener::new(move |_| late_calls.set(late_calls.get() + 1))
        };
        let adder = {
            let dispatcher = Rc::downgrade(&dispatcher);
            let late = late.clone();
            Listener::new(move |_| {
                if let Some(dispatcher) = dispatcher.upgrade() {
                    dispatcher.add_event_listener("tick", &late);
                }
            })
        };
        dispatcher.add_event_listener("tick", &adder);

        assert_eq!(dispatcher.dispatch_event(Event::new("tick")), 1);
        assert_eq!(late_calls.get(), 0);
        assert_eq!(dispatcher.dispatch_event(Event::new("tick")), 2);
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn dispatch_sets_target_to_owner() {
        let id = ProxyId::generate();
        let dispatcher = EventDispatcher::new(EventTarget::Element(id), Outbox::default());
        let seen = Rc::new(Cell::new(None));
        let listener = {
            let seen = Rc::clone(&seen);
            Listener::new(move |event: &Event| seen.set(event.target))
        };
        dispatcher.add_event_listener("ended", &listener);
        dispatcher.dispatch_event(Event::new("ended"));
        assert_eq!(seen.get(), Some(EventTarget::Element(id)));
    }

    #[test]
    fn element_dispatcher_mirrors_with_id() {
        let id = ProxyId::generate();
        let outbox = Outbox::default();
        let dispatcher = EventDispatcher::new(EventTarget::Element(id), outbox.clone());
        let listener = Listener::new(|_| {});
        dispatcher.add_event_listener("ended", &listener);
        dispatcher.remove_event_listener("ended", &listener);

        let messages = outbox.take();
        assert_eq!(messages[0].kind, MessageKind::ElementAddEvent);
        assert_eq!(messages[1].kind, MessageKind::ElementRemoveEvent);
        assert_eq!(messages[1].payload["id"], id.to_string());
        assert_eq!(messages[1].payload["type"], "ended");
    }

    #[test]
    fn subscriptions_count_registrations() {
        let mut subscriptions = Subscriptions::default();
        subscriptions.add("resize");
        subscriptions.add("resize");
        assert!(subscriptions.remove("resize"));
        assert!(subscriptions.is_active("resize"));
        assert!(subscriptions.remove("resize"));
        assert!(!subscriptions.is_active("resize"));
        assert!(!subscriptions.remove("resize"));
        assert!(subscriptions.is_empty());
    }
}
