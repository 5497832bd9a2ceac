//! Batching and dispatch for one side of a session.
//!
//! Proxies append to the shared [`Outbox`]; [`MessageQueue::flush`] turns the
//! pending messages into one [`Batch`] and hands it to the channel.
//! [`MessageQueue::dispatch`] routes every inbound message either through the
//! global kind table or, when the payload names a `return_id`, through the
//! handler table of that proxy in the [`RemoteRegistry`].

mod handlers;
mod outbox;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, trace, warn};

pub use handlers::{Handler, HandlerTable};
pub use outbox::Outbox;

use crate::channel::{BatchReceiver, BatchSender, ChannelEndpoint, ChannelError};
use crate::events::{Event, EventDispatcher, EventTarget, Listener, Subscriptions};
use crate::protocol::{
    Batch, EventPayload, EventSubscription, Inbound, Message, MessageKind, ObjectMatrix, ProxyId,
    Transferable, Transform,
};
use crate::registry::RemoteRegistry;

/// A scene object whose world transform is pushed to the peer on every flush.
pub(crate) trait LiveObject {
    fn proxy_id(&self) -> ProxyId;
    fn world_transform(&self) -> Transform;
}

struct QueueInner {
    outbox: Outbox,
    sender: BatchSender,
    receiver: RefCell<Option<BatchReceiver>>,
    degraded: Cell<bool>,
    handlers: HandlerTable,
    registry: RemoteRegistry,
    dispatcher: EventDispatcher,
    subscriptions: RefCell<Subscriptions>,
    live_objects: RefCell<Vec<(ProxyId, Weak<dyn LiveObject>)>>,
}

/// Cloneable handle to one side's queue. Not `Send`: a queue lives on the
/// thread of the context that owns it.
#[derive(Clone)]
pub struct MessageQueue {
    inner: Rc<QueueInner>,
}

#[derive(Clone)]
pub struct WeakQueue {
    inner: Weak<QueueInner>,
}

impl WeakQueue {
    pub fn upgrade(&self) -> Option<MessageQueue> {
        self.inner.upgrade().map(|inner| MessageQueue { inner })
    }
}

impl MessageQueue {
    pub fn new(endpoint: ChannelEndpoint) -> Self {
        let (sender, receiver) = endpoint.split();
        let outbox = Outbox::default();
        let queue = Self {
            inner: Rc::new(QueueInner {
                dispatcher: EventDispatcher::new(EventTarget::Session, outbox.clone()),
                outbox,
                sender,
                receiver: RefCell::new(Some(receiver)),
                degraded: Cell::new(false),
                handlers: HandlerTable::new(),
                registry: RemoteRegistry::default(),
                subscriptions: RefCell::new(Subscriptions::default()),
                live_objects: RefCell::new(Vec::new()),
            }),
        };
        queue.install_event_handlers();
        queue
    }

    fn install_event_handlers(&self) {
        self.handlers().set(MessageKind::Event, |queue, inbound| {
            match inbound.parse::<EventPayload>() {
                Ok(payload) => {
                    queue.dispatch_event(Event::from(payload));
                }
                Err(err) => warn!(target: "queue", error = %err, "discarding event"),
            }
        });
        self.handlers().set(MessageKind::AddEvent, |queue, inbound| {
            match inbound.parse::<EventSubscription>() {
                Ok(sub) => queue.inner.subscriptions.borrow_mut().add(&sub.event_type),
                Err(err) => warn!(target: "queue", error = %err, "discarding subscription"),
            }
        });
        self.handlers().set(MessageKind::RemoveEvent, |queue, inbound| {
            match inbound.parse::<EventSubscription>() {
                Ok(sub) => {
                    queue.inner.subscriptions.borrow_mut().remove(&sub.event_type);
                }
                Err(err) => warn!(target: "queue", error = %err, "discarding unsubscription"),
            }
        });
    }

    pub fn downgrade(&self) -> WeakQueue {
        WeakQueue {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.inner.outbox
    }

    /// The global kind-keyed handler table.
    pub fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    pub fn registry(&self) -> &RemoteRegistry {
        &self.inner.registry
    }

    pub fn enqueue(&self, message: Message) {
        self.inner.outbox.push(message);
    }

    pub fn pending(&self) -> usize {
        self.inner.outbox.len()
    }

    /// True once a flush failed because the peer is gone.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.get()
    }

    /// Sends everything queued so far as one batch.
    ///
    /// World transforms of live scene objects are appended first. The queue is
    /// emptied whether or not the send succeeds; returns the number of messages
    /// handed to the channel.
    pub fn flush(&self) -> usize {
        self.enqueue_world_transforms();
        let queued = self.inner.outbox.take();
        if queued.is_empty() {
            return 0;
        }

        let batch = Batch::from_messages(queued);
        let count = batch.len();
        match self.inner.sender.send(batch) {
            Ok(()) => {
                trace!(target: "queue", messages = count, "flushed batch");
                count
            }
            Err(err) => {
                if self.inner.degraded.replace(true) {
                    debug!(target: "queue", error = %err, messages = count, "discarded batch");
                } else {
                    warn!(
                        target: "queue",
                        error = %err,
                        messages = count,
                        "flush failed; discarding batch and continuing without a peer"
                    );
                }
                0
            }
        }
    }

    fn enqueue_world_transforms(&self) {
        let live: Vec<Rc<dyn LiveObject>> = {
            let mut objects = self.inner.live_objects.borrow_mut();
            objects.retain(|(_, object)| object.strong_count() > 0);
            objects.iter().filter_map(|(_, object)| object.upgrade()).collect()
        };
        for object in live {
            self.inner.outbox.post(
                MessageKind::ObjectMatrix,
                &ObjectMatrix {
                    proxy_id: object.proxy_id(),
                    matrix_world: object.world_transform(),
                },
            );
        }
    }

    /// Routes each message of `batch`, in order. Returns how many were handled.
    pub fn dispatch(&self, batch: Batch) -> usize {
        let mut handled = 0;
        for inbound in batch.into_inbound() {
            if self.dispatch_one(inbound) {
                handled += 1;
            }
        }
        handled
    }

    pub fn dispatch_one(&self, inbound: Inbound) -> bool {
        let kind = inbound.kind;
        let handler = match inbound.return_id.as_deref() {
            None => self.inner.handlers.get(kind),
            Some(raw) => {
                let Some(id) = ProxyId::parse(raw) else {
                    trace!(target: "queue", ?kind, return_id = raw, "dropping message with malformed target");
                    return false;
                };
                match self.inner.registry.resolve(id) {
                    Some(table) => table.get(kind),
                    None => {
                        trace!(target: "queue", ?kind, %id, "dropping message for unknown proxy");
                        return false;
                    }
                }
            }
        };

        match handler {
            Some(handler) => {
                handler(self, inbound);
                true
            }
            None => {
                trace!(target: "queue", ?kind, "no handler for message");
                false
            }
        }
    }

    /// Drains every batch the peer has delivered so far and dispatches it.
    ///
    /// Returns the number of batches processed. After the receiver has been
    /// taken by a driver this always returns zero.
    pub fn pump(&self) -> usize {
        let mut batches = Vec::new();
        {
            let mut receiver = self.inner.receiver.borrow_mut();
            let Some(receiver) = receiver.as_mut() else {
                debug!(target: "queue", "pump called after the receiver was taken");
                return 0;
            };
            loop {
                match receiver.try_recv() {
                    Ok(Some(batch)) => batches.push(batch),
                    Ok(None) => break,
                    Err(ChannelError::Closed) => {
                        trace!(target: "queue", "peer closed while pumping");
                        break;
                    }
                }
            }
        }

        let count = batches.len();
        for batch in batches {
            self.dispatch(batch);
        }
        count
    }

    /// Moves the receiving half out so an async driver can await it.
    pub fn take_receiver(&self) -> Option<BatchReceiver> {
        self.inner.receiver.borrow_mut().take()
    }

    pub(crate) fn track_live(&self, id: ProxyId, object: Weak<dyn LiveObject>) {
        self.inner.live_objects.borrow_mut().push((id, object));
    }

    pub(crate) fn untrack_live(&self, id: ProxyId) -> bool {
        let mut objects = self.inner.live_objects.borrow_mut();
        let before = objects.len();
        objects.retain(|(existing, _)| *existing != id);
        objects.len() != before
    }

    /// Ids of scene objects whose transforms go out on the next flush.
    pub fn live_objects(&self) -> Vec<ProxyId> {
        self.inner
            .live_objects
            .borrow()
            .iter()
            .filter(|(_, object)| object.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn add_event_listener(&self, event_type: &str, listener: &Listener) {
        self.inner.dispatcher.add_event_listener(event_type, listener);
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.inner
            .dispatcher
            .remove_event_listener(event_type, listener);
    }

    pub fn has_event_listener(&self, event_type: &str, listener: &Listener) -> bool {
        self.inner.dispatcher.has_event_listener(event_type, listener)
    }

    /// Delivers `event` to this side's own listeners.
    pub fn dispatch_event(&self, event: Event) -> usize {
        self.inner.dispatcher.dispatch_event(event)
    }

    /// Whether the peer currently listens for `event_type` on this side.
    pub fn peer_subscribed(&self, event_type: &str) -> bool {
        self.inner.subscriptions.borrow().is_active(event_type)
    }

    /// Sends `event` only if the peer has a listener for its type.
    pub fn forward_event(&self, event: &Event) -> bool {
        if !self.peer_subscribed(&event.event_type) {
            return false;
        }
        self.inner
            .outbox
            .post(MessageKind::Event, &event.to_payload(None));
        true
    }

    /// Sends an event unconditionally, optionally moving buffers along with it.
    pub fn send_event(
        &self,
        event_type: &str,
        detail: JsonMap<String, JsonValue>,
        transferables: Vec<Transferable>,
    ) {
        let payload = EventPayload {
            event_type: event_type.to_string(),
            return_id: None,
            detail,
        };
        self.inner
            .outbox
            .post_with(MessageKind::Event, &payload, transferables);
    }
}
