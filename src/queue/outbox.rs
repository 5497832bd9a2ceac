use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use tracing::warn;

use crate::protocol::{Message, MessageKind, Transferable};

/// The outgoing queue shared by a message queue and every proxy it owns.
///
/// Insertion order is causal call order; nothing here reorders or dedups.
#[derive(Clone, Default)]
pub struct Outbox {
    pending: Rc<RefCell<Vec<Message>>>,
}

impl Outbox {
    pub fn push(&self, message: Message) {
        self.pending.borrow_mut().push(message);
    }

    /// Encodes `payload` and appends it. Encoding failures are logged and the
    /// message is dropped.
    pub fn post<P: Serialize>(&self, kind: MessageKind, payload: &P) {
        self.post_with(kind, payload, Vec::new());
    }

    pub fn post_with<P: Serialize>(
        &self,
        kind: MessageKind,
        payload: &P,
        transferables: Vec<Transferable>,
    ) {
        match Message::new(kind, payload) {
            Ok(message) => self.push(message.with_transferables(transferables)),
            Err(err) => {
                warn!(target: "queue", error = %err, "dropping message that failed to encode");
            }
        }
    }

    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Kinds currently waiting to be flushed, oldest first.
    pub fn pending_kinds(&self) -> Vec<MessageKind> {
        self.pending.borrow().iter().map(|message| message.kind).collect()
    }
}
