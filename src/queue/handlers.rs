use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::protocol::{Inbound, MessageKind};

use super::MessageQueue;

pub type Handler = Rc<dyn Fn(&MessageQueue, Inbound)>;

/// Kind-keyed handlers. Each queue has a global table and every registered
/// proxy carries its own.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RefCell<HashMap<MessageKind, Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `kind`, replacing any previous one.
    pub fn set(&self, kind: MessageKind, handler: impl Fn(&MessageQueue, Inbound) + 'static) {
        self.handlers.borrow_mut().insert(kind, Rc::new(handler));
    }

    pub fn remove(&self, kind: MessageKind) -> bool {
        self.handlers.borrow_mut().remove(&kind).is_some()
    }

    /// Returns a clone of the handler so it can run without holding the table.
    pub fn get(&self, kind: MessageKind) -> Option<Handler> {
        self.handlers.borrow().get(&kind).cloned()
    }

    pub fn contains(&self, kind: MessageKind) -> bool {
        self.handlers.borrow().contains_key(&kind)
    }
}
