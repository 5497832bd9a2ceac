use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::protocol::ProxyId;
use crate::queue::HandlerTable;

/// Maps proxy ids to the handler table of the live proxy that owns them.
///
/// Entries hold weak references: the proxy owns its handlers, the registry
/// only routes to them.
#[derive(Default)]
pub struct RemoteRegistry {
    entries: RefCell<HashMap<ProxyId, Weak<HandlerTable>>>,
}

impl RemoteRegistry {
    /// Returns false and keeps the existing entry if `id` is already taken.
    pub fn register(&self, id: ProxyId, handlers: &Rc<HandlerTable>) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries.get(&id).is_some_and(|entry| entry.strong_count() > 0) {
            warn!(target: "queue", %id, "proxy id registered twice; keeping the first entry");
            return false;
        }
        entries.insert(id, Rc::downgrade(handlers));
        true
    }

    pub fn unregister(&self, id: ProxyId) -> bool {
        self.entries.borrow_mut().remove(&id).is_some()
    }

    pub fn resolve(&self, id: ProxyId) -> Option<Rc<HandlerTable>> {
        let handlers = self.entries.borrow().get(&id).and_then(Weak::upgrade);
        if handlers.is_none() {
            // Drop entries whose proxy went away without unregistering.
            self.entries.borrow_mut().remove(&id);
        }
        handlers
    }

    pub fn contains(&self, id: ProxyId) -> bool {
        self.entries
            .borrow()
            .get(&id)
            .is_some_and(|entry| entry.strong_count() > 0)
    }

    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
