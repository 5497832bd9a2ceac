use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::protocol::{
    MessageKind, ObjectCall, ObjectCreate, ObjectDestroy, ObjectParamSet, ProxyId, Transform,
};
use crate::queue::{HandlerTable, LiveObject, MessageQueue};

/// Stand-in for a scene node rendered by the controlling context.
///
/// Clones share one proxy. The node is removed remotely on [`remove`] or when
/// the last handle is dropped, whichever happens first.
///
/// [`remove`]: SceneObjectProxy::remove
#[derive(Clone)]
pub struct SceneObjectProxy {
    inner: Rc<SceneObjectInner>,
}

struct SceneObjectInner {
    id: ProxyId,
    object_type: String,
    queue: MessageQueue,
    handlers: Rc<HandlerTable>,
    transform: Cell<Transform>,
    live: Cell<bool>,
}

impl SceneObjectProxy {
    pub fn new(queue: &MessageQueue, object_type: impl Into<String>) -> Self {
        let id = ProxyId::generate();
        let object_type = object_type.into();
        let inner = Rc::new(SceneObjectInner {
            id,
            object_type: object_type.clone(),
            queue: queue.clone(),
            handlers: Rc::new(HandlerTable::new()),
            transform: Cell::new(Transform::IDENTITY),
            live: Cell::new(true),
        });

        queue.registry().register(id, &inner.handlers);
        let live: Weak<dyn LiveObject> = Rc::downgrade(&inner) as Weak<dyn LiveObject>;
        queue.track_live(id, live);
        queue.outbox().post(
            MessageKind::ObjectCreate,
            &ObjectCreate {
                proxy_id: id,
                object_type,
            },
        );
        debug!(target: "proxy", %id, object_type = %inner.object_type, "created scene object");

        Self { inner }
    }

    pub fn id(&self) -> ProxyId {
        self.inner.id
    }

    pub fn object_type(&self) -> &str {
        &self.inner.object_type
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.inner.queue
    }

    /// Handlers for messages the controlling side addresses to this node.
    pub fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.get()
    }

    pub fn set_param(&self, param: &str, arg: impl Into<JsonValue>) {
        if !self.ensure_live("set_param") {
            return;
        }
        self.inner.queue.outbox().post(
            MessageKind::ObjectParamSet,
            &ObjectParamSet {
                proxy_id: self.inner.id,
                param: param.to_string(),
                arg: arg.into(),
            },
        );
    }

    pub fn call(&self, call: &str, args: Vec<JsonValue>) {
        if !self.ensure_live("call") {
            return;
        }
        self.inner.queue.outbox().post(
            MessageKind::ObjectCall,
            &ObjectCall {
                proxy_id: self.inner.id,
                call: call.to_string(),
                args,
            },
        );
    }

    /// Local world transform; sent to the peer on every flush while live.
    pub fn set_world_transform(&self, transform: Transform) {
        self.inner.transform.set(transform);
    }

    pub fn world_transform(&self) -> Transform {
        self.inner.transform.get()
    }

    /// Detaches the node: it stops syncing and the peer destroys its copy.
    /// Calling this more than once has no further effect.
    pub fn remove(&self) {
        self.inner.remove();
    }

    fn ensure_live(&self, operation: &str) -> bool {
        if !self.inner.live.get() {
            debug!(target: "proxy", id = %self.inner.id, operation, "ignoring call on removed scene object");
            return false;
        }
        true
    }
}

impl SceneObjectInner {
    fn remove(&self) {
        if !self.live.replace(false) {
            return;
        }
        self.queue.untrack_live(self.id);
        self.queue.registry().unregister(self.id);
        self.queue
            .outbox()
            .post(MessageKind::ObjectDestroy, &ObjectDestroy { proxy_id: self.id });
        debug!(target: "proxy", id = %self.id, "removed scene object");
    }
}

impl LiveObject for SceneObjectInner {
    fn proxy_id(&self) -> ProxyId {
        self.id
    }

    fn world_transform(&self) -> Transform {
        self.transform.get()
    }
}

impl Drop for SceneObjectInner {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for SceneObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneObjectProxy")
            .field("id", &self.inner.id)
            .field("object_type", &self.inner.object_type)
            .field("live", &self.inner.live.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::channel;

    fn queue() -> MessageQueue {
        let (endpoint, _peer) = channel::pair();
        MessageQueue::new(endpoint)
    }

    #[test]
    fn construction_registers_and_enqueues_create() {
        let queue = queue();
        let node = SceneObjectProxy::new(&queue, "Mesh");

        assert!(queue.registry().contains(node.id()));
        assert_eq!(queue.live_objects(), vec![node.id()]);
        let messages = queue.outbox().take();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::ObjectCreate);
        assert_eq!(messages[0].payload["type"], "Mesh");
        assert_eq!(messages[0].payload["proxy_id"], node.id().to_string());
    }

    #[test]
    fn param_and_call_carry_proxy_id() {
        let queue = queue();
        let node = SceneObjectProxy::new(&queue, "Mesh");
        queue.outbox().take();

        node.set_param("visible", false);
        node.call("lookAt", vec![json!(1.0), json!(2.0), json!(3.0)]);

        let messages = queue.outbox().take();
        assert_eq!(messages[0].kind, MessageKind::ObjectParamSet);
        assert_eq!(messages[0].payload["param"], "visible");
        assert_eq!(messages[0].payload["arg"], false);
        assert_eq!(messages[1].kind, MessageKind::ObjectCall);
        assert_eq!(messages[1].payload["args"], json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn remove_is_idempotent_and_silences_the_handle() {
        let queue = queue();
        let node = SceneObjectProxy::new(&queue, "Mesh");
        queue.outbox().take();

        node.remove();
        node.remove();
        node.set_param("visible", true);
        node.call("play", Vec::new());

        assert_eq!(queue.outbox().pending_kinds(), vec![MessageKind::ObjectDestroy]);
        assert!(!queue.registry().contains(node.id()));
        assert!(queue.live_objects().is_empty());
    }

    #[test]
    fn dropping_last_handle_removes_node() {
        let queue = queue();
        let node = SceneObjectProxy::new(&queue, "Group");
        let id = node.id();
        let clone = node.clone();
        drop(node);
        assert!(queue.registry().contains(id));

        drop(clone);
        assert!(!queue.registry().contains(id));
        assert_eq!(
            queue.outbox().pending_kinds(),
            vec![MessageKind::ObjectCreate, MessageKind::ObjectDestroy]
        );
    }

    #[test]
    fn flush_appends_world_transform_for_live_nodes() {
        let (a, b) = channel::pair();
        let queue = MessageQueue::new(a);
        let mut peer = b.receiver;

        let node = SceneObjectProxy::new(&queue, "Mesh");
        node.set_world_transform(Transform::from_translation(1.0, 2.0, 3.0));
        queue.flush();

        let batch = peer.try_recv().unwrap().unwrap();
        let kinds: Vec<MessageKind> = batch.messages.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MessageKind::ObjectCreate, MessageKind::ObjectMatrix]);
        let matrix: Transform =
            serde_json::from_value(batch.messages[1].payload["matrix_world"].clone()).unwrap();
        assert_eq!(matrix.translation(), [1.0, 2.0, 3.0]);

        node.remove();
        queue.flush();
        let batch = peer.try_recv().unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.messages[0].kind, MessageKind::ObjectDestroy);
    }
}
