//! The controlling context: owns the real scene and media and applies what the
//! worker's proxies ask for.

pub mod media;
pub mod scene;

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tracing::{debug, info, warn};

pub use media::{HostElement, MediaTable, VideoFrameInput};
pub use scene::{ShadowNode, ShadowScene};

use crate::channel::ChannelEndpoint;
use crate::events::{Event, Listener};
use crate::protocol::{
    AudioBufferLoad, AudioBufferSet, AudioSourceSet, ElementCall, ElementCreate, ElementParamSet,
    ElementPropUpdate, ElementSubscription, EventPayload, Inbound, MessageKind, ObjectCall,
    ObjectCreate, ObjectDestroy, ObjectMatrix, ObjectParamSet, ProxyId, SurfaceHandoff, Tick,
    Transferable, Transform, VideoCreate, VideoFrame,
};
use crate::proxy::ElementKind;
use crate::queue::MessageQueue;
use crate::surface::{rgba_len, OffscreenSurface};

/// Outcome of asking the backend for an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Ready now; the worker is told immediately.
    Loaded,
    /// The embedder calls [`ControllingHandle::audio_buffer_loaded`] later.
    Deferred,
    Failed,
}

/// Effects the embedding application performs on its real scene and media.
///
/// Every hook runs after the shadow state has been updated. All methods have
/// no-op defaults.
pub trait HostBackend {
    fn create_object(&mut self, _id: ProxyId, _object_type: &str) {}

    fn destroy_object(&mut self, _id: ProxyId) {}

    fn move_object(&mut self, _id: ProxyId, _matrix_world: &Transform) {}

    fn set_object_param(&mut self, _id: ProxyId, _param: &str, _arg: &JsonValue) {}

    fn call_object(&mut self, _id: ProxyId, _call: &str, _args: &[JsonValue]) {}

    fn create_element(&mut self, _id: ProxyId, _kind: ElementKind) {}

    fn set_element_param(&mut self, _id: ProxyId, _param: &str, _arg: &JsonValue) {}

    fn call_element(&mut self, _id: ProxyId, _call: &str, _args: &[JsonValue]) {}

    fn load_audio_buffer(&mut self, _url: &str) -> LoadStatus {
        LoadStatus::Loaded
    }

    fn set_audio_buffer(&mut self, _object: ProxyId, _url: &str) {}

    fn set_audio_source(&mut self, _object: ProxyId, _element: ProxyId) {}
}

/// Backend that only keeps the shadow state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl HostBackend for NullBackend {}

/// Placement of the handed-over surface plus free-form renderer options.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub top: f64,
    pub left: f64,
    pub pixel_ratio: f64,
    pub options: JsonValue,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            top: 0.0,
            left: 0.0,
            pixel_ratio: 1.0,
            options: JsonValue::Object(JsonMap::new()),
        }
    }
}

struct HostState {
    scene: RefCell<ShadowScene>,
    media: RefCell<MediaTable>,
    backend: RefCell<Box<dyn HostBackend>>,
}

/// Controlling-side handle of a session.
#[derive(Clone)]
pub struct ControllingHandle {
    queue: MessageQueue,
    state: Rc<HostState>,
}

pub fn create_session(
    endpoint: ChannelEndpoint,
    surface: Box<dyn OffscreenSurface>,
    options: SessionOptions,
) -> ControllingHandle {
    create_session_with_backend(endpoint, surface, options, NullBackend)
}

/// Starts a session and queues the surface handoff. The surface moves to the
/// worker with the first flush.
pub fn create_session_with_backend(
    endpoint: ChannelEndpoint,
    surface: Box<dyn OffscreenSurface>,
    options: SessionOptions,
    backend: impl HostBackend + 'static,
) -> ControllingHandle {
    let queue = MessageQueue::new(endpoint);
    let backend: Box<dyn HostBackend> = Box::new(backend);
    let state = Rc::new(HostState {
        scene: RefCell::new(ShadowScene::default()),
        media: RefCell::new(MediaTable::default()),
        backend: RefCell::new(backend),
    });
    install_handlers(&queue, &state);

    let (width, height) = surface.size();
    queue.outbox().post_with(
        MessageKind::SurfaceHandoff,
        &SurfaceHandoff {
            width,
            height,
            top: options.top,
            left: options.left,
            pixel_ratio: options.pixel_ratio,
            options: options.options,
            canvas: 0,
        },
        vec![Transferable::Surface(surface)],
    );
    info!(target: "host", width, height, "queued surface handoff");

    ControllingHandle { queue, state }
}

fn parse_or_warn<P: DeserializeOwned>(inbound: &Inbound) -> Option<P> {
    match inbound.parse() {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(target: "host", error = %err, "discarding malformed message");
            None
        }
    }
}

fn install_handlers(queue: &MessageQueue, state: &Rc<HostState>) {
    let handlers = queue.handlers();

    let host = Rc::clone(state);
    handlers.set(MessageKind::ObjectCreate, move |_, inbound| {
        let Some(create) = parse_or_warn::<ObjectCreate>(&inbound) else {
            return;
        };
        if !host.scene.borrow_mut().create(create.proxy_id, &create.object_type) {
            warn!(target: "host", id = %create.proxy_id, "scene object created twice");
            return;
        }
        debug!(target: "host", id = %create.proxy_id, object_type = %create.object_type, "scene object created");
        host.backend
            .borrow_mut()
            .create_object(create.proxy_id, &create.object_type);
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ObjectDestroy, move |_, inbound| {
        let Some(destroy) = parse_or_warn::<ObjectDestroy>(&inbound) else {
            return;
        };
        if host.scene.borrow_mut().destroy(destroy.proxy_id).is_some() {
            debug!(target: "host", id = %destroy.proxy_id, "scene object destroyed");
            host.backend.borrow_mut().destroy_object(destroy.proxy_id);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ObjectMatrix, move |_, inbound| {
        let Some(matrix) = parse_or_warn::<ObjectMatrix>(&inbound) else {
            return;
        };
        if host
            .scene
            .borrow_mut()
            .apply_matrix(matrix.proxy_id, matrix.matrix_world)
        {
            host.backend
                .borrow_mut()
                .move_object(matrix.proxy_id, &matrix.matrix_world);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ObjectParamSet, move |_, inbound| {
        let Some(set) = parse_or_warn::<ObjectParamSet>(&inbound) else {
            return;
        };
        if host
            .scene
            .borrow_mut()
            .set_param(set.proxy_id, set.param.clone(), set.arg.clone())
        {
            host.backend
                .borrow_mut()
                .set_object_param(set.proxy_id, &set.param, &set.arg);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ObjectCall, move |_, inbound| {
        let Some(call) = parse_or_warn::<ObjectCall>(&inbound) else {
            return;
        };
        if host.scene.borrow().contains(call.proxy_id) {
            host.backend
                .borrow_mut()
                .call_object(call.proxy_id, &call.call, &call.args);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ElementCreate, move |_, inbound| {
        let Some(create) = parse_or_warn::<ElementCreate>(&inbound) else {
            return;
        };
        let Some(kind) = ElementKind::parse(&create.element_type) else {
            warn!(target: "host", element_type = %create.element_type, "ignoring unsupported element");
            return;
        };
        if host.media.borrow_mut().create(create.id, kind) {
            debug!(target: "host", id = %create.id, %kind, "element created");
            host.backend.borrow_mut().create_element(create.id, kind);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ElementParamSet, move |_, inbound| {
        let Some(set) = parse_or_warn::<ElementParamSet>(&inbound) else {
            return;
        };
        let applied = match host.media.borrow_mut().get_mut(set.id) {
            Some(element) => {
                element.properties.insert(set.param.clone(), set.arg.clone());
                true
            }
            None => false,
        };
        if applied {
            host.backend
                .borrow_mut()
                .set_element_param(set.id, &set.param, &set.arg);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ElementCall, move |_, inbound| {
        let Some(call) = parse_or_warn::<ElementCall>(&inbound) else {
            return;
        };
        if host.media.borrow().contains(call.id) {
            host.backend
                .borrow_mut()
                .call_element(call.id, &call.call, &call.args);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ElementAddEvent, move |_, inbound| {
        let Some(sub) = parse_or_warn::<ElementSubscription>(&inbound) else {
            return;
        };
        if let Some(element) = host.media.borrow_mut().get_mut(sub.id) {
            element.subscriptions.add(&sub.event_type);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::ElementRemoveEvent, move |_, inbound| {
        let Some(sub) = parse_or_warn::<ElementSubscription>(&inbound) else {
            return;
        };
        if let Some(element) = host.media.borrow_mut().get_mut(sub.id) {
            element.subscriptions.remove(&sub.event_type);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::AudioBufferLoad, move |queue, inbound| {
        let Some(load) = parse_or_warn::<AudioBufferLoad>(&inbound) else {
            return;
        };
        host.media.borrow_mut().begin_load(&load.url);
        let status = host.backend.borrow_mut().load_audio_buffer(&load.url);
        match status {
            LoadStatus::Loaded => {
                host.media.borrow_mut().finish_load(&load.url);
                queue.send_event(&load.url, JsonMap::new(), Vec::new());
                debug!(target: "host", url = %load.url, "audio buffer loaded");
            }
            LoadStatus::Deferred => {
                debug!(target: "host", url = %load.url, "audio buffer load deferred");
            }
            LoadStatus::Failed => {
                host.media.borrow_mut().fail_load(&load.url);
                warn!(target: "host", url = %load.url, "audio buffer failed to load");
            }
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::AudioBufferSet, move |_, inbound| {
        let Some(set) = parse_or_warn::<AudioBufferSet>(&inbound) else {
            return;
        };
        if !host.media.borrow().is_loaded(&set.buffer) {
            debug!(target: "host", url = %set.buffer, "ignoring unknown audio buffer");
            return;
        }
        let applied = match host.scene.borrow_mut().get_mut(set.proxy_id) {
            Some(node) => {
                node.audio_buffer = Some(set.buffer.clone());
                true
            }
            None => false,
        };
        if applied {
            host.backend
                .borrow_mut()
                .set_audio_buffer(set.proxy_id, &set.buffer);
        }
    });

    let host = Rc::clone(state);
    handlers.set(MessageKind::AudioSourceSet, move |_, inbound| {
        let Some(set) = parse_or_warn::<AudioSourceSet>(&inbound) else {
            return;
        };
        if !host.media.borrow().contains(set.source_id) {
            debug!(target: "host", source = %set.source_id, "ignoring unknown media source");
            return;
        }
        let applied = match host.scene.borrow_mut().get_mut(set.proxy_id) {
            Some(node) => {
                node.media_source = Some(set.source_id);
                true
            }
            None => false,
        };
        if applied {
            host.backend
                .borrow_mut()
                .set_audio_source(set.proxy_id, set.source_id);
        }
    });
}

impl ControllingHandle {
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn flush(&self) -> usize {
        self.queue.flush()
    }

    pub fn pump(&self) -> usize {
        self.queue.pump()
    }

    pub fn scene(&self) -> Ref<'_, ShadowScene> {
        self.state.scene.borrow()
    }

    /// Returns the ids of shadow nodes whose transform changed since the last
    /// call.
    pub fn take_dirty_nodes(&self) -> Vec<ProxyId> {
        self.state.scene.borrow_mut().take_dirty()
    }

    pub fn media(&self) -> Ref<'_, MediaTable> {
        self.state.media.borrow()
    }

    /// Tells the worker the surface's display size changed.
    pub fn resize(&self, width: u32, height: u32) {
        let mut detail = JsonMap::new();
        detail.insert("width".into(), json!(width));
        detail.insert("height".into(), json!(height));
        self.queue.send_event("resize", detail, Vec::new());
    }

    pub fn tick(&self, time_ms: f64) {
        self.queue
            .outbox()
            .post(MessageKind::Tick, &Tick { time: time_ms });
    }

    /// Forwards an input or window event if the worker listens for its type.
    pub fn emit_event(&self, event: &Event) -> bool {
        self.queue.forward_event(event)
    }

    /// Forwards an event raised by a real element if the worker's proxy has a
    /// listener for it.
    pub fn emit_element_event(&self, id: ProxyId, event: &Event) -> bool {
        if !self.state.media.borrow().is_subscribed(id, &event.event_type) {
            return false;
        }
        self.queue
            .outbox()
            .post(MessageKind::ElementEvent, &event.to_payload(Some(id)));
        true
    }

    /// Reflects host-side element state such as `duration` into the proxy.
    pub fn update_element_property(&self, id: ProxyId, param: &str, arg: JsonValue) -> bool {
        match self.state.media.borrow_mut().get_mut(id) {
            Some(element) => {
                element.properties.insert(param.to_string(), arg.clone());
            }
            None => return false,
        }
        self.queue.outbox().post(
            MessageKind::ElementPropUpdate,
            &ElementPropUpdate {
                return_id: id,
                param: param.to_string(),
                arg,
            },
        );
        true
    }

    /// Streams one frame to a video element proxy. The stream size is
    /// announced before the first frame and whenever it changes.
    pub fn push_video_frame(&self, id: ProxyId, frame: VideoFrameInput) -> bool {
        let size = (frame.width, frame.height);
        let Some(expected_len) = rgba_len(frame.width, frame.height) else {
            warn!(target: "host", %id, width = frame.width, height = frame.height, "refusing oversized video frame");
            return false;
        };
        let announce = {
            let mut media = self.state.media.borrow_mut();
            let Some(element) = media.get_mut(id) else {
                debug!(target: "host", %id, "video frame for unknown element");
                return false;
            };
            if element.kind != ElementKind::Video {
                warn!(target: "host", %id, kind = %element.kind, "video frame for non-video element");
                return false;
            }
            let announce = element.announced_size != Some(size);
            element.announced_size = Some(size);
            announce
        };

        if frame.pixels.len() != expected_len {
            warn!(
                target: "host",
                %id,
                len = frame.pixels.len(),
                width = frame.width,
                height = frame.height,
                "video frame length does not match its size"
            );
        }
        if announce {
            self.queue.outbox().post(
                MessageKind::VideoCreate,
                &VideoCreate {
                    return_id: id,
                    width: frame.width,
                    height: frame.height,
                },
            );
        }
        self.queue.outbox().post_with(
            MessageKind::VideoFrame,
            &VideoFrame {
                return_id: id,
                buffer: 0,
                ready_state: frame.ready_state,
            },
            vec![Transferable::Buffer(frame.pixels)],
        );
        true
    }

    /// Completes a load the backend deferred.
    pub fn audio_buffer_loaded(&self, url: &str) -> bool {
        if !self.state.media.borrow_mut().finish_load(url) {
            debug!(target: "host", url, "no pending load for audio buffer");
            return false;
        }
        self.queue.send_event(url, JsonMap::new(), Vec::new());
        true
    }

    pub fn add_event_listener(&self, event_type: &str, listener: &Listener) {
        self.queue.add_event_listener(event_type, listener);
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.queue.remove_event_listener(event_type, listener);
    }

    /// Queues a custom event for the worker, regardless of its listeners.
    pub fn send_event(&self, event_type: &str, detail: JsonMap<String, JsonValue>) {
        let payload = EventPayload {
            event_type: event_type.to_string(),
            return_id: None,
            detail,
        };
        self.queue.outbox().post(MessageKind::Event, &payload);
    }
}
