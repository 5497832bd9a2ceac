use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{Event, EventDispatcher, EventTarget, Listener};
use crate::protocol::{
    ElementCall, ElementCreate, ElementParamSet, ElementPropUpdate, EventPayload, Inbound,
    MessageKind, ProxyId, VideoCreate, VideoFrame,
};
use crate::queue::{HandlerTable, MessageQueue};
use crate::surface::rgba_len;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Audio,
    Video,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Audio => "audio",
            ElementKind::Video => "video",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "audio" => Some(ElementKind::Audio),
            "video" => Some(ElementKind::Video),
            _ => None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        // Video currently adds nothing on top of the media element set.
        match self {
            ElementKind::Audio | ElementKind::Video => Capabilities {
                transferred: &["src"],
                remote_calls: &["play"],
            },
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Property names mirrored to the real element and methods invoked on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub transferred: &'static [&'static str],
    pub remote_calls: &'static [&'static str],
}

impl Capabilities {
    pub fn is_transferred(&self, property: &str) -> bool {
        self.transferred.contains(&property)
    }

    pub fn is_remote_call(&self, method: &str) -> bool {
        self.remote_calls.contains(&method)
    }
}

/// The call was queued for the controlling side. Nothing is known yet about
/// whether it succeeded there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallReceipt {
    Queued,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ElementError {
    #[error("`{method}` is not a remote method of <{kind}>")]
    NotRemote { kind: ElementKind, method: String },
    #[error("unsupported element type `{0}`")]
    UnsupportedType(String),
}

/// Latest decoded frame of a video element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoState {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub ready_state: u8,
}

type FrameCallback = Rc<dyn Fn(&VideoState)>;

/// Stand-in for an `<audio>` or `<video>` element owned by the controlling
/// context.
#[derive(Clone)]
pub struct DocumentElement {
    inner: Rc<ElementInner>,
}

struct ElementInner {
    id: ProxyId,
    kind: ElementKind,
    capabilities: Capabilities,
    queue: MessageQueue,
    handlers: Rc<HandlerTable>,
    properties: RefCell<JsonMap<String, JsonValue>>,
    dispatcher: EventDispatcher,
    video: RefCell<VideoState>,
    frame_callback: RefCell<Option<FrameCallback>>,
}

impl DocumentElement {
    pub fn audio(queue: &MessageQueue) -> Self {
        Self::new(queue, ElementKind::Audio)
    }

    pub fn video(queue: &MessageQueue) -> Self {
        Self::new(queue, ElementKind::Video)
    }

    pub fn new(queue: &MessageQueue, kind: ElementKind) -> Self {
        let id = ProxyId::generate();
        let inner = Rc::new(ElementInner {
            id,
            kind,
            capabilities: kind.capabilities(),
            queue: queue.clone(),
            handlers: Rc::new(HandlerTable::new()),
            properties: RefCell::new(JsonMap::new()),
            dispatcher: EventDispatcher::new(EventTarget::Element(id), queue.outbox().clone()),
            video: RefCell::new(VideoState::default()),
            frame_callback: RefCell::new(None),
        });
        install_handlers(&inner);

        queue.registry().register(id, &inner.handlers);
        queue.outbox().post(
            MessageKind::ElementCreate,
            &ElementCreate {
                element_type: kind.as_str().to_string(),
                id,
            },
        );
        debug!(target: "proxy", %id, %kind, "created element");

        Self { inner }
    }

    pub fn id(&self) -> ProxyId {
        self.inner.id
    }

    pub fn kind(&self) -> ElementKind {
        self.inner.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    /// Writes a property locally; transferred properties are also sent to the
    /// real element, in write order.
    pub fn set_property(&self, name: &str, value: impl Into<JsonValue>) {
        let value = value.into();
        if self.inner.capabilities.is_transferred(name) {
            self.inner.queue.outbox().post(
                MessageKind::ElementParamSet,
                &ElementParamSet {
                    id: self.inner.id,
                    param: name.to_string(),
                    arg: value.clone(),
                },
            );
        }
        self.inner
            .properties
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    pub fn property(&self, name: &str) -> Option<JsonValue> {
        self.inner.properties.borrow().get(name).cloned()
    }

    pub fn call(&self, method: &str, args: Vec<JsonValue>) -> Result<CallReceipt, ElementError> {
        if !self.inner.capabilities.is_remote_call(method) {
            return Err(ElementError::NotRemote {
                kind: self.inner.kind,
                method: method.to_string(),
            });
        }
        self.inner.queue.outbox().post(
            MessageKind::ElementCall,
            &ElementCall {
                id: self.inner.id,
                call: method.to_string(),
                args,
            },
        );
        Ok(CallReceipt::Queued)
    }

    pub fn play(&self) -> Result<CallReceipt, ElementError> {
        self.call("play", Vec::new())
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

    pub fn dispatch_event(&self, event: Event) -> usize {
        self.inner.dispatcher.dispatch_event(event)
    }

    /// Replaces the callback invoked after every received video frame.
    pub fn request_video_frame_callback(&self, callback: impl Fn(&VideoState) + 'static) {
        *self.inner.frame_callback.borrow_mut() = Some(Rc::new(callback));
    }

    pub fn video_state(&self) -> VideoState {
        self.inner.video.borrow().clone()
    }

    pub fn with_video<R>(&self, read: impl FnOnce(&VideoState) -> R) -> R {
        read(&self.inner.video.borrow())
    }
}

fn install_handlers(inner: &Rc<ElementInner>) {
    let table = &inner.handlers;

    let weak = Rc::downgrade(inner);
    table.set(MessageKind::ElementEvent, move |_, inbound| {
        with_element(&weak, |element| element.on_event(&inbound));
    });
    let weak = Rc::downgrade(inner);
    table.set(MessageKind::Event, move |_, inbound| {
        with_element(&weak, |element| element.on_event(&inbound));
    });
    let weak = Rc::downgrade(inner);
    table.set(MessageKind::ElementPropUpdate, move |_, inbound| {
        with_element(&weak, |element| element.on_prop_update(&inbound));
    });

    if inner.kind == ElementKind::Video {
        let weak = Rc::downgrade(inner);
        table.set(MessageKind::VideoCreate, move |_, inbound| {
            with_element(&weak, |element| element.on_video_create(&inbound));
        });
        let weak = Rc::downgrade(inner);
        table.set(MessageKind::VideoFrame, move |_, inbound| {
            with_element(&weak, |element| element.on_video_frame(inbound));
        });
    }
}

fn with_element(weak: &Weak<ElementInner>, apply: impl FnOnce(&ElementInner)) {
    if let Some(element) = weak.upgrade() {
        apply(&element);
    }
}

impl ElementInner {
    fn on_event(&self, inbound: &Inbound) {
        match inbound.parse::<EventPayload>() {
            Ok(payload) => {
                self.dispatcher.dispatch_event(Event::from(payload));
            }
            Err(err) => warn!(target: "proxy", id = %self.id, error = %err, "discarding element event"),
        }
    }

    fn on_prop_update(&self, inbound: &Inbound) {
        match inbound.parse::<ElementPropUpdate>() {
            Ok(update) => {
                self.properties.borrow_mut().insert(update.param, update.arg);
            }
            Err(err) => warn!(target: "proxy", id = %self.id, error = %err, "discarding property update"),
        }
    }

    fn on_video_create(&self, inbound: &Inbound) {
        let create = match inbound.parse::<VideoCreate>() {
            Ok(create) => create,
            Err(err) => {
                warn!(target: "proxy", id = %self.id, error = %err, "discarding video create");
                return;
            }
        };
        let Some(len) = rgba_len(create.width, create.height) else {
            warn!(
                target: "proxy",
                id = %self.id,
                width = create.width,
                height = create.height,
                "discarding oversized video create"
            );
            return;
        };
        let mut video = self.video.borrow_mut();
        video.width = create.width;
        video.height = create.height;
        video.pixels = vec![0; len];
        debug!(target: "proxy", id = %self.id, width = create.width, height = create.height, "video stream sized");
    }

    fn on_video_frame(&self, mut inbound: Inbound) {
        let frame = match inbound.parse::<VideoFrame>() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target: "proxy", id = %self.id, error = %err, "discarding video frame");
                return;
            }
        };
        let pixels = match inbound.take_transferable(frame.buffer).map(|t| t.into_buffer()) {
            Ok(Some(pixels)) => pixels,
            Ok(None) => {
                warn!(target: "proxy", id = %self.id, "video frame carried a surface instead of pixels");
                return;
            }
            Err(err) => {
                warn!(target: "proxy", id = %self.id, error = %err, "discarding video frame");
                return;
            }
        };

        {
            let mut video = self.video.borrow_mut();
            if Some(pixels.len()) != rgba_len(video.width, video.height) {
                debug!(
                    target: "proxy",
                    id = %self.id,
                    len = pixels.len(),
                    width = video.width,
                    height = video.height,
                    "frame size differs from announced stream size"
                );
            }
            video.pixels = pixels;
            video.ready_state = frame.ready_state;
        }

        let callback = self.frame_callback.borrow().clone();
        if let Some(callback) = callback {
            callback(&self.video.borrow());
        }
    }
}

impl Drop for ElementInner {
    fn drop(&mut self) {
        self.queue.registry().unregister(self.id);
    }
}

impl fmt::Debug for DocumentElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentElement")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;
    use crate::channel;
    use crate::protocol::{Batch, Message, Transferable};

    fn queue() -> MessageQueue {
        let (endpoint, _peer) = channel::pair();
        MessageQueue::new(endpoint)
    }

    fn deliver(queue: &MessageQueue, messages: Vec<Message>) {
        queue.dispatch(Batch::from_messages(messages));
    }

    #[test]
    fn transferred_properties_are_sent_in_write_order() {
        let queue = queue();
        let audio = DocumentElement::audio(&queue);
        queue.outbox().take();

        audio.set_property("src", "a.mp3");
        audio.set_property("src", "b.mp3");
        audio.set_property("muted", true);

        let messages = queue.outbox().take();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload["arg"], "a.mp3");
        assert_eq!(messages[1].payload["arg"], "b.mp3");
        assert_eq!(audio.property("src"), Some(json!("b.mp3")));
        assert_eq!(audio.property("muted"), Some(json!(true)));
    }

    #[test]
    fn only_declared_methods_are_remote() {
        let queue = queue();
        let video = DocumentElement::video(&queue);
        queue.outbox().take();

        assert_eq!(video.play(), Ok(CallReceipt::Queued));
        assert!(matches!(
            video.call("pause", Vec::new()),
            Err(ElementError::NotRemote { kind: ElementKind::Video, .. })
        ));
        assert_eq!(queue.outbox().pending_kinds(), vec![MessageKind::ElementCall]);
    }

    #[test]
    fn video_frames_replace_buffer_and_invoke_callback() {
        let queue = queue();
        let video = DocumentElement::video(&queue);
        let frames = Rc::new(Cell::new(0));
        {
            let frames = Rc::clone(&frames);
            video.request_video_frame_callback(move |state| {
                assert_eq!(state.pixels.len(), 64);
                frames.set(frames.get() + 1);
            });
        }

        let id = video.id();
        let create = Message::new(
            MessageKind::VideoCreate,
            &VideoCreate { return_id: id, width: 4, height: 4 },
        )
        .unwrap();
        let frame = |fill: u8, ready_state: u8| {
            Message::new(
                MessageKind::VideoFrame,
                &VideoFrame { return_id: id, buffer: 0, ready_state },
            )
            .unwrap()
            .with_transferables(vec![Transferable::Buffer(vec![fill; 64])])
        };
        deliver(&queue, vec![create]);
        assert_eq!(video.video_state().pixels, vec![0; 64]);

        deliver(&queue, vec![frame(1, 2), frame(9, 4)]);
        let state = video.video_state();
        assert_eq!(state.pixels, vec![9; 64]);
        assert_eq!(state.ready_state, 4);
        assert_eq!(frames.get(), 2);
    }

    #[test]
    fn oversized_video_create_keeps_current_stream() {
        let queue = queue();
        let video = DocumentElement::video(&queue);
        let create = |width: u32, height: u32| {
            Message::new(
                MessageKind::VideoCreate,
                &VideoCreate { return_id: video.id(), width, height },
            )
            .unwrap()
        };
        deliver(&queue, vec![create(4, 4)]);
        deliver(&queue, vec![create(u32::MAX, u32::MAX), create(100_000, 100_000)]);

        let state = video.video_state();
        assert_eq!((state.width, state.height), (4, 4));
        assert_eq!(state.pixels.len(), 64);
    }

    #[test]
    fn malformed_video_messages_leave_state_untouched() {
        let queue = queue();
        let video = DocumentElement::video(&queue);
        let frames = Rc::new(Cell::new(0));
        {
            let frames = Rc::clone(&frames);
            video.request_video_frame_callback(move |_| frames.set(frames.get() + 1));
        }
        let id = video.id();
        deliver(
            &queue,
            vec![
                Message::new(MessageKind::VideoCreate, &VideoCreate { return_id: id, width: 2, height: 2 })
                    .unwrap(),
                Message::new(MessageKind::VideoFrame, &VideoFrame { return_id: id, buffer: 0, ready_state: 3 })
                    .unwrap()
                    .with_transferables(vec![Transferable::Buffer(vec![5; 16])]),
            ],
        );
        assert_eq!(frames.get(), 1);

        let raw = id.to_string();
        deliver(
            &queue,
            vec![
                Message::new(MessageKind::VideoCreate, &json!({ "return_id": raw, "height": 8 })).unwrap(),
                Message::new(
                    MessageKind::VideoFrame,
                    &VideoFrame { return_id: id, buffer: 0, ready_state: 4 },
                )
                .unwrap(),
                Message::new(
                    MessageKind::VideoFrame,
                    &json!({ "return_id": raw, "buffer": 0, "ready_state": "playing" }),
                )
                .unwrap()
                .with_transferables(vec![Transferable::Buffer(vec![9; 16])]),
            ],
        );

        let state = video.video_state();
        assert_eq!((state.width, state.height), (2, 2));
        assert_eq!(state.pixels, vec![5; 16]);
        assert_eq!(state.ready_state, 3);
        assert_eq!(frames.get(), 1);
    }

    #[test]
    fn audio_elements_ignore_video_messages() {
        let queue = queue();
        let audio = DocumentElement::audio(&queue);
        let create = Message::new(
            MessageKind::VideoCreate,
            &VideoCreate { return_id: audio.id(), width: 2, height: 2 },
        )
        .unwrap();
        assert_eq!(queue.dispatch(Batch::from_messages(vec![create])), 0);
        assert!(audio.video_state().pixels.is_empty());
    }

    #[test]
    fn host_events_and_property_updates_reach_the_element() {
        let queue = queue();
        let audio = DocumentElement::audio(&queue);
        let ended = Rc::new(Cell::new(0));
        let listener = {
            let ended = Rc::clone(&ended);
            let owner = audio.id();
            Listener::new(move |event: &Event| {
                assert_eq!(event.target, Some(EventTarget::Element(owner)));
                ended.set(ended.get() + 1);
            })
        };
        audio.add_event_listener("ended", &listener);

        let id = audio.id().to_string();
        deliver(
            &queue,
            vec![
                Message::new(MessageKind::ElementEvent, &json!({ "type": "ended", "return_id": id }))
                    .unwrap(),
                Message::new(
                    MessageKind::ElementPropUpdate,
                    &json!({ "return_id": id, "param": "duration", "arg": 12.5 }),
                )
                .unwrap(),
            ],
        );

        assert_eq!(ended.get(), 1);
        assert_eq!(audio.property("duration"), Some(json!(12.5)));
        assert!(!queue
            .outbox()
            .pending_kinds()
            .contains(&MessageKind::ElementParamSet));
    }

    #[test]
    fn dropping_element_unregisters_it() {
        let queue = queue();
        let element = DocumentElement::video(&queue);
        let id = element.id();
        drop(element);
        assert!(!queue.registry().contains(id));
    }
}
