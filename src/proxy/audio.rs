use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;

use serde_json::json;
use tracing::debug;

use crate::events::{Event, Listener};
use crate::protocol::{AudioBufferLoad, AudioBufferSet, AudioSourceSet, MessageKind};
use crate::queue::MessageQueue;

use super::element::DocumentElement;
use super::scene::SceneObjectProxy;

/// Handle to an audio buffer decoded by the controlling side. It is the url
/// the buffer was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioBufferId(String);

impl AudioBufferId {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AudioBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The scene's audio listener, usually attached to the camera.
#[derive(Debug, Clone)]
pub struct AudioListenerProxy {
    object: SceneObjectProxy,
}

impl AudioListenerProxy {
    pub fn new(queue: &MessageQueue) -> Self {
        Self {
            object: SceneObjectProxy::new(queue, "AudioListener"),
        }
    }
}

impl Deref for AudioListenerProxy {
    type Target = SceneObjectProxy;

    fn deref(&self) -> &SceneObjectProxy {
        &self.object
    }
}

/// Non-positional audio source.
#[derive(Debug, Clone)]
pub struct AudioObjectProxy {
    object: SceneObjectProxy,
}

impl AudioObjectProxy {
    pub fn new(queue: &MessageQueue) -> Self {
        Self::with_type(queue, "Audio")
    }

    fn with_type(queue: &MessageQueue, object_type: &str) -> Self {
        Self {
            object: SceneObjectProxy::new(queue, object_type),
        }
    }

    /// Plays the output of a media element through this source.
    pub fn set_media_element_source(&self, source: &DocumentElement) {
        if !self.object.is_live() {
            debug!(target: "proxy", id = %self.object.id(), "ignoring source on removed audio object");
            return;
        }
        self.object.queue().outbox().post(
            MessageKind::AudioSourceSet,
            &AudioSourceSet {
                proxy_id: self.object.id(),
                source_id: source.id(),
            },
        );
    }

    pub fn set_buffer(&self, buffer: &AudioBufferId) {
        if !self.object.is_live() {
            debug!(target: "proxy", id = %self.object.id(), "ignoring buffer on removed audio object");
            return;
        }
        self.object.queue().outbox().post(
            MessageKind::AudioBufferSet,
            &AudioBufferSet {
                proxy_id: self.object.id(),
                buffer: buffer.as_str().to_string(),
            },
        );
    }

    pub fn set_loop(&self, looping: bool) {
        self.object.call("setLoop", vec![json!(looping)]);
    }

    pub fn set_volume(&self, volume: f64) {
        self.object.call("setVolume", vec![json!(volume)]);
    }

    pub fn play(&self) {
        self.object.call("play", Vec::new());
    }
}

impl Deref for AudioObjectProxy {
    type Target = SceneObjectProxy;

    fn deref(&self) -> &SceneObjectProxy {
        &self.object
    }
}

/// Audio source panned by its world transform.
#[derive(Debug, Clone)]
pub struct PositionalAudioProxy {
    audio: AudioObjectProxy,
}

impl PositionalAudioProxy {
    pub fn new(queue: &MessageQueue) -> Self {
        Self {
            audio: AudioObjectProxy::with_type(queue, "PositionalAudio"),
        }
    }
}

impl Deref for PositionalAudioProxy {
    type Target = AudioObjectProxy;

    fn deref(&self) -> &AudioObjectProxy {
        &self.audio
    }
}

/// Asks the controlling side to fetch and decode audio files.
#[derive(Clone)]
pub struct AudioLoaderProxy {
    queue: MessageQueue,
}

impl AudioLoaderProxy {
    pub fn new(queue: &MessageQueue) -> Self {
        Self {
            queue: queue.clone(),
        }
    }

    /// Requests `url`; `on_loaded` runs once, when the controlling side reports
    /// the buffer ready with an event named after the url.
    pub fn load(&self, url: &str, on_loaded: impl FnOnce(AudioBufferId) + 'static) {
        let callback = RefCell::new(Some(on_loaded));
        let queue = self.queue.downgrade();
        let listener = Listener::new_cyclic(move |this| {
            move |event: &Event| {
                let Some(on_loaded) = callback.borrow_mut().take() else {
                    return;
                };
                if let (Some(listener), Some(queue)) = (this.upgrade(), queue.upgrade()) {
                    queue.remove_event_listener(&event.event_type, &listener);
                }
                on_loaded(AudioBufferId::new(event.event_type.clone()));
            }
        });

        self.queue.add_event_listener(url, &listener);
        self.queue.outbox().post(
            MessageKind::AudioBufferLoad,
            &AudioBufferLoad {
                url: url.to_string(),
            },
        );
        debug!(target: "proxy", url, "requested audio buffer");
    }
}
