//! Worker-side stand-ins for objects that live in the controlling context.

pub mod audio;
pub mod element;
pub mod scene;

pub use audio::{
    AudioBufferId, AudioListenerProxy, AudioLoaderProxy, AudioObjectProxy, PositionalAudioProxy,
};
pub use element::{
    Capabilities, CallReceipt, DocumentElement, ElementError, ElementKind, VideoState,
};
pub use scene::SceneObjectProxy;
