// Library exports for both execution contexts

pub mod channel;
pub mod config;
pub mod driver;
pub mod events;
pub mod host;
pub mod protocol;
pub mod proxy;
pub mod queue;
pub mod registry;
pub mod surface;
pub mod worker;

// Re-export commonly used types
pub use channel::{pair, ChannelEndpoint, ChannelError};
pub use config::{ConfigError, SessionConfig};
pub use events::{Event, EventTarget, Listener, WeakListener};
pub use host::{
    create_session, create_session_with_backend, ControllingHandle, HostBackend, LoadStatus,
    NullBackend, SessionOptions, VideoFrameInput,
};
pub use protocol::{MessageKind, PayloadError, ProxyId, Transform};
pub use proxy::{
    AudioBufferId, AudioListenerProxy, AudioLoaderProxy, AudioObjectProxy, CallReceipt,
    DocumentElement, ElementError, ElementKind, PositionalAudioProxy, SceneObjectProxy,
};
pub use queue::MessageQueue;
pub use surface::{OffscreenSurface, PixelSurface};
pub use worker::{receive_session, Document, WindowMetrics, WorkerHandle};
