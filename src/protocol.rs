use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

use crate::surface::OffscreenSurface;

/// Every message kind that crosses the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    SurfaceHandoff,
    Tick,
    Event,
    AddEvent,
    RemoveEvent,
    ElementCreate,
    ElementCall,
    ElementParamSet,
    ElementAddEvent,
    ElementRemoveEvent,
    ElementEvent,
    ElementPropUpdate,
    VideoCreate,
    VideoFrame,
    ObjectCreate,
    ObjectDestroy,
    ObjectMatrix,
    ObjectParamSet,
    ObjectCall,
    AudioBufferLoad,
    AudioBufferSet,
    AudioSourceSet,
}

/// Opaque identifier of a proxy and its remote counterpart.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyId(Uuid);

impl ProxyId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyId({})", self.0)
    }
}

/// Column-major 4x4 world transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform(pub [f32; 16]);

impl Transform {
    pub const IDENTITY: Transform = Transform([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn from_translation(x: f32, y: f32, z: f32) -> Self {
        let mut matrix = Self::IDENTITY;
        matrix.0[12] = x;
        matrix.0[13] = y;
        matrix.0[14] = z;
        matrix
    }

    pub fn translation(&self) -> [f32; 3] {
        [self.0[12], self.0[13], self.0[14]]
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A value whose ownership moves to the receiving context on send.
pub enum Transferable {
    Buffer(Vec<u8>),
    Surface(Box<dyn OffscreenSurface>),
}

impl Transferable {
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            Transferable::Buffer(bytes) => Some(bytes),
            Transferable::Surface(_) => None,
        }
    }

    pub fn into_surface(self) -> Option<Box<dyn OffscreenSurface>> {
        match self {
            Transferable::Surface(surface) => Some(surface),
            Transferable::Buffer(_) => None,
        }
    }
}

impl fmt::Debug for Transferable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transferable::Buffer(bytes) => f
                .debug_struct("Buffer")
                .field("len", &bytes.len())
                .finish(),
            Transferable::Surface(surface) => f
                .debug_struct("Surface")
                .field("size", &surface.size())
                .finish(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to encode {kind:?} payload: {source}")]
    Encode {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed {kind:?} payload: {source}")]
    Decode {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind:?} payload references missing transferable {index}")]
    MissingTransferable { kind: MessageKind, index: usize },
}

/// An outgoing message as held by the queue.
#[derive(Debug)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: JsonValue,
    pub transferables: Vec<Transferable>,
}

impl Message {
    pub fn new<P: Serialize>(kind: MessageKind, payload: &P) -> Result<Self, PayloadError> {
        let payload =
            serde_json::to_value(payload).map_err(|source| PayloadError::Encode { kind, source })?;
        Ok(Self {
            kind,
            payload,
            transferables: Vec::new(),
        })
    }

    pub fn with_transferables(mut self, transferables: Vec<Transferable>) -> Self {
        self.transferables = transferables;
        self
    }
}

/// The serializable half of a message inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: MessageKind,
    pub payload: JsonValue,
    /// Number of consecutive batch transferables owned by this message.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub transfers: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl WireMessage {
    /// Target id carried by the payload, if any. Empty strings count as none.
    pub fn return_id(&self) -> Option<&str> {
        self.payload
            .get("return_id")
            .and_then(JsonValue::as_str)
            .filter(|raw| !raw.is_empty())
    }
}

/// One flush worth of messages plus every transferable they carry.
#[derive(Debug, Default)]
pub struct Batch {
    pub messages: Vec<WireMessage>,
    pub transferables: Vec<Transferable>,
}

impl Batch {
    pub fn from_messages(queued: Vec<Message>) -> Self {
        let mut batch = Batch {
            messages: Vec::with_capacity(queued.len()),
            transferables: Vec::new(),
        };
        for message in queued {
            batch.messages.push(WireMessage {
                kind: message.kind,
                payload: message.payload,
                transfers: message.transferables.len(),
            });
            batch.transferables.extend(message.transferables);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Splits the batch back into per-message inbound units, in order.
    pub fn into_inbound(self) -> Vec<Inbound> {
        let mut transferables = self.transferables.into_iter();
        self.messages
            .into_iter()
            .map(|wire| {
                let owned: Vec<Transferable> = transferables.by_ref().take(wire.transfers).collect();
                Inbound::new(wire.kind, wire.payload, owned)
            })
            .collect()
    }
}

/// A received message handed to a handler.
#[derive(Debug)]
pub struct Inbound {
    pub kind: MessageKind,
    pub return_id: Option<String>,
    pub payload: JsonValue,
    transferables: Vec<Option<Transferable>>,
}

impl Inbound {
    pub fn new(kind: MessageKind, payload: JsonValue, transferables: Vec<Transferable>) -> Self {
        let return_id = payload
            .get("return_id")
            .and_then(JsonValue::as_str)
            .filter(|raw| !raw.is_empty())
            .map(str::to_owned);
        Self {
            kind,
            return_id,
            payload,
            transferables: transferables.into_iter().map(Some).collect(),
        }
    }

    pub fn transferable_count(&self) -> usize {
        self.transferables.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn parse<P: DeserializeOwned>(&self) -> Result<P, PayloadError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| PayloadError::Decode {
            kind: self.kind,
            source,
        })
    }

    /// Moves the transferable at `index` out of the message.
    pub fn take_transferable(&mut self, index: usize) -> Result<Transferable, PayloadError> {
        self.transferables
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(PayloadError::MissingTransferable {
                kind: self.kind,
                index,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceHandoff {
    pub width: u32,
    pub height: u32,
    pub top: f64,
    pub left: f64,
    pub pixel_ratio: f64,
    #[serde(default)]
    pub options: JsonValue,
    /// Transferable index of the surface.
    pub canvas: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: f64,
}

/// Generic event payload: a type plus flattened detail fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_id: Option<String>,
    #[serde(flatten)]
    pub detail: JsonMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    #[serde(rename = "type")]
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementCreate {
    #[serde(rename = "type")]
    pub element_type: String,
    pub id: ProxyId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementCall {
    pub id: ProxyId,
    pub call: String,
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementParamSet {
    pub id: ProxyId,
    pub param: String,
    pub arg: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSubscription {
    pub id: ProxyId,
    #[serde(rename = "type")]
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementPropUpdate {
    pub return_id: ProxyId,
    pub param: String,
    pub arg: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCreate {
    pub return_id: ProxyId,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub return_id: ProxyId,
    /// Transferable index of the pixel buffer.
    pub buffer: usize,
    pub ready_state: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectCreate {
    pub proxy_id: ProxyId,
    #[serde(rename = "type")]
    pub object_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDestroy {
    pub proxy_id: ProxyId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMatrix {
    pub proxy_id: ProxyId,
    pub matrix_world: Transform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectParamSet {
    pub proxy_id: ProxyId,
    pub param: String,
    pub arg: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectCall {
    pub proxy_id: ProxyId,
    pub call: String,
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBufferLoad {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBufferSet {
    pub proxy_id: ProxyId,
    pub buffer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSourceSet {
    pub proxy_id: ProxyId,
    pub source_id: ProxyId,
}
