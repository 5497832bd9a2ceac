use std::collections::{HashMap, HashSet};

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::events::Subscriptions;
use crate::protocol::ProxyId;
use crate::proxy::ElementKind;

/// One decoded video frame handed to [`ControllingHandle::push_video_frame`].
///
/// [`ControllingHandle::push_video_frame`]: super::ControllingHandle::push_video_frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrameInput {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
    pub ready_state: u8,
}

/// Controlling-side record of an element the worker created.
#[derive(Debug, Clone)]
pub struct HostElement {
    pub kind: ElementKind,
    pub properties: JsonMap<String, JsonValue>,
    pub subscriptions: Subscriptions,
    /// Size last announced to the worker with a video create message.
    pub announced_size: Option<(u32, u32)>,
}

impl HostElement {
    fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            properties: JsonMap::new(),
            subscriptions: Subscriptions::default(),
            announced_size: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MediaTable {
    elements: HashMap<ProxyId, HostElement>,
    loaded_buffers: HashSet<String>,
    pending_loads: HashSet<String>,
}

impl MediaTable {
    pub fn create(&mut self, id: ProxyId, kind: ElementKind) -> bool {
        if self.elements.contains_key(&id) {
            return false;
        }
        self.elements.insert(id, HostElement::new(kind));
        true
    }

    pub fn get(&self, id: ProxyId) -> Option<&HostElement> {
        self.elements.get(&id)
    }

    pub fn get_mut(&mut self, id: ProxyId) -> Option<&mut HostElement> {
        self.elements.get_mut(&id)
    }

    pub fn contains(&self, id: ProxyId) -> bool {
        self.elements.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Ids of every element of `kind`, in no particular order.
    pub fn elements_of_kind(&self, kind: ElementKind) -> Vec<ProxyId> {
        self.elements
            .iter()
            .filter(|(_, element)| element.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_subscribed(&self, id: ProxyId, event_type: &str) -> bool {
        self.elements
            .get(&id)
            .is_some_and(|element| element.subscriptions.is_active(event_type))
    }

    pub fn begin_load(&mut self, url: &str) {
        self.pending_loads.insert(url.to_string());
    }

    /// Records a finished load. Returns false if nothing was waiting for it.
    pub fn finish_load(&mut self, url: &str) -> bool {
        if !self.pending_loads.remove(url) {
            return false;
        }
        self.loaded_buffers.insert(url.to_string());
        true
    }

    /// Forgets a load that failed, so it cannot be completed later.
    pub fn fail_load(&mut self, url: &str) -> bool {
        self.pending_loads.remove(url)
    }

    pub fn is_loaded(&self, url: &str) -> bool {
        self.loaded_buffers.contains(url)
    }

    pub fn is_pending(&self, url: &str) -> bool {
        self.pending_loads.contains(url)
    }
}
