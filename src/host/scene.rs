use std::collections::HashMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::protocol::{ProxyId, Transform};

/// Controlling-side copy of a scene node created by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowNode {
    pub object_type: String,
    pub matrix_world: Transform,
    /// Set whenever a new world transform arrives; cleared by
    /// [`ShadowScene::take_dirty`].
    pub dirty: bool,
    pub params: JsonMap<String, JsonValue>,
    pub audio_buffer: Option<String>,
    pub media_source: Option<ProxyId>,
}

impl ShadowNode {
    fn new(object_type: String) -> Self {
        Self {
            object_type,
            matrix_world: Transform::IDENTITY,
            dirty: false,
            params: JsonMap::new(),
            audio_buffer: None,
            media_source: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ShadowScene {
    nodes: HashMap<ProxyId, ShadowNode>,
    audio_listener: Option<ProxyId>,
}

impl ShadowScene {
    /// Returns false if a node with this id already exists.
    pub fn create(&mut self, id: ProxyId, object_type: &str) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        if object_type == "AudioListener" {
            self.audio_listener = Some(id);
        }
        self.nodes.insert(id, ShadowNode::new(object_type.to_string()));
        true
    }

    pub fn destroy(&mut self, id: ProxyId) -> Option<ShadowNode> {
        if self.audio_listener == Some(id) {
            self.audio_listener = None;
        }
        self.nodes.remove(&id)
    }

    pub fn get(&self, id: ProxyId) -> Option<&ShadowNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: ProxyId) -> Option<&mut ShadowNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: ProxyId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn apply_matrix(&mut self, id: ProxyId, matrix_world: Transform) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.matrix_world = matrix_world;
                node.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn set_param(&mut self, id: ProxyId, param: String, arg: JsonValue) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.params.insert(param, arg);
                true
            }
            None => false,
        }
    }

    /// The most recently created audio listener node, if it is still alive.
    pub fn audio_listener(&self) -> Option<ProxyId> {
        self.audio_listener
    }

    /// Ids whose transform changed since the last call.
    pub fn take_dirty(&mut self) -> Vec<ProxyId> {
        let mut dirty = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            if node.dirty {
                node.dirty = false;
                dirty.push(*id);
            }
        }
        dirty
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProxyId> + '_ {
        self.nodes.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_marks_node_dirty_until_taken() {
        let mut scene = ShadowScene::default();
        let id = ProxyId::generate();
        assert!(scene.create(id, "Mesh"));
        assert!(!scene.create(id, "Mesh"));

        assert!(scene.apply_matrix(id, Transform::from_translation(0.0, 1.0, 0.0)));
        assert_eq!(scene.take_dirty(), vec![id]);
        assert!(scene.take_dirty().is_empty());
        assert_eq!(scene.get(id).unwrap().matrix_world.translation(), [0.0, 1.0, 0.0]);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut scene = ShadowScene::default();
        let id = ProxyId::generate();
        assert!(!scene.apply_matrix(id, Transform::IDENTITY));
        assert!(!scene.set_param(id, "visible".into(), JsonValue::Bool(true)));
        assert!(scene.destroy(id).is_none());
    }

    #[test]
    fn tracks_audio_listener() {
        let mut scene = ShadowScene::default();
        let id = ProxyId::generate();
        scene.create(id, "AudioListener");
        assert_eq!(scene.audio_listener(), Some(id));
        scene.destroy(id);
        assert_eq!(scene.audio_listener(), None);
    }
}
