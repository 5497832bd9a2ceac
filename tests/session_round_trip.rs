use std::cell::{Cell, RefCell};
use std::rc::Rc;

use scenebridge::protocol::{MessageKind, ObjectParamSet};
use scenebridge::{
    create_session_with_backend, pair, receive_session, AudioLoaderProxy, ControllingHandle,
    Event, HostBackend, Listener, LoadStatus, PixelSurface, PositionalAudioProxy, ProxyId,
    SceneObjectProxy, SessionOptions, Transform, WorkerHandle,
};
use serde_json::{json, Value as JsonValue};

#[derive(Clone, Default)]
struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    fn push(&self, entry: String) {
        self.0.borrow_mut().push(entry);
    }
}

struct JournalBackend(Journal);

impl HostBackend for JournalBackend {
    fn create_object(&mut self, _id: ProxyId, object_type: &str) {
        self.0.push(format!("create {object_type}"));
    }

    fn destroy_object(&mut self, _id: ProxyId) {
        self.0.push("destroy".into());
    }

    fn set_object_param(&mut self, _id: ProxyId, param: &str, arg: &JsonValue) {
        self.0.push(format!("param {param}={arg}"));
    }

    fn set_element_param(&mut self, _id: ProxyId, param: &str, arg: &JsonValue) {
        self.0.push(format!("element {param}={arg}"));
    }

    fn load_audio_buffer(&mut self, url: &str) -> LoadStatus {
        self.0.push(format!("load {url}"));
        LoadStatus::Loaded
    }

    fn set_audio_buffer(&mut self, _object: ProxyId, url: &str) {
        self.0.push(format!("buffer {url}"));
    }
}

/// Both contexts on one thread, with the surface handoff already exchanged.
fn connected() -> (ControllingHandle, WorkerHandle, Journal) {
    let (host_end, worker_end) = pair();
    let journal = Journal::default();
    let host = create_session_with_backend(
        host_end,
        Box::new(PixelSurface::new(64, 32)),
        SessionOptions::default(),
        JournalBackend(journal.clone()),
    );
    let worker = receive_session(worker_end, |_, _| {});
    host.flush();
    worker.pump();
    assert!(worker.is_ready());
    worker.flush();
    host.pump();
    (host, worker, journal)
}

fn exchange(host: &ControllingHandle, worker: &WorkerHandle) {
    worker.flush();
    host.pump();
    host.flush();
    worker.pump();
}

#[test]
fn scene_object_appears_once_and_is_removed_on_next_flush() {
    let (host, worker, journal) = connected();

    let node = SceneObjectProxy::new(worker.queue(), "node");
    node.set_world_transform(Transform::from_translation(1.0, 2.0, 3.0));
    worker.flush();
    host.pump();

    assert_eq!(host.scene().len(), 1);
    let shadow = host.scene().get(node.id()).cloned().expect("shadow node");
    assert_eq!(shadow.object_type, "node");
    assert_eq!(shadow.matrix_world.translation(), [1.0, 2.0, 3.0]);

    worker.flush();
    host.pump();
    assert_eq!(host.scene().len(), 1);

    node.remove();
    worker.flush();
    host.pump();
    assert!(host.scene().is_empty());
    assert_eq!(journal.entries(), vec!["create node", "destroy"]);
}

#[test]
fn mutations_apply_in_call_order() {
    let (host, worker, journal) = connected();
    let node = SceneObjectProxy::new(worker.queue(), "Mesh");
    for step in 0..5 {
        node.set_param("step", step);
    }
    worker.flush();
    host.pump();

    let params: Vec<String> = journal
        .entries()
        .into_iter()
        .filter(|entry| entry.starts_with("param"))
        .collect();
    assert_eq!(
        params,
        vec!["param step=0", "param step=1", "param step=2", "param step=3", "param step=4"]
    );
    assert_eq!(host.scene().get(node.id()).unwrap().params["step"], json!(4));
}

#[test]
fn messages_for_destroyed_objects_have_no_effect() {
    let (host, worker, journal) = connected();
    let node = SceneObjectProxy::new(worker.queue(), "Mesh");
    let id = node.id();
    node.remove();
    node.set_param("visible", false);
    worker.queue().outbox().post(
        MessageKind::ObjectParamSet,
        &ObjectParamSet {
            proxy_id: id,
            param: "visible".into(),
            arg: json!(true),
        },
    );
    worker.flush();
    host.pump();

    assert!(host.scene().is_empty());
    assert_eq!(journal.entries(), vec!["create Mesh", "destroy"]);
}

#[test]
fn transferred_property_written_many_times_keeps_latest() {
    let (host, worker, journal) = connected();
    let audio = worker.document().create_element("audio").unwrap();
    for src in ["one.mp3", "two.mp3", "three.mp3"] {
        audio.set_property("src", src);
    }
    worker.flush();
    host.pump();

    let element = host.media().get(audio.id()).cloned().expect("host element");
    assert_eq!(element.properties["src"], json!("three.mp3"));
    assert_eq!(
        journal.entries(),
        vec![
            "element src=\"one.mp3\"",
            "element src=\"two.mp3\"",
            "element src=\"three.mp3\""
        ]
    );
    assert_eq!(audio.property("src"), Some(json!("three.mp3")));
}

#[test]
fn add_then_remove_before_flush_leaves_no_subscription() {
    let (host, worker, _journal) = connected();
    let listener = Listener::new(|_| {});
    worker.add_event_listener("keydown", &listener);
    worker.remove_event_listener("keydown", &listener);

    let kinds = worker.queue().outbox().pending_kinds();
    assert_eq!(kinds, vec![MessageKind::AddEvent, MessageKind::RemoveEvent]);
    worker.flush();
    host.pump();

    assert!(!host.queue().peer_subscribed("keydown"));
    assert!(!host.emit_event(&Event::new("keydown").with("key", "a")));
}

#[test]
fn resize_updates_worker_window_and_listeners() {
    let (host, worker, _journal) = connected();
    let seen = Rc::new(Cell::new((0.0, 0.0)));
    let listener = {
        let seen = Rc::clone(&seen);
        Listener::new(move |event: &Event| {
            seen.set((
                event.get_f64("width").unwrap_or_default(),
                event.get_f64("height").unwrap_or_default(),
            ));
        })
    };
    worker.document().add_event_listener("resize", &listener);

    host.resize(800, 600);
    exchange(&host, &worker);

    assert_eq!(seen.get(), (800.0, 600.0));
    let window = worker.window();
    assert_eq!((window.inner_width(), window.client_height()), (800, 600));
}

#[test]
fn tick_is_dispatched_as_local_event() {
    let (host, worker, _journal) = connected();
    let time = Rc::new(Cell::new(None));
    let listener = {
        let time = Rc::clone(&time);
        Listener::new(move |event: &Event| time.set(event.get_f64("time")))
    };
    worker.add_event_listener("tick", &listener);

    host.tick(16.5);
    host.flush();
    worker.pump();
    assert_eq!(time.get(), Some(16.5));
}

#[test]
fn input_events_are_forwarded_only_while_subscribed() {
    let (host, worker, _journal) = connected();
    let keys = Rc::new(RefCell::new(Vec::new()));
    let listener = {
        let keys = Rc::clone(&keys);
        Listener::new(move |event: &Event| {
            if let Some(key) = event.get("key").and_then(JsonValue::as_str) {
                keys.borrow_mut().push(key.to_string());
            }
        })
    };
    worker.add_event_listener("keydown", &listener);
    worker.flush();
    host.pump();

    assert!(host.emit_event(&Event::new("keydown").with("key", "w")));
    host.flush();
    worker.pump();

    worker.remove_event_listener("keydown", &listener);
    worker.flush();
    host.pump();
    assert!(!host.emit_event(&Event::new("keydown").with("key", "s")));

    assert_eq!(*keys.borrow(), vec!["w".to_string()]);
}

#[test]
fn audio_loader_round_trip_sets_buffer_on_object() {
    let (host, worker, journal) = connected();
    let emitter = PositionalAudioProxy::new(worker.queue());
    let loaded = Rc::new(Cell::new(false));
    {
        let emitter = emitter.clone();
        let loaded = Rc::clone(&loaded);
        AudioLoaderProxy::new(worker.queue()).load("rain.ogg", move |buffer| {
            emitter.set_buffer(&buffer);
            emitter.play();
            loaded.set(true);
        });
    }
    exchange(&host, &worker);
    assert!(loaded.get());
    assert!(host.media().is_loaded("rain.ogg"));

    worker.flush();
    host.pump();
    let node = host.scene().get(emitter.id()).cloned().unwrap();
    assert_eq!(node.object_type, "PositionalAudio");
    assert_eq!(node.audio_buffer.as_deref(), Some("rain.ogg"));
    let entries = journal.entries();
    assert!(entries.contains(&"load rain.ogg".to_string()));
    assert!(entries.contains(&"buffer rain.ogg".to_string()));
    // The loader's one-shot listener unsubscribed itself.
    assert!(!host.queue().peer_subscribed("rain.ogg"));
}

#[test]
fn closed_peer_degrades_without_panicking() {
    let (host, worker, _journal) = connected();
    drop(host);
    let node = SceneObjectProxy::new(worker.queue(), "Mesh");
    node.set_param("visible", true);

    assert_eq!(worker.flush(), 0);
    assert!(worker.queue().is_degraded());
    assert_eq!(worker.queue().pending(), 0);
    assert_eq!(worker.pump(), 0);
}
