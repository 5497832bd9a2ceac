//! The worker context: receives the surface and hosts the proxies.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::channel::ChannelEndpoint;
use crate::events::{Event, Listener};
use crate::protocol::{MessageKind, SurfaceHandoff, Tick};
use crate::proxy::{DocumentElement, ElementError, ElementKind};
use crate::queue::MessageQueue;
use crate::surface::OffscreenSurface;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub right: f64,
    pub bottom: f64,
}

/// What the worker knows about the window its surface is displayed in.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMetrics {
    pub width: u32,
    pub height: u32,
    pub top: f64,
    pub left: f64,
    pub pixel_ratio: f64,
    pub options: JsonValue,
}

impl Default for WindowMetrics {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            top: 0.0,
            left: 0.0,
            pixel_ratio: 1.0,
            options: JsonValue::Null,
        }
    }
}

impl WindowMetrics {
    pub fn client_width(&self) -> u32 {
        self.width
    }

    pub fn client_height(&self) -> u32 {
        self.height
    }

    pub fn inner_width(&self) -> u32 {
        self.width
    }

    pub fn inner_height(&self) -> u32 {
        self.height
    }

    pub fn bounding_client_rect(&self) -> Rect {
        let width = f64::from(self.width);
        let height = f64::from(self.height);
        Rect {
            left: self.left,
            top: self.top,
            width,
            height,
            right: self.left + width,
            bottom: self.top + height,
        }
    }
}

type SurfaceReady = Box<dyn FnOnce(Box<dyn OffscreenSurface>, WorkerHandle)>;

/// Worker-side handle of a session.
#[derive(Clone)]
pub struct WorkerHandle {
    queue: MessageQueue,
    metrics: Rc<RefCell<WindowMetrics>>,
    ready: Rc<Cell<bool>>,
}

/// Sets up the worker end. `on_surface_ready` runs once, when the surface
/// handoff arrives, and receives ownership of the surface.
pub fn receive_session(
    endpoint: ChannelEndpoint,
    on_surface_ready: impl FnOnce(Box<dyn OffscreenSurface>, WorkerHandle) + 'static,
) -> WorkerHandle {
    let handle = WorkerHandle {
        queue: MessageQueue::new(endpoint),
        metrics: Rc::new(RefCell::new(WindowMetrics::default())),
        ready: Rc::new(Cell::new(false)),
    };

    let on_surface_ready: SurfaceReady = Box::new(on_surface_ready);
    let pending = RefCell::new(Some(on_surface_ready));
    let metrics = Rc::clone(&handle.metrics);
    let ready = Rc::clone(&handle.ready);
    handle
        .queue
        .handlers()
        .set(MessageKind::SurfaceHandoff, move |queue, mut inbound| {
            let Some(on_surface_ready) = pending.borrow_mut().take() else {
                warn!(target: "worker", "ignoring repeated surface handoff");
                return;
            };
            let handoff = match inbound.parse::<SurfaceHandoff>() {
                Ok(handoff) => handoff,
                Err(err) => {
                    warn!(target: "worker", error = %err, "discarding surface handoff");
                    *pending.borrow_mut() = Some(on_surface_ready);
                    return;
                }
            };
            let surface = match inbound.take_transferable(handoff.canvas).map(|t| t.into_surface()) {
                Ok(Some(surface)) => surface,
                Ok(None) | Err(_) => {
                    warn!(target: "worker", "surface handoff carried no surface");
                    *pending.borrow_mut() = Some(on_surface_ready);
                    return;
                }
            };

            *metrics.borrow_mut() = WindowMetrics {
                width: handoff.width,
                height: handoff.height,
                top: handoff.top,
                left: handoff.left,
                pixel_ratio: handoff.pixel_ratio,
                options: handoff.options,
            };
            ready.set(true);
            info!(target: "worker", width = handoff.width, height = handoff.height, "received surface");

            let handle = WorkerHandle {
                queue: queue.clone(),
                metrics: Rc::clone(&metrics),
                ready: Rc::clone(&ready),
            };
            on_surface_ready(surface, handle);
        });

    handle
        .queue
        .handlers()
        .set(MessageKind::Tick, |queue, inbound| match inbound.parse::<Tick>() {
            Ok(tick) => {
                queue.dispatch_event(Event::new("tick").with("time", tick.time));
            }
            Err(err) => warn!(target: "worker", error = %err, "discarding tick"),
        });

    let resize = {
        let metrics = Rc::clone(&handle.metrics);
        Listener::new(move |event: &Event| {
            let mut metrics = metrics.borrow_mut();
            if let Some(width) = event.get_f64("width") {
                metrics.width = width as u32;
            }
            if let Some(height) = event.get_f64("height") {
                metrics.height = height as u32;
            }
        })
    };
    handle.queue.add_event_listener("resize", &resize);

    handle
}

impl WorkerHandle {
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn flush(&self) -> usize {
        self.queue.flush()
    }

    pub fn pump(&self) -> usize {
        self.queue.pump()
    }

    /// True once the surface handoff has been processed.
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    pub fn window(&self) -> WindowMetrics {
        self.metrics.borrow().clone()
    }

    pub fn document(&self) -> Document {
        Document {
            queue: self.queue.clone(),
        }
    }

    pub fn add_event_listener(&self, event_type: &str, listener: &Listener) {
        self.queue.add_event_listener(event_type, listener);
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.queue.remove_event_listener(event_type, listener);
    }
}

/// Document-like facade over the session queue.
#[derive(Clone)]
pub struct Document {
    queue: MessageQueue,
}

impl Document {
    pub fn create_element(&self, tag: &str) -> Result<DocumentElement, ElementError> {
        let kind =
            ElementKind::parse(tag).ok_or_else(|| ElementError::UnsupportedType(tag.to_string()))?;
        Ok(DocumentElement::new(&self.queue, kind))
    }

    pub fn add_event_listener(&self, event_type: &str, listener: &Listener) {
        self.queue.add_event_listener(event_type, listener);
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.queue.remove_event_listener(event_type, listener);
    }
}
