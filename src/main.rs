use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use scenebridge::driver::{run_context, run_context_with};
use scenebridge::{
    create_session, pair, receive_session, AudioListenerProxy, AudioLoaderProxy, ChannelEndpoint,
    DocumentElement, ElementKind, Event, Listener, OffscreenSurface, PixelSurface,
    PositionalAudioProxy, SessionConfig, SessionOptions, Transform, VideoFrameInput,
};
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;

const RUN_FOR: Duration = Duration::from_secs(2);
const SURFACE_SIZE: (u32, u32) = (640, 360);
const VIDEO_SIZE: (u32, u32) = (16, 9);

/// Everything the worker side keeps alive once the surface has arrived.
struct WorkerScene {
    surface: Box<dyn OffscreenSurface>,
    video: DocumentElement,
    _listener: AudioListenerProxy,
    emitter: PositionalAudioProxy,
}

fn main() -> Result<()> {
    let config = SessionConfig::from_env().unwrap_or_else(|err| {
        eprintln!("Failed to load session configuration: {err}. Using defaults.");
        SessionConfig::default()
    });

    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_target(true)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let (host_end, worker_end) = pair();
    let worker_config = config.clone();
    let worker = thread::Builder::new()
        .name("scenebridge-worker".into())
        .spawn(move || run_worker(worker_end, &worker_config))
        .context("failed to spawn worker thread")?;

    run_host(host_end, &config)?;

    worker
        .join()
        .map_err(|_| anyhow!("worker thread panicked"))??;
    Ok(())
}

fn run_host(endpoint: ChannelEndpoint, config: &SessionConfig) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to build host runtime")?;
    let _guard = rt.enter();

    let handle = create_session(
        endpoint,
        Box::new(PixelSurface::new(SURFACE_SIZE.0, SURFACE_SIZE.1)),
        SessionOptions {
            pixel_ratio: config.pixel_ratio,
            ..SessionOptions::default()
        },
    );
    let receiver = handle
        .queue()
        .take_receiver()
        .context("host receiver already taken")?;

    let started = Instant::now();
    let mut frame_index: u8 = 0;
    let ticker = handle.clone();
    let stats = rt.block_on(run_context_with(
        handle.queue().clone(),
        receiver,
        config,
        tokio::time::sleep(RUN_FOR),
        move |_| {
            ticker.tick(started.elapsed().as_secs_f64() * 1000.0);
            frame_index = frame_index.wrapping_add(1);
            let videos = ticker.media().elements_of_kind(ElementKind::Video);
            for id in videos {
                let (width, height) = VIDEO_SIZE;
                ticker.push_video_frame(
                    id,
                    VideoFrameInput {
                        width,
                        height,
                        pixels: vec![frame_index; (4 * width * height) as usize],
                        ready_state: 4,
                    },
                );
            }
        },
    ))?;

    let scene = handle.scene();
    for id in scene.ids() {
        if let Some(node) = scene.get(id) {
            info!(
                target: "host",
                %id,
                object_type = %node.object_type,
                translation = ?node.matrix_world.translation(),
                "final node state"
            );
        }
    }
    info!(target: "host", ?stats, nodes = scene.len(), "host finished");
    Ok(())
}

fn run_worker(endpoint: ChannelEndpoint, config: &SessionConfig) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to build worker runtime")?;

    let scene: Rc<RefCell<Option<WorkerScene>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&scene);
    let handle = receive_session(endpoint, move |surface, handle| {
        let (width, height) = surface.size();
        info!(target: "worker", width, height, "surface ready");

        let document = handle.document();
        let video = match document.create_element("video") {
            Ok(video) => video,
            Err(err) => {
                warn!(target: "worker", error = %err, "could not create video element");
                return;
            }
        };
        video.set_property("src", "demo://stream");
        if let Err(err) = video.play() {
            warn!(target: "worker", error = %err, "video play failed");
        }
        video.request_video_frame_callback(|state| {
            trace!(target: "worker", ready_state = state.ready_state, len = state.pixels.len(), "video frame");
        });

        let listener = AudioListenerProxy::new(handle.queue());
        let emitter = PositionalAudioProxy::new(handle.queue());
        emitter.set_volume(0.8);
        emitter.set_loop(true);
        {
            let emitter = emitter.clone();
            AudioLoaderProxy::new(handle.queue()).load("demo://ambience.ogg", move |buffer| {
                info!(target: "worker", %buffer, "audio buffer ready");
                emitter.set_buffer(&buffer);
                emitter.play();
            });
        }

        *slot.borrow_mut() = Some(WorkerScene {
            surface,
            video,
            _listener: listener,
            emitter,
        });
    });

    let on_tick = {
        let scene: Weak<RefCell<Option<WorkerScene>>> = Rc::downgrade(&scene);
        Listener::new(move |event: &Event| {
            let Some(scene) = scene.upgrade() else {
                return;
            };
            let mut scene = scene.borrow_mut();
            let Some(scene) = scene.as_mut() else {
                return;
            };
            let seconds = event.get_f64("time").unwrap_or_default() / 1000.0;
            let angle = seconds as f32;
            scene
                .emitter
                .set_world_transform(Transform::from_translation(angle.cos() * 3.0, 0.0, angle.sin() * 3.0));

            let shade = scene.video.with_video(|video| video.pixels.first().copied().unwrap_or(0));
            if let Some(pixels) = scene.surface.as_any_mut().downcast_mut::<PixelSurface>() {
                pixels.clear([shade, shade, shade, 255]);
            }
        })
    };
    handle.add_event_listener("tick", &on_tick);

    let receiver = handle
        .queue()
        .take_receiver()
        .context("worker receiver already taken")?;
    let stats = rt.block_on(run_context(
        handle.queue().clone(),
        receiver,
        config,
        std::future::pending(),
    ))?;

    let window = handle.window();
    info!(
        target: "worker",
        ?stats,
        width = window.inner_width(),
        height = window.inner_height(),
        "worker finished"
    );
    scene.borrow_mut().take();
    Ok(())
}
