use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use notify::Watcher;
use params::ParamSet;
use renderer::{
    CameraMotion, ErrorReport, FrameError, RenderHost, Renderer, RendererConfig, VideoConfig,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::cli::{parse_size, RunArgs};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Host side of the renderer callback contract; everything lands in the log.
struct LogHost;

impl RenderHost for LogHost {
    fn on_error(&self, report: &ErrorReport) {
        match (report.line, report.column) {
            (Some(line), Some(column)) => {
                error!(kind = ?report.kind, line, column, "{}", report.message);
            }
            _ => error!(kind = ?report.kind, "{}", report.message),
        }
    }

    fn on_clear_error(&self) {
        info!("shader compiles cleanly again");
    }

    fn on_record_progress(&self, is_recording: bool, time_left: f32) {
        if is_recording {
            tracing::debug!(time_left, "recording progress");
        } else {
            info!("recording inactive");
        }
    }
}

pub fn run(args: RunArgs) -> Result<()> {
    let size = parse_size(&args.size).map_err(|msg| anyhow!(msg))?;

    let scene_source = match &args.scene {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read scene at {}", path.display()))?,
        None => renderer::DEFAULT_SCENE.to_string(),
    };
    let params = match &args.params {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read parameter file {}", path.display()))?;
            ParamSet::from_toml_str(&text)
                .with_context(|| format!("failed to parse parameter file {}", path.display()))?
        }
        None => renderer::default_params(),
    };

    let event_loop = EventLoop::new().context("failed to initialise event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("glowmarch")
            .with_inner_size(PhysicalSize::new(size.0, size.1))
            .build(&event_loop)
            .context("failed to create window")?,
    );

    let config = RendererConfig {
        surface_size: size,
        scene_source,
        params,
        output_dir: args.output.clone(),
        ..RendererConfig::default()
    };
    let mut renderer = Renderer::new(window.as_ref(), config, Box::new(LogHost))?;
    renderer.set_debug_mode(args.debug);

    if let Some(path) = &args.texture {
        match fs::read(path) {
            Ok(bytes) => renderer.load_texture(bytes),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to read media texture"),
        }
    }

    let record_template = VideoConfig {
        fps: args.record_fps,
        bitrate_kbps: args.record_bitrate,
        motion: args
            .record_orbit
            .map(|rate| CameraMotion::Orbit {
                degrees_per_second: rate,
            })
            .unwrap_or(CameraMotion::Locked),
        ..VideoConfig::default()
    };
    let exit_after_record = args.record.is_some();
    if let Some(duration) = args.record {
        renderer.start_recording(VideoConfig {
            duration_secs: duration,
            ..record_template.clone()
        })?;
    }

    let (watch_tx, watch_rx) = mpsc::channel();
    let scene_path = args.scene.clone();
    let watcher = scene_path.as_ref().and_then(|path| {
        start_scene_watcher(path.clone(), watch_tx).map_or_else(
            |err| {
                warn!(error = %err, "shader hot-reload disabled");
                None
            },
            Some,
        )
    });

    let mut debug_mode = args.debug;

    event_loop
        .run(move |event, elwt| {
            // Watcher must live as long as the loop.
            let _keep_watcher = &watcher;
            elwt.set_control_flow(ControlFlow::Wait);

            match event {
                Event::WindowEvent { window_id, event } if window_id == window.id() => {
                    match event {
                        WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                        WindowEvent::Resized(new_size) => renderer.resize(new_size),
                        WindowEvent::CursorMoved { position, .. } => {
                            renderer.pointer_moved(position);
                        }
                        WindowEvent::MouseInput { state, button, .. } => {
                            if button == MouseButton::Left {
                                renderer.pointer_button(state == ElementState::Pressed);
                            }
                        }
                        WindowEvent::MouseWheel { delta, .. } => {
                            let steps = match delta {
                                MouseScrollDelta::LineDelta(_, y) => y,
                                MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 40.0,
                            };
                            renderer.wheel(steps);
                        }
                        WindowEvent::KeyboardInput {
                            event:
                                KeyEvent {
                                    logical_key,
                                    state: ElementState::Pressed,
                                    ..
                                },
                            ..
                        } => handle_key(
                            &logical_key,
                            &mut renderer,
                            &mut debug_mode,
                            &record_template,
                            elwt,
                        ),
                        WindowEvent::RedrawRequested => {
                            drive_frame(&mut renderer, &window, exit_after_record, elwt);
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    pump_scene_edits(&watch_rx, scene_path.as_deref(), &mut renderer);
                    window.request_redraw();
                }
                _ => {}
            }
        })
        .map_err(|err| anyhow!("event loop error: {err}"))
}

fn start_scene_watcher(
    path: PathBuf,
    tx: mpsc::Sender<notify::Result<notify::Event>>,
) -> Result<notify::RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = tx.send(event);
    })
    .context("failed to create file watcher")?;
    watcher
        .watch(&path, notify::RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", path.display()))?;
    info!(path = %path.display(), "watching scene for edits");
    Ok(watcher)
}

fn pump_scene_edits(
    rx: &mpsc::Receiver<notify::Result<notify::Event>>,
    scene_path: Option<&std::path::Path>,
    renderer: &mut Renderer,
) {
    let mut changed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() => changed = true,
            Ok(_) => {}
            Err(err) => warn!(error = %err, "scene watcher error"),
        }
    }
    if !changed {
        return;
    }
    let Some(path) = scene_path else { return };
    match fs::read_to_string(path) {
        Ok(text) => renderer.set_shader_source(text),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to re-read edited scene"),
    }
}

fn handle_key(
    key: &Key,
    renderer: &mut Renderer,
    debug_mode: &mut u32,
    record_template: &VideoConfig,
    elwt: &EventLoopWindowTarget<()>,
) {
    match key {
        Key::Named(NamedKey::Escape) => elwt.exit(),
        Key::Character(text) => match text.as_str() {
            "d" | "D" => {
                *debug_mode = (*debug_mode + 1) % 6;
                renderer.set_debug_mode(*debug_mode);
                info!(mode = *debug_mode, "debug view");
            }
            "c" | "C" => renderer.capture(1.0),
            "r" | "R" => {
                if renderer.is_recording() {
                    renderer.stop_recording();
                } else if let Err(err) = renderer.start_recording(record_template.clone()) {
                    error!(error = %err, "failed to start recording");
                }
            }
            _ => {}
        },
        _ => {}
    }
}

fn drive_frame(
    renderer: &mut Renderer,
    window: &winit::window::Window,
    exit_after_record: bool,
    elwt: &EventLoopWindowTarget<()>,
) {
    match renderer.render_frame() {
        Ok(()) => {
            if exit_after_record && !renderer.is_recording() {
                info!("requested recording finished; exiting");
                elwt.exit();
            }
        }
        Err(FrameError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
            renderer.resize(window.inner_size());
        }
        Err(FrameError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
            error!("surface out of memory; exiting");
            elwt.exit();
        }
        Err(FrameError::Surface(other)) => {
            warn!(error = ?other, "surface error; retrying next frame");
        }
        Err(FrameError::DeviceLost(message)) => {
            error!(%message, "GPU device lost; the session cannot recover");
            elwt.exit();
        }
        Err(FrameError::Internal(err)) => {
            warn!(error = %err, "frame error");
        }
    }
}
