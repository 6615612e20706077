//! Rendering core for glowmarch: a live ReSTIR-GI viewer for raymarched
//! SDF scenes.
//!
//! Each frame runs a two-pass kernel pipeline over a ping-pong pair of HDR
//! history textures, then presents through a static blit:
//!
//! ```text
//!   host (editor / CLI)
//!          │ commands: shader text, params, capture, record, pointer
//!          ▼
//!   Renderer::render_frame ──▶ Integrator pass ──▶ history[dest]
//!          │                        ▲ reads history[source] (prev frame)
//!          │                        ▼
//!          ├──────────────▶ Display pass ──▶ resolve target ──▶ blit ──▶ surface
//!          │
//!          └─▶ swap slots, advance accumulation, service capture/record
//! ```
//!
//! The integrator estimates one-bounce indirect lighting with streaming
//! weighted reservoirs reused across time and screen-space neighbors; the
//! display pass recomputes direct lighting, denoises the young history, and
//! tonemaps. Shader edits arrive debounced through [`Renderer::set_shader_source`]
//! and leave the previous pipelines running until a replacement validates.

mod camera;
mod compile;
mod gpu;
mod record;
pub mod reservoir;
mod runtime;
mod scheduler;
mod types;

use std::mem;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use params::{ParamSet, UniformLayout};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::{PhysicalPosition, PhysicalSize};

use crate::gpu::context::GpuContext;
use crate::gpu::pipeline::{BlitPipeline, PipelineSet};
use crate::gpu::resources::ResourceManager;

pub use crate::camera::{OrbitCamera, PointerState};
pub use crate::compile::{
    default_params, Diagnostic, KernelSource, Severity, SourceDebouncer, DEBOUNCE_QUIET,
    DEFAULT_SCENE,
};
pub use crate::record::{RecordTimeline, CAPTURE_DIMS, RECORD_DIMS};
pub use crate::runtime::{FixedStepTimeSource, SystemTimeSource, TimeSample, TimeSource};
pub use crate::scheduler::{
    FrameState, ResetReason, AUDIO_OFFSET, HEADER_SIZE, UNIFORM_CAPACITY,
};
pub use crate::types::{
    CameraMotion, CaptureFormat, CaptureRequest, DebugMode, ErrorKind, ErrorReport, NullHost,
    RenderHost, RendererConfig, VideoConfig, FLAG_ABERRATION, FLAG_GRAIN, FLAG_VIGNETTE,
};

use crate::compile::KernelSource as Kernel;
use crate::record::RecordSession;
use crate::scheduler::{HeaderUniforms, UniformBlock};
use crate::types::CameraMotion as Motion;

/// Failure modes of one frame tick.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("GPU device lost: {0}")]
    DeviceLost(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The rendering core. Owns every GPU resource and all frame state; the
/// host drives it through the command methods and one `render_frame` call
/// per display refresh.
pub struct Renderer {
    context: GpuContext,
    resources: ResourceManager,
    blit: BlitPipeline,
    blit_bind_group: wgpu::BindGroup,
    pipelines: PipelineSet,

    scene_source: String,
    debouncer: SourceDebouncer,
    params: ParamSet,
    layout: UniformLayout,
    uniform_block: UniformBlock,

    camera: OrbitCamera,
    pointer: PointerState,
    frame: FrameState,
    clock: SystemTimeSource,
    debug_mode: DebugMode,
    audio_level: f32,

    window_size: (u32, u32),
    output_dir: PathBuf,
    capture: Option<CaptureRequest>,
    record: Option<RecordSession>,

    host: Box<dyn RenderHost>,
    compile_error_active: bool,
    fatal: bool,
}

impl Renderer {
    /// Builds the renderer against a window-like surface target.
    ///
    /// The initial scene source must compile; later edits may fail freely
    /// and leave the previous pipelines active.
    pub fn new<T>(target: &T, config: RendererConfig, host: Box<dyn RenderHost>) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let window_size = (config.surface_size.0.max(1), config.surface_size.1.max(1));
        let context = GpuContext::new(target, PhysicalSize::new(window_size.0, window_size.1))?;
        let resources = ResourceManager::new(
            &context.device,
            &context.queue,
            window_size,
            config.noise_seed,
        );
        let blit = BlitPipeline::new(&context.device, context.surface_format)?;
        let blit_bind_group = blit.bind_group(&context.device, resources.resolve_view());

        let layout = UniformLayout::pack(&config.params.params, HEADER_SIZE, AUDIO_OFFSET)
            .map_err(|err| anyhow!("initial parameter set does not fit: {err}"))?;
        let source = Kernel::assemble(&config.scene_source, &config.params, &layout);
        source.validate().map_err(|diags| {
            let first = diags
                .first()
                .map(|d| d.message.clone())
                .unwrap_or_else(|| "unknown error".into());
            anyhow!("initial shader failed to compile: {first}")
        })?;
        let pipelines = PipelineSet::build(&context.device, &source.wgsl, &resources.bind_group_layout)
            .context("failed to build initial pipelines")?;

        Ok(Self {
            context,
            resources,
            blit,
            blit_bind_group,
            pipelines,
            scene_source: config.scene_source,
            debouncer: SourceDebouncer::new(),
            params: config.params,
            layout,
            uniform_block: UniformBlock::new(),
            camera: OrbitCamera::new(),
            pointer: PointerState::default(),
            frame: FrameState::default(),
            clock: SystemTimeSource::new(),
            debug_mode: DebugMode::Final,
            audio_level: 0.0,
            window_size,
            output_dir: config.output_dir,
            capture: None,
            record: None,
            host,
            compile_error_active: false,
            fatal: false,
        })
    }

    // ---- host-to-core commands -------------------------------------------

    /// Queues edited scene source; recompilation happens once the edit
    /// survives the quiet window.
    pub fn set_shader_source(&mut self, text: String) {
        self.debouncer.push(text, Instant::now());
    }

    /// Replaces the parameter set. Pure value updates take effect at the
    /// next uniform pack without touching accumulation; a shape change
    /// (keys or kinds) repacks the layout and recompiles immediately.
    pub fn set_parameters(&mut self, set: ParamSet) -> Result<(), params::LayoutError> {
        if set.same_shape(&self.params) {
            self.params = set;
            return Ok(());
        }

        let layout = UniformLayout::pack(&set.params, HEADER_SIZE, AUDIO_OFFSET)?;
        let source = Kernel::assemble(&self.scene_source, &set, &layout);
        match source.validate() {
            Err(diags) => {
                self.report_compile_errors(&diags);
            }
            Ok(()) => {
                match PipelineSet::build(
                    &self.context.device,
                    &source.wgsl,
                    &self.resources.bind_group_layout,
                ) {
                    Ok(pipelines) => {
                        self.pipelines = pipelines;
                        self.params = set;
                        self.layout = layout;
                        self.frame.reset(ResetReason::Recompile);
                        self.clear_compile_error();
                        tracing::info!("parameter shape changed; kernels rebuilt");
                    }
                    Err(err) => {
                        self.compile_error_active = true;
                        self.host
                            .on_error(&ErrorReport::new(ErrorKind::Validation, err.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Requests a one-shot high-resolution still; serviced after the next
    /// submitted frame. Ignored while a recording pins the output size.
    pub fn capture(&mut self, quality: f32) {
        if self.record.is_some() {
            tracing::warn!("capture ignored while recording is active");
            return;
        }
        self.capture = Some(CaptureRequest::from_quality(quality));
    }

    /// Starts a video export job; fails if one is already running or the
    /// encoder cannot be spawned.
    pub fn start_recording(&mut self, config: VideoConfig) -> Result<()> {
        if self.record.is_some() {
            anyhow::bail!("recording already in progress");
        }
        self.capture = None;
        let session = RecordSession::start(&self.output_dir, config)?;
        self.host
            .on_record_progress(true, session.timeline.time_left());
        self.record = Some(session);
        Ok(())
    }

    /// Stops the active recording, flushing everything encoded so far.
    pub fn stop_recording(&mut self) {
        self.finish_recording();
    }

    pub fn is_recording(&self) -> bool {
        self.record.is_some()
    }

    /// Replaces the user media texture once the bytes decode; the frame loop
    /// keeps rendering with the previous texture until then.
    pub fn load_texture(&mut self, bytes: Vec<u8>) {
        self.resources.request_media_load(bytes);
    }

    pub fn set_debug_mode(&mut self, index: u32) {
        self.debug_mode = DebugMode::from_index(index);
    }

    /// Stores the externally measured audio level written to the reserved
    /// uniform slot.
    pub fn set_audio_level(&mut self, level: f32) {
        self.audio_level = level.clamp(0.0, 1.0);
    }

    pub fn pointer_moved(&mut self, position: PhysicalPosition<f64>) {
        if let Some((dx, dy)) = self.pointer.cursor_moved(position) {
            self.camera.rotate(dx, dy);
        }
    }

    pub fn pointer_button(&mut self, pressed: bool) {
        self.pointer.set_pressed(pressed);
    }

    pub fn wheel(&mut self, steps: f32) {
        self.camera.zoom(steps);
    }

    /// Adopts a new window size; history follows at the next frame tick.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.window_size = (new_size.width, new_size.height);
        self.context.resize(new_size);
    }

    pub fn frame_index(&self) -> u32 {
        self.frame.frame_index
    }

    // ---- frame loop -------------------------------------------------------

    /// Runs one full frame tick: service async results and pending edits,
    /// pack uniforms, encode integrator and display passes, submit, swap the
    /// history roles, then service capture/record against the frame just
    /// composited.
    pub fn render_frame(&mut self) -> Result<(), FrameError> {
        if self.fatal {
            return Err(FrameError::DeviceLost("device previously lost".into()));
        }
        for report in self.context.drain_device_errors() {
            self.host.on_error(&report);
            if report.kind == ErrorKind::Runtime {
                self.fatal = true;
                return Err(FrameError::DeviceLost(report.message));
            }
        }

        self.resources.poll_media(&self.context.device, &self.context.queue);
        if let Some(text) = self.debouncer.poll(Instant::now()) {
            self.recompile(text);
        }

        // Resolve this frame's render size: recording and capture pin it.
        let dims = if self.record.is_some() {
            RECORD_DIMS
        } else if self.capture.is_some() {
            CAPTURE_DIMS
        } else {
            self.window_size
        };
        if self.resources.resize(&self.context.device, dims) {
            self.frame.reset(ResetReason::Resize);
            self.blit_bind_group = self
                .blit
                .bind_group(&self.context.device, self.resources.resolve_view());
        }
        if self.camera.take_moved() {
            self.frame.reset(ResetReason::CameraMoved);
        }

        // Scripted orbit motion rides the deterministic timeline and keeps
        // its accumulated history.
        if let Some(session) = self.record.as_ref() {
            if let Motion::Orbit { degrees_per_second } = session.config.motion {
                self.camera
                    .orbit_advance(degrees_per_second.to_radians() / session.config.fps);
            }
        }

        let timeline_sample = self.record.as_mut().map(|s| s.timeline.next_sample());
        let sample = match timeline_sample {
            Some(Some(sample)) => sample,
            Some(None) => {
                // Timeline exhausted before encoding; close out the session.
                self.finish_recording();
                self.clock.sample()
            }
            None => self.clock.sample(),
        };
        self.frame.begin_frame(sample);

        let (width, height) = self.resources.dims();
        let flags = self
            .record
            .as_ref()
            .map(|s| s.config.flags())
            .unwrap_or(FLAG_GRAIN | FLAG_VIGNETTE | FLAG_ABERRATION);
        let header = HeaderUniforms::new(
            width,
            height,
            self.camera.eye(),
            self.camera.distance(),
            self.camera.target(),
            self.pointer.as_uniform(height as f32),
            &self.frame,
            self.debug_mode,
            flags,
        );
        let bytes = self
            .uniform_block
            .fill(&header, &self.params, &self.layout, self.audio_level);
        self.resources.write_uniforms(&self.context.queue, bytes);

        // Capture frames render offscreen only; the previous swapchain image
        // simply stays on screen for one tick.
        let surface_frame = if self.capture.is_some() {
            None
        } else {
            Some(self.context.surface.get_current_texture()?)
        };

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("frame encoder"),
                });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("integrator pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.resources.history_dest_view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.integrator);
            pass.set_bind_group(0, self.resources.integrator_bind_group(), &[]);
            pass.draw(0..3, 0..1);
        }
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("display pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.resources.resolve_view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.display);
            pass.set_bind_group(0, self.resources.display_bind_group(), &[]);
            pass.draw(0..3, 0..1);
        }
        let surface_view = surface_frame
            .as_ref()
            .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        if let Some(view) = &surface_view {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.blit.pipeline);
            pass.set_bind_group(0, &self.blit_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        if let Some(frame) = surface_frame {
            frame.present();
        }

        self.resources.swap_history();
        self.frame.advance();

        self.service_capture(width, height);
        self.service_record();
        Ok(())
    }

    // ---- internals --------------------------------------------------------

    fn service_capture(&mut self, width: u32, height: u32) {
        let Some(request) = self.capture.take() else {
            return;
        };
        match self
            .resources
            .read_resolve_target(&self.context.device, &self.context.queue)
        {
            Ok(pixels) => {
                let path = record::capture_path(&self.output_dir, request.format);
                if let Err(err) =
                    record::encode_still(&path, width, height, pixels, request.format)
                {
                    tracing::error!(error = %err, "failed to encode still capture");
                }
            }
            Err(err) => tracing::error!(error = %err, "capture readback failed"),
        }
        // Next tick drops back to the window size, which resets accumulation.
    }

    fn service_record(&mut self) {
        if self.record.is_none() {
            return;
        }
        let readback = self
            .resources
            .read_resolve_target(&self.context.device, &self.context.queue);
        let write_result = readback.and_then(|pixels| {
            self.record
                .as_mut()
                .expect("record session checked above")
                .encoder
                .write_frame(&pixels)
        });
        match write_result {
            Ok(()) => {
                let (finished, time_left) = {
                    let session = self.record.as_ref().expect("record session checked above");
                    (session.timeline.finished(), session.timeline.time_left())
                };
                self.host.on_record_progress(true, time_left);
                if finished {
                    self.finish_recording();
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "recording frame failed; stopping session");
                self.finish_recording();
            }
        }
    }

    /// Finalizes any active recording; encoded chunks up to this point are
    /// kept and flushed into the output file.
    fn finish_recording(&mut self) {
        let Some(session) = self.record.take() else {
            return;
        };
        match session.encoder.finish() {
            Ok(path) => tracing::info!(path = %path.display(), "recording complete"),
            Err(err) => tracing::error!(error = %err, "failed to finalize recording"),
        }
        self.host.on_record_progress(false, 0.0);
    }

    fn recompile(&mut self, text: String) {
        let source = Kernel::assemble(&text, &self.params, &self.layout);
        match source.validate() {
            Err(diags) => {
                self.report_compile_errors(&diags);
                tracing::warn!(
                    errors = diags.len(),
                    "shader compile failed; previous pipelines stay active"
                );
            }
            Ok(()) => {
                match PipelineSet::build(
                    &self.context.device,
                    &source.wgsl,
                    &self.resources.bind_group_layout,
                ) {
                    Ok(pipelines) => {
                        self.pipelines = pipelines;
                        self.scene_source = text;
                        self.frame.reset(ResetReason::Recompile);
                        self.clear_compile_error();
                        tracing::info!("kernel recompiled");
                    }
                    Err(err) => {
                        self.compile_error_active = true;
                        self.host
                            .on_error(&ErrorReport::new(ErrorKind::Validation, err.to_string()));
                    }
                }
            }
        }
    }

    fn report_compile_errors(&mut self, diags: &[Diagnostic]) {
        self.compile_error_active = true;
        for diag in diags {
            self.host.on_error(&ErrorReport {
                kind: ErrorKind::Compilation,
                message: diag.message.clone(),
                line: diag.line,
                column: diag.column,
            });
        }
    }

    fn clear_compile_error(&mut self) {
        if mem::take(&mut self.compile_error_active) {
            self.host.on_clear_error();
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // A recording interrupted by teardown still flushes what it has.
        self.finish_recording();
    }
}
