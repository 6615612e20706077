use std::path::PathBuf;

use params::ParamSet;

/// Selects what the display kernel writes to the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// Full composite: direct + indirect, tonemapped and post-processed.
    #[default]
    Final,
    /// Surface albedo at the primary hit.
    Albedo,
    /// World-space normal remapped to colors.
    Normal,
    /// Direct lighting only.
    Direct,
    /// Accumulated indirect radiance only.
    Indirect,
    /// Reservoir sample-count heatmap.
    Heatmap,
}

impl DebugMode {
    /// Maps the host's numeric selector onto a mode; out-of-range values
    /// fall back to the final composite.
    pub fn from_index(index: u32) -> Self {
        match index {
            1 => DebugMode::Albedo,
            2 => DebugMode::Normal,
            3 => DebugMode::Direct,
            4 => DebugMode::Indirect,
            5 => DebugMode::Heatmap,
            _ => DebugMode::Final,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            DebugMode::Final => 0,
            DebugMode::Albedo => 1,
            DebugMode::Normal => 2,
            DebugMode::Direct => 3,
            DebugMode::Indirect => 4,
            DebugMode::Heatmap => 5,
        }
    }
}

/// Post-process toggle bits carried in the uniform flags word.
pub const FLAG_GRAIN: u32 = 1 << 0;
pub const FLAG_VIGNETTE: u32 = 1 << 1;
pub const FLAG_ABERRATION: u32 = 1 << 2;

/// Error classes surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad shader source; the previous pipelines stay active.
    Compilation,
    /// Malformed pipeline or resource description; non-fatal.
    Validation,
    /// Device loss; the session cannot recover and must be reinitialized.
    Runtime,
}

/// One error delivered through [`RenderHost::on_error`].
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            column: None,
        }
    }
}

/// Callback contract between the rendering core and its host.
///
/// The host (editor window, CLI, test harness) implements this to receive
/// compile failures, the all-clear after a subsequent success, and recording
/// progress. Calls arrive from the frame loop, never concurrently.
pub trait RenderHost {
    fn on_error(&self, report: &ErrorReport);
    fn on_clear_error(&self);
    fn on_record_progress(&self, is_recording: bool, time_left: f32);
}

/// Host that ignores every callback; useful for tests and headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl RenderHost for NullHost {
    fn on_error(&self, _report: &ErrorReport) {}
    fn on_clear_error(&self) {}
    fn on_record_progress(&self, _is_recording: bool, _time_left: f32) {}
}

/// Camera behavior along a recording timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraMotion {
    /// Keep the rig exactly where the user left it.
    Locked,
    /// Advance the orbit yaw at a fixed angular rate.
    Orbit { degrees_per_second: f32 },
}

impl Default for CameraMotion {
    fn default() -> Self {
        Self::Locked
    }
}

/// Parameters of one video export job; consumed once per job.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
    pub duration_secs: f32,
    pub fps: f32,
    pub bitrate_kbps: u32,
    pub motion: CameraMotion,
    pub grain: bool,
    pub vignette: bool,
    pub aberration: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5.0,
            fps: 30.0,
            bitrate_kbps: 12_000,
            motion: CameraMotion::default(),
            grain: true,
            vignette: true,
            aberration: true,
        }
    }
}

impl VideoConfig {
    /// Uniform flags word encoding the post-process toggles.
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.grain {
            flags |= FLAG_GRAIN;
        }
        if self.vignette {
            flags |= FLAG_VIGNETTE;
        }
        if self.aberration {
            flags |= FLAG_ABERRATION;
        }
        flags
    }
}

/// Output encoding of a one-shot still capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureFormat {
    Png,
    /// JPEG with the given quality in `1..=100`.
    Jpeg(u8),
}

/// One-shot request for a high-resolution still export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub format: CaptureFormat,
}

impl CaptureRequest {
    /// Maps the host's `0.0..=1.0` quality knob onto an output format:
    /// anything at or near the top becomes lossless PNG.
    pub fn from_quality(quality: f32) -> Self {
        let format = if quality >= 0.995 {
            CaptureFormat::Png
        } else {
            let q = (quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8;
            CaptureFormat::Jpeg(q)
        };
        Self { format }
    }
}

/// Immutable configuration passed to the renderer at start-up.
pub struct RendererConfig {
    /// Window surface size in physical pixels.
    pub surface_size: (u32, u32),
    /// Initial scene shader source text.
    pub scene_source: String,
    /// Initial parameter set; the host may replace it later.
    pub params: ParamSet,
    /// Directory receiving capture and recording files.
    pub output_dir: PathBuf,
    /// Seed for the procedural noise texture.
    pub noise_seed: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            surface_size: (1280, 720),
            scene_source: crate::compile::DEFAULT_SCENE.to_string(),
            params: crate::compile::default_params(),
            output_dir: PathBuf::from("."),
            noise_seed: 0x5eed_cafe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_mode_round_trips_and_clamps() {
        for index in 0..=5 {
            assert_eq!(DebugMode::from_index(index).index(), index);
        }
        assert_eq!(DebugMode::from_index(17), DebugMode::Final);
    }

    #[test]
    fn video_flags_reflect_toggles() {
        let all = VideoConfig::default();
        assert_eq!(all.flags(), FLAG_GRAIN | FLAG_VIGNETTE | FLAG_ABERRATION);

        let bare = VideoConfig {
            grain: false,
            vignette: false,
            aberration: false,
            ..VideoConfig::default()
        };
        assert_eq!(bare.flags(), 0);
    }

    #[test]
    fn capture_quality_selects_format() {
        assert_eq!(
            CaptureRequest::from_quality(1.0).format,
            CaptureFormat::Png
        );
        assert_eq!(
            CaptureRequest::from_quality(0.8).format,
            CaptureFormat::Jpeg(80)
        );
    }
}
