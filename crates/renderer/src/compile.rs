//! Kernel assembly, validation, and edit debouncing.
//!
//! The user edits only the scene portion of the shader (SDF map, materials,
//! light, sky). Each compile assembles one WGSL module from four parts:
//!
//! ```text
//!   generated prelude   uniform struct from the packed layout, bindings,
//!                       tuning constants from renderer::reservoir
//!   scene source        user-editable, hot-reloaded
//!   common stage        raymarch / RNG / lighting / reservoir helpers
//!   integrator+display  the two fragment kernels sharing the module
//! ```
//!
//! Validation runs through naga's WGSL frontend before any pipeline is
//! built, so a broken edit costs nothing on the GPU side and diagnostics can
//! be mapped back into the scene source the user actually sees.

use std::time::{Duration, Instant};

use params::{ParamSet, ShaderParameter, UniformLayout};
use wgpu::naga;

use crate::reservoir;
use crate::scheduler::AUDIO_OFFSET;

/// Scene source compiled when the host supplies none.
pub const DEFAULT_SCENE: &str = include_str!("shaders/scene_default.wgsl");

pub(crate) const COMMON_STAGE: &str = include_str!("shaders/common.wgsl");
pub(crate) const INTEGRATE_STAGE: &str = include_str!("shaders/integrate.wgsl");
pub(crate) const DISPLAY_STAGE: &str = include_str!("shaders/display.wgsl");

/// Quiet window an edit must survive before triggering a recompile.
pub const DEBOUNCE_QUIET: Duration = Duration::from_millis(500);

/// Parameters referenced by [`DEFAULT_SCENE`].
pub fn default_params() -> ParamSet {
    ParamSet::new(vec![
        ShaderParameter::float("light_strength", 14.0, 0.0, 40.0, 0.5),
        ShaderParameter::color("sky_tint", 0.45, 0.62, 0.85),
        ShaderParameter::color("floor_tint", 0.75, 0.70, 0.65),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One compile finding surfaced to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// 1-based line inside the scene source, when the finding maps there.
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// A fully assembled WGSL module plus the scene's line span inside it.
#[derive(Debug, Clone)]
pub struct KernelSource {
    pub wgsl: String,
    scene_start_line: u32,
    scene_end_line: u32,
}

impl KernelSource {
    /// Assembles the module for `scene` against the given packed layout.
    pub fn assemble(scene: &str, params: &ParamSet, layout: &UniformLayout) -> Self {
        let prelude = build_prelude(params, layout);
        let prelude = prelude.trim_end();
        let scene = scene.trim_end();
        let prelude_lines = prelude.lines().count() as u32;
        let scene_lines = scene.lines().count().max(1) as u32;

        let wgsl = [
            prelude,
            scene,
            COMMON_STAGE.trim_end(),
            INTEGRATE_STAGE.trim_end(),
            DISPLAY_STAGE.trim_end(),
        ]
        .join("\n");

        Self {
            wgsl,
            scene_start_line: prelude_lines + 1,
            scene_end_line: prelude_lines + scene_lines,
        }
    }

    /// Parses and validates the module without touching the GPU.
    pub fn validate(&self) -> Result<(), Vec<Diagnostic>> {
        let module = match naga::front::wgsl::parse_str(&self.wgsl) {
            Ok(module) => module,
            Err(err) => {
                let location = err.location(&self.wgsl);
                return Err(vec![self.diagnostic(err.message().to_string(), location)]);
            }
        };

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        );
        if let Err(err) = validator.validate(&module) {
            let location = err
                .spans()
                .next()
                .map(|(span, _)| span.location(&self.wgsl));
            let message = err.as_inner().to_string();
            return Err(vec![self.diagnostic(message, location)]);
        }

        Ok(())
    }

    fn diagnostic(
        &self,
        message: String,
        location: Option<naga::SourceLocation>,
    ) -> Diagnostic {
        match location {
            Some(loc)
                if loc.line_number >= self.scene_start_line
                    && loc.line_number <= self.scene_end_line =>
            {
                Diagnostic {
                    severity: Severity::Error,
                    message,
                    line: Some(loc.line_number - self.scene_start_line + 1),
                    column: Some(loc.line_position),
                }
            }
            Some(loc) => Diagnostic {
                severity: Severity::Error,
                message: format!("(module line {}) {}", loc.line_number, message),
                line: None,
                column: None,
            },
            None => Diagnostic {
                severity: Severity::Error,
                message,
                line: None,
                column: None,
            },
        }
    }
}

fn build_prelude(params: &ParamSet, layout: &UniformLayout) -> String {
    let param_fields = layout.wgsl_fields(&params.params, AUDIO_OFFSET);
    format!(
        r"struct Uniforms {{
    resolution: vec4<f32>,
    eye: vec4<f32>,
    target: vec4<f32>,
    pointer: vec4<f32>,
    time: f32,
    delta: f32,
    frame: u32,
    debug_mode: u32,
    flags: u32,
    _h0: f32,
    _h1: f32,
    _h2: f32,
{param_fields}}}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(0) @binding(1) var history_tex: texture_2d<f32>;
@group(0) @binding(2) var history_samp: sampler;
@group(0) @binding(3) var media_tex: texture_2d<f32>;
@group(0) @binding(4) var noise_tex: texture_2d<f32>;

struct Material {{
    albedo: vec3<f32>,
    roughness: f32,
    metallic: f32,
}}

const CANDIDATE_CLAMP: f32 = {candidate_clamp:?};
const TEMPORAL_M_CLAMP: f32 = {temporal_m:?};
const SPATIAL_M_CLAMP: f32 = {spatial_m:?};
const SPATIAL_TAPS: u32 = {spatial_taps}u;
const SPATIAL_RADIUS: f32 = {spatial_radius:?};
const SIMILARITY_THRESHOLD: f32 = {similarity:?};
const CLAMP_RATIO: f32 = {clamp_ratio:?};
const W_SUM_FLOOR: f32 = {w_floor:?};
const DEGENERATE_EPS: f32 = {degenerate:?};
const RADIANCE_CEILING: f32 = {ceiling:?};
const WARMUP_FRAMES: u32 = {warmup}u;
",
        candidate_clamp = reservoir::CANDIDATE_CLAMP,
        temporal_m = reservoir::TEMPORAL_M_CLAMP,
        spatial_m = reservoir::SPATIAL_M_CLAMP,
        spatial_taps = reservoir::SPATIAL_TAPS,
        spatial_radius = reservoir::SPATIAL_RADIUS,
        similarity = reservoir::SIMILARITY_THRESHOLD,
        clamp_ratio = reservoir::CLAMP_RATIO,
        w_floor = reservoir::W_SUM_FLOOR,
        degenerate = reservoir::DEGENERATE_EPS,
        ceiling = reservoir::RADIANCE_CEILING,
        warmup = reservoir::WARMUP_FRAMES,
    )
}

/// Pending-edit slot implementing the debounce contract.
///
/// The newest text always wins; a poll succeeds only once the quiet window
/// has elapsed since the last push. The scheduler polls every tick, so no
/// cancellable timer is needed.
#[derive(Default)]
pub struct SourceDebouncer {
    pending: Option<PendingEdit>,
}

struct PendingEdit {
    text: String,
    deadline: Instant,
}

impl SourceDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending edit and restarts the quiet window.
    pub fn push(&mut self, text: String, now: Instant) {
        self.pending = Some(PendingEdit {
            text,
            deadline: now + DEBOUNCE_QUIET,
        });
    }

    /// Returns the settled text once the quiet window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        if self
            .pending
            .as_ref()
            .is_some_and(|edit| now >= edit.deadline)
        {
            self.pending.take().map(|edit| edit.text)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembled(scene: &str) -> KernelSource {
        let params = default_params();
        let layout = UniformLayout::pack(
            &params.params,
            crate::scheduler::HEADER_SIZE,
            AUDIO_OFFSET,
        )
        .unwrap();
        KernelSource::assemble(scene, &params, &layout)
    }

    #[test]
    fn default_scene_validates() {
        let source = assembled(DEFAULT_SCENE);
        if let Err(diags) = source.validate() {
            panic!("default scene failed to validate: {diags:?}");
        }
    }

    #[test]
    fn prelude_declares_parameters_and_reserved_tail() {
        let source = assembled(DEFAULT_SCENE);
        assert!(source.wgsl.contains("light_strength: f32,"));
        assert!(source.wgsl.contains("sky_tint: vec4<f32>,"));
        assert!(source.wgsl.contains("audio: vec4<f32>,"));
        assert!(source.wgsl.contains("const CLAMP_RATIO: f32 = 15.0;"));
        assert!(source.wgsl.contains("const SPATIAL_TAPS: u32 = 6u;"));
    }

    #[test]
    fn parse_errors_map_into_scene_lines() {
        let broken = "fn scene_map(p: vec3<f32>) -> vec2<f32> {\n    return oops(;\n}";
        let source = assembled(broken);
        let diags = source.validate().unwrap_err();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].line, Some(2));
        assert!(diags[0].column.is_some());
    }

    #[test]
    fn missing_scene_hooks_fail_validation() {
        let source = assembled("fn unrelated() -> f32 { return 1.0; }");
        assert!(source.validate().is_err());
    }

    #[test]
    fn debounce_coalesces_rapid_edits() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut debouncer = SourceDebouncer::new();
        let mut recompiles = Vec::new();

        debouncer.push("a".into(), t0);
        debouncer.push("b".into(), t0 + ms(100));
        debouncer.push("c".into(), t0 + ms(200));
        debouncer.push("d".into(), t0 + ms(480));

        for tick in [300, 500, 700, 979] {
            assert!(debouncer.poll(t0 + ms(tick)).is_none());
        }
        if let Some(text) = debouncer.poll(t0 + ms(980)) {
            recompiles.push(text);
        }
        assert_eq!(recompiles, vec!["d".to_string()]);
        assert!(debouncer.poll(t0 + ms(2000)).is_none());
        assert!(!debouncer.is_pending());
    }
}
