//! Frame bookkeeping and per-frame uniform packing.
//!
//! The scheduler owns the accumulation counter and the CPU-side image of the
//! uniform block. The block has a fixed capacity split into three regions: a
//! fixed header, the dynamically packed parameter region, and a reserved
//! trailing slot for the audio level. The parameter packer receives the
//! reserved slot's offset as its hard limit, so a parameter set that would
//! collide with the tail is rejected before anything is written.

use bytemuck::{Pod, Zeroable};
use params::{ParamSet, UniformLayout};

use crate::runtime::TimeSample;
use crate::types::DebugMode;

/// Fixed size of the uniform block in bytes.
pub const UNIFORM_CAPACITY: u32 = 1024;
/// Bytes occupied by the fixed header at the front of the block.
pub const HEADER_SIZE: u32 = 96;
/// Byte offset of the reserved trailing audio slot.
pub const AUDIO_OFFSET: u32 = UNIFORM_CAPACITY - 16;

/// Why the accumulation counter was forced back to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// Render dimensions changed; old history has the wrong size.
    Resize,
    /// A recompiled kernel may assign new meaning to accumulated history.
    Recompile,
    /// The camera-to-world mapping changed.
    CameraMoved,
}

/// Mutable per-frame state owned by the frame scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameState {
    /// Accumulation counter; zero means "no usable history".
    pub frame_index: u32,
    /// Elapsed time of the frame being encoded, in seconds.
    pub elapsed: f32,
    /// Seconds since the previous frame.
    pub delta: f32,
}

impl FrameState {
    /// Adopts this frame's time sample before uniforms are packed.
    pub fn begin_frame(&mut self, sample: TimeSample) {
        self.elapsed = sample.seconds;
        self.delta = sample.delta;
    }

    /// Advances the accumulation counter after a successful submit.
    pub fn advance(&mut self) {
        self.frame_index = self.frame_index.saturating_add(1);
    }

    /// Forces the accumulation counter back to zero.
    pub fn reset(&mut self, reason: ResetReason) {
        if self.frame_index != 0 {
            tracing::debug!(?reason, from = self.frame_index, "accumulation reset");
        }
        self.frame_index = 0;
    }
}

/// CPU mirror of the fixed uniform header.
///
/// Layout must match the header the prelude generator emits; both sides pad
/// the trailing scalars out to 96 bytes.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub struct HeaderUniforms {
    /// Render width, height, and their reciprocals.
    pub resolution: [f32; 4],
    /// Camera eye position; `w` carries the orbit distance.
    pub eye: [f32; 4],
    /// Orbit target; `w` carries the aspect ratio.
    pub target: [f32; 4],
    /// Pointer hover position and button state.
    pub pointer: [f32; 4],
    pub time: f32,
    pub delta: f32,
    pub frame: u32,
    pub debug_mode: u32,
    pub flags: u32,
    pub _pad: [f32; 3],
}

unsafe impl Zeroable for HeaderUniforms {}
unsafe impl Pod for HeaderUniforms {}

impl HeaderUniforms {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        eye: [f32; 3],
        distance: f32,
        target: [f32; 3],
        pointer: [f32; 4],
        frame: &FrameState,
        debug_mode: DebugMode,
        flags: u32,
    ) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self {
            resolution: [w, h, 1.0 / w, 1.0 / h],
            eye: [eye[0], eye[1], eye[2], distance],
            target: [target[0], target[1], target[2], w / h],
            pointer,
            time: frame.elapsed,
            delta: frame.delta,
            frame: frame.frame_index,
            debug_mode: debug_mode.index(),
            flags,
            _pad: [0.0; 3],
        }
    }
}

/// Reusable CPU image of the whole uniform block.
pub struct UniformBlock {
    bytes: Box<[u8]>,
}

impl Default for UniformBlock {
    fn default() -> Self {
        Self {
            bytes: vec![0u8; UNIFORM_CAPACITY as usize].into_boxed_slice(),
        }
    }
}

impl UniformBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites header, parameter region, and reserved audio slot.
    pub fn fill(
        &mut self,
        header: &HeaderUniforms,
        params: &ParamSet,
        layout: &UniformLayout,
        audio_level: f32,
    ) -> &[u8] {
        self.bytes[..HEADER_SIZE as usize].copy_from_slice(bytemuck::bytes_of(header));
        params.write_packed(layout, &mut self.bytes);
        let audio = AUDIO_OFFSET as usize;
        self.bytes[audio..audio + 4].copy_from_slice(&audio_level.to_le_bytes());
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use params::ShaderParameter;

    fn frame_at(index: u32) -> FrameState {
        FrameState {
            frame_index: index,
            elapsed: 1.5,
            delta: 0.016,
        }
    }

    fn header() -> HeaderUniforms {
        HeaderUniforms::new(
            1280,
            720,
            [3.0, 2.0, 1.0],
            9.0,
            [0.0, 1.0, 0.0],
            [0.0; 4],
            &frame_at(7),
            DebugMode::Final,
            0,
        )
    }

    #[test]
    fn header_occupies_exactly_the_fixed_region() {
        assert_eq!(std::mem::size_of::<HeaderUniforms>(), HEADER_SIZE as usize);
    }

    #[test]
    fn reset_reasons_zero_the_counter() {
        for reason in [
            ResetReason::Resize,
            ResetReason::Recompile,
            ResetReason::CameraMoved,
        ] {
            let mut frame = frame_at(42);
            frame.reset(reason);
            assert_eq!(frame.frame_index, 0);
        }
    }

    #[test]
    fn advance_counts_monotonically() {
        let mut frame = FrameState::default();
        frame.advance();
        frame.advance();
        frame.advance();
        assert_eq!(frame.frame_index, 3);
    }

    #[test]
    fn block_places_header_params_and_audio() {
        let params = ParamSet::new(vec![ShaderParameter::float("glow", 0.75, 0.0, 1.0, 0.01)]);
        let layout =
            UniformLayout::pack(&params.params, HEADER_SIZE, AUDIO_OFFSET).unwrap();

        let mut block = UniformBlock::new();
        let bytes = block.fill(&header(), &params, &layout, 0.25);

        assert_eq!(bytes.len(), UNIFORM_CAPACITY as usize);
        // resolution.x at the very front of the header
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1280.0);
        // first parameter directly after the header
        let off = HEADER_SIZE as usize;
        assert_eq!(
            f32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()),
            0.75
        );
        // audio level pinned to the reserved tail
        let audio = AUDIO_OFFSET as usize;
        assert_eq!(
            f32::from_le_bytes(bytes[audio..audio + 4].try_into().unwrap()),
            0.25
        );
    }

    #[test]
    fn parameter_value_changes_do_not_touch_the_counter() {
        let mut params = ParamSet::new(vec![ShaderParameter::float("glow", 0.2, 0.0, 1.0, 0.01)]);
        let layout =
            UniformLayout::pack(&params.params, HEADER_SIZE, AUDIO_OFFSET).unwrap();

        let mut frame = frame_at(9);
        let mut block = UniformBlock::new();
        block.fill(&header(), &params, &layout, 0.0);

        if let params::ParamValue::Float { value, .. } = &mut params.params[0].value {
            *value = 0.9;
        }
        block.fill(&header(), &params, &layout, 0.0);
        frame.advance();
        assert_eq!(frame.frame_index, 10);
    }

    #[test]
    fn oversized_parameter_sets_are_rejected_before_packing() {
        let params: Vec<_> = (0..70)
            .map(|i| ShaderParameter::color(format!("c{i}"), 0.0, 0.0, 0.0))
            .collect();
        let err = UniformLayout::pack(&params, HEADER_SIZE, AUDIO_OFFSET).unwrap_err();
        assert!(matches!(err, params::LayoutError::Overflow { .. }));
    }
}
