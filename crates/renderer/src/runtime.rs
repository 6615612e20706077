//! Time sources feeding the per-frame uniforms.
//!
//! Interactive rendering runs off the monotonic system clock; video export
//! runs off a fixed-step timeline derived from the frame counter so the
//! exported motion matches the nominal duration regardless of how fast the
//! GPU actually renders.

use std::time::Instant;

/// Snapshot of the time state supplied to the shader uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Seconds since the previous sample.
    pub delta: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(seconds: f32, delta: f32, frame_index: u64) -> Self {
        Self {
            seconds,
            delta,
            frame_index,
        }
    }
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    last: Instant,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            origin: now,
            last: now,
            frame: 0,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn sample(&mut self) -> TimeSample {
        let now = Instant::now();
        if self.frame == 0 {
            self.origin = now;
            self.last = now;
        }
        let seconds = now.duration_since(self.origin).as_secs_f32();
        let delta = now.duration_since(self.last).as_secs_f32();
        self.last = now;
        let sample = TimeSample::new(seconds, delta, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Deterministic time source advancing `1 / fps` seconds per sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedStepTimeSource {
    fps: f32,
    frame: u64,
}

impl FixedStepTimeSource {
    /// `fps` must be positive; the caller validates before construction.
    pub fn new(fps: f32) -> Self {
        debug_assert!(fps > 0.0);
        Self { fps, frame: 0 }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

impl TimeSource for FixedStepTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let seconds = self.frame as f32 / self.fps;
        let sample = TimeSample::new(seconds, 1.0 / self.fps, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_step_advances_by_frame_over_fps() {
        let mut source = FixedStepTimeSource::new(30.0);
        let first = source.sample();
        assert_eq!(first.seconds, 0.0);
        assert_eq!(first.frame_index, 0);

        let second = source.sample();
        assert!((second.seconds - 1.0 / 30.0).abs() < 1e-6);
        assert!((second.delta - 1.0 / 30.0).abs() < 1e-6);
        assert_eq!(second.frame_index, 1);
    }

    #[test]
    fn fixed_step_reset_rewinds_the_timeline() {
        let mut source = FixedStepTimeSource::new(24.0);
        source.sample();
        source.sample();
        source.reset();
        assert_eq!(source.sample().seconds, 0.0);
    }

    #[test]
    fn system_source_starts_at_zero() {
        let mut source = SystemTimeSource::new();
        let first = source.sample();
        assert_eq!(first.frame_index, 0);
        assert!(first.seconds < 0.1);
    }
}
