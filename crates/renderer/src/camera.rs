//! Orbit camera and pointer tracking.
//!
//! The camera orbits a fixed look-at target on a yaw/pitch/distance rig.
//! Pointer drags rotate, the wheel zooms, and both raise a `moved` flag the
//! frame scheduler consumes to reset accumulation; reservoir history is
//! meaningless once the camera-to-world mapping changes. Scripted orbit
//! motion during recording advances the rig without raising the flag and
//! relies on the temporal history clamp to bound ghosting.

use winit::dpi::PhysicalPosition;

const ROTATE_SENSITIVITY: f32 = 0.005;
const ZOOM_SENSITIVITY: f32 = 0.1;
const PITCH_LIMIT: f32 = 1.45;
const DISTANCE_MIN: f32 = 1.5;
const DISTANCE_MAX: f32 = 30.0;

/// Yaw/pitch/distance orbit rig around a fixed target.
#[derive(Debug, Clone, Copy)]
pub struct OrbitCamera {
    yaw: f32,
    pitch: f32,
    distance: f32,
    target: [f32; 3],
    moved: bool,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            yaw: 0.6,
            pitch: 0.35,
            distance: 9.0,
            target: [0.0, 1.0, 0.0],
            moved: false,
        }
    }
}

impl OrbitCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a pointer-drag delta in physical pixels.
    pub fn rotate(&mut self, dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        self.yaw += dx * ROTATE_SENSITIVITY;
        self.pitch = (self.pitch + dy * ROTATE_SENSITIVITY).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.moved = true;
    }

    /// Applies a wheel step; positive steps zoom in.
    pub fn zoom(&mut self, steps: f32) {
        if steps == 0.0 {
            return;
        }
        self.distance =
            (self.distance * (1.0 - steps * ZOOM_SENSITIVITY)).clamp(DISTANCE_MIN, DISTANCE_MAX);
        self.moved = true;
    }

    /// Advances the yaw for a scripted recording orbit.
    ///
    /// Intentionally does not raise the moved flag: the deterministic export
    /// timeline keeps its accumulated history and relies on the temporal
    /// clamp to bound ghosting.
    pub fn orbit_advance(&mut self, radians: f32) {
        self.yaw += radians;
    }

    /// Returns and clears the movement flag.
    pub fn take_moved(&mut self) -> bool {
        std::mem::take(&mut self.moved)
    }

    /// World-space eye position derived from the rig.
    pub fn eye(&self) -> [f32; 3] {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        [
            self.target[0] + self.distance * cos_pitch * cos_yaw,
            self.target[1] + self.distance * sin_pitch,
            self.target[2] + self.distance * cos_pitch * sin_yaw,
        ]
    }

    pub fn target(&self) -> [f32; 3] {
        self.target
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }
}

/// Tracks the hover position and drag state of the primary pointer.
#[derive(Debug, Default)]
pub struct PointerState {
    position: Option<PhysicalPosition<f64>>,
    last_drag: Option<PhysicalPosition<f64>>,
    pressed: bool,
}

impl PointerState {
    /// Records the latest cursor position, returning the drag delta when the
    /// primary button is held.
    pub fn cursor_moved(&mut self, position: PhysicalPosition<f64>) -> Option<(f32, f32)> {
        let delta = if self.pressed {
            self.last_drag.map(|prev| {
                (
                    (position.x - prev.x) as f32,
                    (position.y - prev.y) as f32,
                )
            })
        } else {
            None
        };
        if self.pressed {
            self.last_drag = Some(position);
        }
        self.position = Some(position);
        delta
    }

    /// Notes a primary-button transition.
    pub fn set_pressed(&mut self, pressed: bool) {
        self.pressed = pressed;
        if pressed {
            self.last_drag = self.position;
        } else {
            self.last_drag = None;
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Packs the hover position and button state for the uniform block.
    pub fn as_uniform(&self, height: f32) -> [f32; 4] {
        let mut data = [0.0; 4];
        if let Some(pos) = self.position {
            data[0] = pos.x as f32;
            data[1] = height - pos.y as f32;
        }
        data[2] = if self.pressed { 1.0 } else { 0.0 };
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_and_zoom_raise_the_moved_flag() {
        let mut camera = OrbitCamera::new();
        assert!(!camera.take_moved());

        camera.rotate(4.0, -2.0);
        assert!(camera.take_moved());
        assert!(!camera.take_moved());

        camera.zoom(1.0);
        assert!(camera.take_moved());
    }

    #[test]
    fn scripted_orbit_does_not_raise_the_flag() {
        let mut camera = OrbitCamera::new();
        camera.orbit_advance(0.2);
        assert!(!camera.take_moved());
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = OrbitCamera::new();
        camera.rotate(0.0, 1e6);
        let eye = camera.eye();
        assert!(eye[1].is_finite());
        camera.rotate(0.0, 1e6);
        let clamped = camera.eye();
        assert!((eye[1] - clamped[1]).abs() < 1e-3);
    }

    #[test]
    fn zoom_respects_distance_bounds() {
        let mut camera = OrbitCamera::new();
        for _ in 0..100 {
            camera.zoom(1.0);
        }
        assert!(camera.distance() >= DISTANCE_MIN);
        for _ in 0..100 {
            camera.zoom(-1.0);
        }
        assert!(camera.distance() <= DISTANCE_MAX);
    }

    #[test]
    fn drag_deltas_only_report_while_pressed() {
        let mut pointer = PointerState::default();
        assert!(pointer
            .cursor_moved(PhysicalPosition::new(10.0, 10.0))
            .is_none());

        pointer.set_pressed(true);
        assert!(pointer
            .cursor_moved(PhysicalPosition::new(14.0, 13.0))
            .is_some());
        let delta = pointer
            .cursor_moved(PhysicalPosition::new(20.0, 13.0))
            .unwrap();
        assert_eq!(delta, (6.0, 0.0));

        pointer.set_pressed(false);
        assert!(pointer
            .cursor_moved(PhysicalPosition::new(30.0, 30.0))
            .is_none());
    }

    #[test]
    fn hover_uniform_flips_y() {
        let mut pointer = PointerState::default();
        pointer.cursor_moved(PhysicalPosition::new(100.0, 20.0));
        let uniform = pointer.as_uniform(1080.0);
        assert_eq!(uniform[0], 100.0);
        assert_eq!(uniform[1], 1060.0);
        assert_eq!(uniform[2], 0.0);
    }
}
