//! Perspective camera and the damped orbit navigation controller. The
//! controller mirrors the web viewer it replaces: damping factor 0.05 per
//! frame step, zoom distance clamped to [1, 10] world units.

use glam::{Mat4, Vec3};

pub const DEFAULT_FOV_DEGREES: f32 = 75.0;
pub const DEFAULT_NEAR: f32 = 0.1;
pub const DEFAULT_FAR: f32 = 1000.0;

pub const ORBIT_DAMPING: f32 = 0.05;
pub const ORBIT_MIN_DISTANCE: f32 = 1.0;
pub const ORBIT_MAX_DISTANCE: f32 = 10.0;

/// Camera distance that frames a model of the given maximum extent, with a
/// 1.5x margin so the silhouette does not touch the viewport edges.
pub fn framing_distance(fov_y_degrees: f32, max_dimension: f32) -> f32 {
    let half_fov = fov_y_degrees.to_radians() * 0.5;
    max_dimension / (2.0 * half_fov.tan()) * 1.5
}

#[derive(Debug, Clone)]
pub struct PerspectiveCamera {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    aspect: f32,
}

impl PerspectiveCamera {
    pub fn new(fov_y_degrees: f32) -> Self {
        Self {
            fov_y_degrees,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
            aspect: 1.0,
        }
    }

    /// Recompute the aspect ratio for a resized surface. A zero-sized surface
    /// is skipped (the previous projection stays in effect), so a minimized
    /// container never produces a degenerate matrix.
    pub fn set_viewport(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        self.aspect = width as f32 / height as f32;
        true
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            self.aspect,
            self.near,
            self.far,
        )
    }
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self::new(DEFAULT_FOV_DEGREES)
    }
}

/// Damped orbit around a target point. Pointer deltas accumulate as angular
/// velocity; each frame applies `velocity * damping` and decays the velocity
/// by the same factor, matching the original controller's feel.
#[derive(Debug, Clone)]
pub struct OrbitController {
    pub target: Vec3,
    yaw: f32,
    pitch: f32,
    distance: f32,
    yaw_velocity: f32,
    pitch_velocity: f32,
    pub damping: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl OrbitController {
    pub fn new() -> Self {
        // Matches the boot pose: eye (0, 1, 2) looking at the origin.
        let offset = Vec3::new(0.0, 1.0, 2.0);
        Self {
            target: Vec3::ZERO,
            yaw: offset.x.atan2(offset.z),
            pitch: (offset.y / offset.length()).asin(),
            distance: offset.length(),
            yaw_velocity: 0.0,
            pitch_velocity: 0.0,
            damping: ORBIT_DAMPING,
            min_distance: ORBIT_MIN_DISTANCE,
            max_distance: ORBIT_MAX_DISTANCE,
        }
    }

    pub fn rotate(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw_velocity += delta_yaw;
        self.pitch_velocity += delta_pitch;
    }

    pub fn zoom(&mut self, factor: f32) {
        self.distance = (self.distance * factor).clamp(self.min_distance, self.max_distance);
    }

    /// Reframe onto a freshly installed model: new target, new distance.
    /// Residual pointer velocity is discarded.
    pub fn frame(&mut self, distance: f32, target: Vec3) {
        self.distance = distance.clamp(self.min_distance, self.max_distance);
        self.target = target;
        self.yaw_velocity = 0.0;
        self.pitch_velocity = 0.0;
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// One damping step; called once per rendered frame.
    pub fn update(&mut self) {
        self.yaw += self.yaw_velocity * self.damping;
        self.pitch += self.pitch_velocity * self.damping;
        self.yaw_velocity *= 1.0 - self.damping;
        self.pitch_velocity *= 1.0 - self.damping;

        let pitch_limit = std::f32::consts::FRAC_PI_2 - 1e-3;
        self.pitch = self.pitch.clamp(-pitch_limit, pitch_limit);
        self.distance = self.distance.clamp(self.min_distance, self.max_distance);
    }

    pub fn eye(&self) -> Vec3 {
        let direction = Vec3::new(
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.cos() * self.pitch.cos(),
        );
        self.target + direction * self.distance
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }
}

impl Default for OrbitController {
    fn default() -> Self {
        Self::new()
    }
}
