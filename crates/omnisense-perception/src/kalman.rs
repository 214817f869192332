//! Constant-velocity Kalman filter in pixel space.
//!
//! State: `[px, py, vx, vy]` (pixels, pixels per cycle).
//! Observation: `[px, py]` (a detection centroid).
//!
//! Process and measurement noise are isotropic and the initial covariance is
//! diagonal, so the 4×4 problem separates exactly into two independent 2×2
//! filters, one per image axis.  Each axis runs:
//!
//! ```text
//! predict:  p ← p + v            P ← F·P·Fᵀ + q·I      F = [1 1; 0 1]
//! update:   y = z − p            S = P₀₀ + r
//!           K = [P₀₀/S, P₁₀/S]   x ← x + K·y           P ← (I − K·H)·P
//! ```

use omnisense_types::Point2;
use serde::{Deserialize, Serialize};

/// 2×2 matrix type (row-major)
type Mat2 = [[f32; 2]; 2];

/// Noise parameters shared by every track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterNoise {
    /// Diagonal of the initial state covariance.
    pub initial_covariance: f32,
    /// Measurement noise variance (px²).
    pub measurement: f32,
    /// Process noise variance added on every prediction.
    pub process: f32,
}

impl Default for FilterNoise {
    fn default() -> Self {
        Self {
            initial_covariance: 50.0,
            measurement: 1.0,
            process: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Axis {
    pos: f32,
    vel: f32,
    cov: Mat2,
}

impl Axis {
    fn new(pos: f32, p0: f32) -> Self {
        Self {
            pos,
            vel: 0.0,
            cov: [[p0, 0.0], [0.0, p0]],
        }
    }

    fn predict(&mut self, q: f32) {
        self.pos += self.vel;
        let [[a, b], [c, d]] = self.cov;
        // F·P·Fᵀ with F = [1 1; 0 1]
        self.cov = [[a + b + c + d + q, b + d], [c + d, d + q]];
    }

    fn update(&mut self, z: f32, r: f32) {
        let [[a, b], [c, d]] = self.cov;
        let s = a + r;
        let (k0, k1) = (a / s, c / s);
        let y = z - self.pos;
        self.pos += k0 * y;
        self.vel += k1 * y;
        self.cov = [[(1.0 - k0) * a, (1.0 - k0) * b], [c - k1 * a, d - k1 * b]];
    }
}

/// Position/velocity estimate of one track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantVelocityFilter {
    x: Axis,
    y: Axis,
    noise: FilterNoise,
}

impl ConstantVelocityFilter {
    /// Seed a filter at `initial` with zero velocity.
    pub fn new(initial: Point2, noise: FilterNoise) -> Self {
        Self {
            x: Axis::new(initial.x, noise.initial_covariance),
            y: Axis::new(initial.y, noise.initial_covariance),
            noise,
        }
    }

    /// Advance one cycle; returns the predicted position.
    pub fn predict(&mut self) -> Point2 {
        self.x.predict(self.noise.process);
        self.y.predict(self.noise.process);
        self.position()
    }

    /// Correct with a measured centroid.
    pub fn update(&mut self, measurement: Point2) {
        self.x.update(measurement.x, self.noise.measurement);
        self.y.update(measurement.y, self.noise.measurement);
    }

    pub fn position(&self) -> Point2 {
        Point2::new(self.x.pos, self.y.pos)
    }

    pub fn velocity(&self) -> Point2 {
        Point2::new(self.x.vel, self.y.vel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stationary_target_stays_put() {
        let mut f = ConstantVelocityFilter::new(Point2::new(100.0, 50.0), FilterNoise::default());
        for _ in 0..20 {
            f.predict();
            f.update(Point2::new(100.0, 50.0));
        }
        assert!(f.position().distance(&Point2::new(100.0, 50.0)) < 1e-3);
        assert!(f.velocity().x.abs() < 1e-3);
    }

    #[test]
    fn learns_constant_velocity() {
        let mut f = ConstantVelocityFilter::new(Point2::new(0.0, 0.0), FilterNoise::default());
        for i in 1..=30 {
            f.predict();
            f.update(Point2::new(4.0 * i as f32, -2.0 * i as f32));
        }
        let v = f.velocity();
        assert!((v.x - 4.0).abs() < 0.2, "vx = {}", v.x);
        assert!((v.y + 2.0).abs() < 0.2, "vy = {}", v.y);

        // Prediction extrapolates along the learned velocity.
        let p = f.predict();
        assert!((p.x - 124.0).abs() < 1.0, "px = {}", p.x);
    }

    #[test]
    fn first_update_trusts_measurement() {
        // P₀ = 50 against r = 1: the first correction lands almost on z.
        let mut f = ConstantVelocityFilter::new(Point2::new(0.0, 0.0), FilterNoise::default());
        f.predict();
        f.update(Point2::new(10.0, 0.0));
        assert!(f.position().x > 9.5);
    }
}
