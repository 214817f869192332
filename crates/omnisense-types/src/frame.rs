//! Raw sensor frames handed to the perception layer by a `DepthSensor`.

use serde::{Deserialize, Serialize};

use crate::OmniError;

/// Pinhole intrinsics of the depth stream, used only to deproject a pixel
/// into a camera-frame 3-D point.  Calibration itself happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
}

impl Intrinsics {
    /// Deproject pixel `(u, v)` at `depth_m` metres into `[x, y, z]`.
    pub fn deproject(&self, u: f32, v: f32, depth_m: f32) -> [f32; 3] {
        [
            (u - self.ppx) / self.fx * depth_m,
            (v - self.ppy) / self.fy * depth_m,
            depth_m,
        ]
    }
}

/// A 2-D grid of raw distance samples (z16) plus the scale converting a raw
/// sample into metres.
///
/// A raw sample of `0` means "no return" and converts to `0.0` m, which every
/// consumer treats as invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    width: usize,
    height: usize,
    data: Vec<u16>,
    depth_scale: f32,
    intrinsics: Option<Intrinsics>,
}

impl DepthFrame {
    /// Build a frame from row-major raw samples.
    ///
    /// # Errors
    ///
    /// Returns [`OmniError::Serialization`] when `data.len()` does not equal
    /// `width * height`.
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<u16>,
        depth_scale: f32,
    ) -> Result<Self, OmniError> {
        if data.len() != width * height {
            return Err(OmniError::Serialization(format!(
                "depth frame has {} samples, expected {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            depth_scale,
            intrinsics: None,
        })
    }

    /// Build a frame from a per-pixel function returning metres.  Samples are
    /// quantised with `depth_scale` (1 mm for the default `0.001`).
    pub fn from_fn(
        width: usize,
        height: usize,
        depth_scale: f32,
        mut metres: impl FnMut(usize, usize) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let m = metres(x, y).max(0.0);
                data.push((m / depth_scale).round().min(u16::MAX as f32) as u16);
            }
        }
        Self {
            width,
            height,
            data,
            depth_scale,
            intrinsics: None,
        }
    }

    /// Attach stream intrinsics (builder-style).
    pub fn with_intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth_scale(&self) -> f32 {
        self.depth_scale
    }

    pub fn intrinsics(&self) -> Option<&Intrinsics> {
        self.intrinsics.as_ref()
    }

    /// Raw sample at column `x`, row `y`.  Panics when out of bounds.
    pub fn raw(&self, x: usize, y: usize) -> u16 {
        self.data[y * self.width + x]
    }

    /// Sample at column `x`, row `y` converted to metres.
    pub fn metres(&self, x: usize, y: usize) -> f32 {
        self.raw(x, y) as f32 * self.depth_scale
    }

    /// One row of raw samples.
    pub fn row(&self, y: usize) -> &[u16] {
        &self.data[y * self.width..(y + 1) * self.width]
    }
}

/// A colour image captured alongside a depth frame (RGB8, row-major).
#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

/// Everything one sensor delivered for one cycle.
#[derive(Debug, Clone)]
pub struct SensorFrame {
    pub depth: DepthFrame,
    pub color: Option<ColorFrame>,
}

impl From<DepthFrame> for SensorFrame {
    fn from(depth: DepthFrame) -> Self {
        Self { depth, color: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mismatched_length() {
        let err = DepthFrame::new(4, 4, vec![0; 15], 0.001).unwrap_err();
        assert!(err.to_string().contains("4x4"));
    }

    #[test]
    fn from_fn_quantises_to_scale() {
        let frame = DepthFrame::from_fn(3, 2, 0.001, |x, _| 0.5 + x as f32);
        assert_eq!(frame.raw(0, 0), 500);
        assert_eq!(frame.raw(2, 1), 2500);
        assert!((frame.metres(1, 1) - 1.5).abs() < 1e-6);
        assert_eq!(frame.row(1).len(), 3);
    }

    #[test]
    fn negative_metres_become_no_return() {
        let frame = DepthFrame::from_fn(1, 1, 0.001, |_, _| -3.0);
        assert_eq!(frame.raw(0, 0), 0);
    }

    #[test]
    fn deproject_centre_pixel_lies_on_axis() {
        let k = Intrinsics {
            fx: 400.0,
            fy: 400.0,
            ppx: 320.0,
            ppy: 240.0,
        };
        let p = k.deproject(320.0, 240.0, 2.0);
        assert_eq!(p, [0.0, 0.0, 2.0]);
        let q = k.deproject(520.0, 240.0, 2.0);
        assert!((q[0] - 1.0).abs() < 1e-6);
    }
}
