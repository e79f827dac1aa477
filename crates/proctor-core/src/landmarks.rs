//! Landmark sets, frame sizes and packet timestamps.
//!
//! Landmark indices follow the 478-point face mesh with irises. Consumers
//! address landmarks by fixed index, so a set must keep the same anatomical
//! point at the same index from frame to frame.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Nose tip; also the reference point for orientation.
pub const NOSE_TIP: usize = 1;
/// Left mouth corner.
pub const MOUTH_LEFT: usize = 61;
/// Right mouth corner.
pub const MOUTH_RIGHT: usize = 291;
/// Left iris contour, averaged into the left eye centre.
pub const LEFT_IRIS: [usize; 4] = [469, 470, 471, 472];
/// Right iris contour, averaged into the right eye centre.
pub const RIGHT_IRIS: [usize; 4] = [474, 475, 476, 477];
/// Landmark count of the mesh with iris refinement.
pub const NUM_LANDMARKS_WITH_IRISES: usize = 478;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("landmark {index} missing (set has {len} landmarks)")]
    MissingLandmark { index: usize, len: usize },
}

/// Packet timestamp in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn micros(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for FrameSize {
    type Err = String;

    /// Parse `WIDTHxHEIGHT`, e.g. `640x480`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width = w.trim().parse().map_err(|e| format!("bad width {w:?}: {e}"))?;
        let height = h.trim().parse().map_err(|e| format!("bad height {h:?}: {e}"))?;
        Ok(Self { width, height })
    }
}

/// A single detected keypoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Ordered landmarks for one face in one frame.
///
/// Coordinates are normalized to `[0, 1]` of the source image unless stated
/// otherwise by the producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    pub points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Landmark at `index`, or `MissingLandmark` on malformed input.
    pub fn get(&self, index: usize) -> Result<&Landmark, LandmarkError> {
        self.points.get(index).ok_or(LandmarkError::MissingLandmark {
            index,
            len: self.points.len(),
        })
    }

    /// Mean (x, y) over a cluster of indices.
    pub fn centroid_xy(&self, indices: &[usize]) -> Result<(f64, f64), LandmarkError> {
        let mut sx = 0.0f64;
        let mut sy = 0.0f64;
        for &i in indices {
            let p = self.get(i)?;
            sx += f64::from(p.x);
            sy += f64::from(p.y);
        }
        let n = indices.len().max(1) as f64;
        Ok((sx / n, sy / n))
    }

    /// The set as an N×3 matrix, one row per landmark.
    pub fn to_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.points.len(), 3), |(row, col)| {
            let p = &self.points[row];
            f64::from(match col {
                0 => p.x,
                1 => p.y,
                _ => p.z,
            })
        })
    }

    /// Scale normalized x/y into absolute pixels of `size`. z is left as is.
    pub fn to_pixels(&self, size: FrameSize) -> LandmarkSet {
        let (w, h) = (size.width as f32, size.height as f32);
        LandmarkSet {
            points: self
                .points
                .iter()
                .map(|p| Landmark::new(p.x * w, p.y * h, p.z))
                .collect(),
        }
    }
}

impl From<Vec<Landmark>> for LandmarkSet {
    fn from(points: Vec<Landmark>) -> Self {
        Self { points }
    }
}
