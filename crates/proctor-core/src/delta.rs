//! Frame-to-frame delta tracking.
//!
//! A still face produces near-identical landmark positions across
//! consecutive frames; talking or shifting in the seat shows
//! up as landmark displacement. A [`DeltaTracker`] keeps exactly one previous
//! snapshot of a signal and reports the Euclidean (L2) norm of the
//! element-wise difference between it and the current frame.
//!
//! Two instantiations are used by the graph:
//!
//! - **activity**: the full landmark set as an N×3 matrix ([`ActivityTracker`]);
//! - **movement**: a single landmark reduced to one 3D point ([`MovementTracker`]).
//!
//! # First frame
//!
//! A fresh tracker has nothing to compare against. The first call returns
//! `0.0` and seeds the previous snapshot with the current one.

use ndarray::Array2;
use thiserror::Error;

use crate::landmarks::{LandmarkError, LandmarkSet};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeltaError {
    #[error("snapshot shape changed between frames: expected {expected} landmarks, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Landmark(#[from] LandmarkError),
}

/// A value a [`DeltaTracker`] can compare against its predecessor.
pub trait Snapshot: Clone {
    /// Number of landmarks the snapshot covers.
    fn shape(&self) -> usize;

    /// L2 norm of `self - previous` over all coordinates, flattened.
    /// Only called when both shapes agree.
    fn distance(&self, previous: &Self) -> f64;
}

impl Snapshot for Array2<f64> {
    fn shape(&self) -> usize {
        self.nrows()
    }

    fn distance(&self, previous: &Self) -> f64 {
        (self - previous).mapv(|d| d * d).sum().sqrt()
    }
}

impl Snapshot for [f64; 3] {
    fn shape(&self) -> usize {
        1
    }

    fn distance(&self, previous: &Self) -> f64 {
        self.iter()
            .zip(previous)
            .map(|(c, p)| (c - p) * (c - p))
            .sum::<f64>()
            .sqrt()
    }
}

/// Holds the previous snapshot of one signal stream.
///
/// Single owner, single slot: the snapshot is replaced on every call and no
/// history is kept.
#[derive(Debug, Clone)]
pub struct DeltaTracker<S> {
    previous: Option<S>,
}

/// Activity over the whole landmark set.
pub type ActivityTracker = DeltaTracker<Array2<f64>>;

/// Movement of one reference landmark.
pub type MovementTracker = DeltaTracker<[f64; 3]>;

impl<S: Snapshot> Default for DeltaTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Snapshot> DeltaTracker<S> {
    pub fn new() -> Self {
        Self { previous: None }
    }

    /// Compare `current` against the previous snapshot, then store it.
    ///
    /// A shape change between frames is reported as `ShapeMismatch`. The
    /// tracker is re-seeded with `current` in that case so the stream
    /// recovers on the next frame instead of failing forever.
    pub fn update(&mut self, current: S) -> Result<f64, DeltaError> {
        let Some(previous) = self.previous.as_ref() else {
            self.previous = Some(current);
            return Ok(0.0);
        };

        if previous.shape() != current.shape() {
            let err = DeltaError::ShapeMismatch {
                expected: previous.shape(),
                actual: current.shape(),
            };
            self.previous = Some(current);
            return Err(err);
        }

        let delta = current.distance(previous);
        self.previous = Some(current);
        Ok(delta)
    }

    /// Forget the previous snapshot; the next call behaves like the first.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.previous.is_some()
    }
}

impl ActivityTracker {
    /// Activity delta for a full landmark set.
    pub fn update_landmarks(&mut self, landmarks: &LandmarkSet) -> Result<f64, DeltaError> {
        self.update(landmarks.to_array())
    }
}

impl MovementTracker {
    /// Movement delta of the landmark at `index`.
    pub fn update_landmark(
        &mut self,
        landmarks: &LandmarkSet,
        index: usize,
    ) -> Result<f64, DeltaError> {
        let p = landmarks.get(index)?;
        self.update([f64::from(p.x), f64::from(p.y), f64::from(p.z)])
    }
}
