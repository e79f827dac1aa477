//! Per-frame signal fusion for automated exam proctoring.
//!
//! Facial landmarks come in once per video frame. From them the pipeline
//! derives head orientation, facial activity and face movement, estimates the
//! similarity transform used to crop an aligned face for the identity and
//! expression models, and finally fuses every per-frame signal into a single
//! timestamp-ordered [`ProctorResult`].
//!
//! The detection models, the crop/warp stage and on-screen rendering live
//! outside this crate; they only meet it through [`wire`] packets and the
//! [`overlay`] annotation data.

pub mod aggregator;
pub mod alignment;
pub mod delta;
pub mod geometry;
pub mod graph;
pub mod landmarks;
pub mod orientation;
pub mod overlay;
pub mod result;
pub mod sync;
pub mod wire;

pub use aggregator::{AggregateError, ResultAggregator};
pub use alignment::{AlignError, SimilarityTransformEstimator, Transform4x4};
pub use delta::{DeltaError, DeltaTracker};
pub use graph::{GraphOptions, NodeError, ProctorGraph};
pub use landmarks::{FrameSize, Landmark, LandmarkError, LandmarkSet, Timestamp};
pub use orientation::OrientationVector;
pub use result::{BlinkSignal, Classification, ExpressionKind, ProctorResult, EMBEDDING_DIM};
