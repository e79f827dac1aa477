//! The per-frame processing graph.
//!
//! Landmark packets fan out to the landmark nodes (activity, movement,
//! orientation, similarity transform). Their scalar outputs go straight into
//! the [`ResultAggregator`]; the transform is handed back to the host for
//! the external crop/warp stage. Blink, embedding and expression packets come
//! from external models and enter the aggregator through [`ProctorGraph::push_signal`].
//!
//! Nodes are a closed set dispatched through [`Node`]. [`NODE_REGISTRY`] maps
//! configuration names to constructors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregator::{AggregateError, ResultAggregator};
use crate::alignment::{AlignError, SimilarityTransformEstimator, Transform4x4, REFERENCE_SIZE};
use crate::delta::{ActivityTracker, DeltaError, MovementTracker};
use crate::landmarks::{FrameSize, LandmarkError, LandmarkSet, Timestamp};
use crate::orientation::{self, OrientationVector};
use crate::result::ProctorResult;
use crate::sync::{Signal, StreamTag, DEFAULT_HORIZON};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("unknown node type {0:?}")]
    UnknownNode(String),
    #[error("node {0:?} configured twice")]
    DuplicateNode(String),
    #[error("node {0:?} is required for results to complete")]
    MissingNode(&'static str),
    #[error("delta tracker failed: {0}")]
    Delta(#[from] DeltaError),
    #[error("alignment failed: {0}")]
    Align(#[from] AlignError),
    #[error("landmark lookup failed: {0}")]
    Landmark(#[from] LandmarkError),
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
}

/// Graph configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Size of the frames the landmarks were detected on.
    pub input_size: FrameSize,
    /// Size of the aligned crop the transform targets.
    pub output_size: FrameSize,
    /// Maximum incomplete timestamps buffered by the aggregator.
    pub sync_horizon: usize,
    /// Landmark whose position feeds the movement tracker.
    pub movement_landmark: usize,
    /// Landmark nodes to instantiate, by registry name.
    pub nodes: Vec<String>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            input_size: FrameSize::new(640, 480),
            output_size: REFERENCE_SIZE,
            sync_horizon: DEFAULT_HORIZON,
            movement_landmark: 0,
            nodes: NODE_REGISTRY.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }
}

/// A landmark-consuming node.
#[derive(Debug, Clone)]
pub enum Node {
    FaceActivity(ActivityTracker),
    FaceMovement {
        tracker: MovementTracker,
        landmark: usize,
    },
    FaceOrientation,
    SimilarityTransform {
        estimator: SimilarityTransformEstimator,
        input_size: FrameSize,
        output_size: FrameSize,
    },
}

/// What a node produced for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    Activity(f64),
    Movement(f64),
    Orientation(OrientationVector),
    Transform(Transform4x4),
}

impl NodeOutput {
    /// The aggregator signal carried by this output, if any.
    pub fn into_signal(self) -> Option<Signal> {
        match self {
            NodeOutput::Activity(v) => Some(Signal::Activity(v)),
            NodeOutput::Movement(v) => Some(Signal::Movement(v)),
            NodeOutput::Orientation(v) => Some(Signal::Orientation(v)),
            NodeOutput::Transform(_) => None,
        }
    }
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::FaceActivity(_) => "face_activity",
            Node::FaceMovement { .. } => "face_movement",
            Node::FaceOrientation => "face_orientation",
            Node::SimilarityTransform { .. } => "similarity_transform",
        }
    }

    pub fn process(&mut self, landmarks: &LandmarkSet) -> Result<NodeOutput, NodeError> {
        match self {
            Node::FaceActivity(tracker) => {
                Ok(NodeOutput::Activity(tracker.update_landmarks(landmarks)?))
            }
            Node::FaceMovement { tracker, landmark } => Ok(NodeOutput::Movement(
                tracker.update_landmark(landmarks, *landmark)?,
            )),
            Node::FaceOrientation => Ok(NodeOutput::Orientation(orientation::extract(landmarks)?)),
            Node::SimilarityTransform {
                estimator,
                input_size,
                output_size,
            } => Ok(NodeOutput::Transform(estimator.estimate_from_landmarks(
                landmarks,
                *input_size,
                *output_size,
            )?)),
        }
    }
}

pub type NodeFactory = fn(&GraphOptions) -> Node;

fn face_activity(_: &GraphOptions) -> Node {
    Node::FaceActivity(ActivityTracker::new())
}

fn face_movement(options: &GraphOptions) -> Node {
    Node::FaceMovement {
        tracker: MovementTracker::new(),
        landmark: options.movement_landmark,
    }
}

fn face_orientation(_: &GraphOptions) -> Node {
    Node::FaceOrientation
}

fn similarity_transform(options: &GraphOptions) -> Node {
    Node::SimilarityTransform {
        estimator: SimilarityTransformEstimator::new(),
        input_size: options.input_size,
        output_size: options.output_size,
    }
}

/// Registry of landmark node types, by configuration name.
pub const NODE_REGISTRY: &[(&str, NodeFactory)] = &[
    ("face_activity", face_activity),
    ("face_movement", face_movement),
    ("face_orientation", face_orientation),
    ("similarity_transform", similarity_transform),
];

/// Nodes whose signals every result needs.
pub const RESULT_NODES: [&str; 3] = ["face_activity", "face_movement", "face_orientation"];

/// Instantiate a node by registry name.
pub fn create_node(name: &str, options: &GraphOptions) -> Result<Node, NodeError> {
    NODE_REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, factory)| factory(options))
        .ok_or_else(|| NodeError::UnknownNode(name.to_string()))
}

/// A node failure for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node: &'static str,
    pub error: NodeError,
}

/// Everything one input packet produced.
#[derive(Debug, Default)]
pub struct FrameOutput {
    pub timestamp: Option<Timestamp>,
    /// Crop transform for the warp stage.
    pub transform: Option<Transform4x4>,
    /// Result completed by this packet.
    pub result: Option<ProctorResult>,
    pub failures: Vec<NodeFailure>,
}

/// Landmark nodes plus the synchronising aggregator.
#[derive(Debug)]
pub struct ProctorGraph {
    options: GraphOptions,
    nodes: Vec<Node>,
    aggregator: ResultAggregator,
}

impl ProctorGraph {
    pub fn new(options: GraphOptions) -> Result<Self, NodeError> {
        let mut nodes: Vec<Node> = Vec::with_capacity(options.nodes.len());
        for name in &options.nodes {
            let node = create_node(name, &options)?;
            if nodes.iter().any(|n| n.name() == node.name()) {
                return Err(NodeError::DuplicateNode(name.clone()));
            }
            nodes.push(node);
        }
        if let Some(missing) = RESULT_NODES
            .into_iter()
            .find(|required| !nodes.iter().any(|n| n.name() == *required))
        {
            return Err(NodeError::MissingNode(missing));
        }
        tracing::info!(
            nodes = ?options.nodes,
            input = %options.input_size,
            output = %options.output_size,
            horizon = options.sync_horizon,
            "graph built"
        );
        let aggregator = ResultAggregator::new(options.sync_horizon);
        Ok(Self {
            options,
            nodes,
            aggregator,
        })
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    pub fn node_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(Node::name).collect()
    }

    /// Update the input frame size side input.
    pub fn set_input_size(&mut self, size: FrameSize) {
        self.options.input_size = size;
        for node in &mut self.nodes {
            if let Node::SimilarityTransform { input_size, .. } = node {
                *input_size = size;
            }
        }
        tracing::info!(input = %size, "input frame size updated");
    }

    /// Run every landmark node on one frame and feed the aggregator.
    ///
    /// A failing node costs only its own output for this timestamp; the
    /// aggregator then never completes it and the frame leaves a gap.
    pub fn process_landmarks(&mut self, timestamp: Timestamp, landmarks: &LandmarkSet) -> FrameOutput {
        let mut out = FrameOutput {
            timestamp: Some(timestamp),
            ..FrameOutput::default()
        };

        let mut signals = Vec::with_capacity(3);
        for node in &mut self.nodes {
            match node.process(landmarks) {
                Ok(NodeOutput::Transform(t)) => out.transform = Some(t),
                Ok(output) => signals.extend(output.into_signal()),
                Err(error) => {
                    tracing::warn!(
                        node = node.name(),
                        timestamp = timestamp.micros(),
                        error = %error,
                        "node failed"
                    );
                    out.failures.push(NodeFailure {
                        node: node.name(),
                        error,
                    });
                }
            }
        }

        for signal in signals {
            self.push_into(timestamp, signal, &mut out);
        }
        out
    }

    /// Feed an externally produced signal (blink, embedding, expressions).
    pub fn push_signal(&mut self, timestamp: Timestamp, signal: Signal) -> FrameOutput {
        let mut out = FrameOutput {
            timestamp: Some(timestamp),
            ..FrameOutput::default()
        };
        self.push_into(timestamp, signal, &mut out);
        out
    }

    fn push_into(&mut self, timestamp: Timestamp, signal: Signal, out: &mut FrameOutput) {
        let stream = signal.stream();
        match self.aggregator.push(timestamp, signal) {
            Ok(Some(result)) => out.result = Some(result),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    stream = %stream,
                    timestamp = timestamp.micros(),
                    error = %e,
                    "aggregation failed"
                );
                out.failures.push(NodeFailure {
                    node: "proctor_result",
                    error: e.into(),
                });
            }
        }
    }

    /// Close one external input stream.
    pub fn close(&mut self, stream: StreamTag) -> usize {
        self.aggregator.close(stream)
    }

    /// Close every input stream; returns the number of partial timestamps dropped.
    pub fn close_all(&mut self) -> usize {
        let dropped = self.aggregator.close_all();
        tracing::info!(
            emitted = self.aggregator.emitted(),
            discarded = self.aggregator.discarded(),
            "graph closed"
        );
        dropped
    }

    pub fn is_finished(&self) -> bool {
        self.aggregator.is_finished()
    }

    pub fn emitted(&self) -> u64 {
        self.aggregator.emitted()
    }

    pub fn discarded(&self) -> u64 {
        self.aggregator.discarded()
    }
}
