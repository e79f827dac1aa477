//! Signal records fed to the aggregator and the fused per-frame result.

use serde::{Deserialize, Serialize};

use crate::landmarks::Timestamp;

/// Length of the face re-identification embedding.
pub const EMBEDDING_DIM: usize = 128;

/// Maximum number of ranked expressions carried in a result.
pub const MAX_EXPRESSIONS: usize = 8;

/// Eye openness scores with the threshold to judge them against.
///
/// The threshold travels with every frame so an upstream calibrator can adapt
/// it per subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlinkSignal {
    pub left: f64,
    pub right: f64,
    pub threshold: f64,
}

/// Facial expression classes, in expression model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionKind {
    Neutral,
    Happy,
    Sad,
    Surprise,
    Fear,
    Anger,
    Disgust,
    Contempt,
}

impl ExpressionKind {
    pub const ALL: [ExpressionKind; 8] = [
        ExpressionKind::Neutral,
        ExpressionKind::Happy,
        ExpressionKind::Sad,
        ExpressionKind::Surprise,
        ExpressionKind::Fear,
        ExpressionKind::Anger,
        ExpressionKind::Disgust,
        ExpressionKind::Contempt,
    ];

    /// Wire label, e.g. `"surprise"`.
    pub fn label(self) -> &'static str {
        match self {
            ExpressionKind::Neutral => "neutral",
            ExpressionKind::Happy => "happy",
            ExpressionKind::Sad => "sad",
            ExpressionKind::Surprise => "surprise",
            ExpressionKind::Fear => "fear",
            ExpressionKind::Anger => "anger",
            ExpressionKind::Disgust => "disgust",
            ExpressionKind::Contempt => "contempt",
        }
    }

    /// Human-readable name, e.g. `"Surprise"`.
    pub fn display_name(self) -> &'static str {
        match self {
            ExpressionKind::Neutral => "Neutral",
            ExpressionKind::Happy => "Happy",
            ExpressionKind::Sad => "Sad",
            ExpressionKind::Surprise => "Surprise",
            ExpressionKind::Fear => "Fear",
            ExpressionKind::Anger => "Anger",
            ExpressionKind::Disgust => "Disgust",
            ExpressionKind::Contempt => "Contempt",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.label().eq_ignore_ascii_case(label))
    }
}

/// One (label, score) pair from a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub score: f32,
}

impl Classification {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }

    /// Label a raw expression score vector by model output position.
    /// Scores beyond the known classes are dropped.
    pub fn from_scores(scores: &[f32]) -> Vec<Classification> {
        ExpressionKind::ALL
            .iter()
            .zip(scores)
            .map(|(kind, &score)| Classification::new(kind.label(), score))
            .collect()
    }
}

/// Fused proctoring signals for one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProctorResult {
    pub timestamp: Timestamp,
    pub is_left_eye_blinking: bool,
    pub is_right_eye_blinking: bool,
    pub horizontal_align: f64,
    pub vertical_align: f64,
    pub facial_activity: f64,
    pub face_movement: f64,
    /// Re-identification embedding, always [`EMBEDDING_DIM`] long.
    pub embedding: Vec<f32>,
    /// Expressions by descending score, at most [`MAX_EXPRESSIONS`].
    pub expressions: Vec<Classification>,
}
