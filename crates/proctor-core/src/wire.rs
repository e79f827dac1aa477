//! Newline-delimited JSON packets exchanged with the model and render stages.
//!
//! Input, one object per line:
//!
//! ```json
//! {"timestamp": 33000, "stream": "landmarks", "landmarks": [{"x": 0.5, "y": 0.4, "z": 0.0}]}
//! {"timestamp": 33000, "stream": "blink", "left": 0.31, "right": 0.29, "threshold": 0.2}
//! {"timestamp": 33000, "stream": "embedding", "embedding": [0.01, -0.2]}
//! {"timestamp": 33000, "stream": "expressions", "expressions": [{"label": "happy", "score": 0.8}]}
//! {"timestamp": 33000, "stream": "expression_scores", "scores": [0.1, 0.8, 0.0]}
//! {"timestamp": 0, "stream": "input_size", "width": 1280, "height": 720}
//! {"timestamp": 99000, "stream": "close"}
//! ```
//!
//! Output records are tagged with `kind`: `result` or `transform`.

use serde::{Deserialize, Serialize};

use crate::alignment::Transform4x4;
use crate::graph::{FrameOutput, ProctorGraph};
use crate::landmarks::{FrameSize, LandmarkSet, Timestamp};
use crate::result::{BlinkSignal, Classification, ProctorResult};
use crate::sync::{Signal, StreamTag};

/// One input packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPacket {
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stream", rename_all = "snake_case")]
pub enum Payload {
    Landmarks {
        landmarks: LandmarkSet,
    },
    Blink(BlinkSignal),
    Embedding {
        embedding: Vec<f32>,
    },
    Expressions {
        expressions: Vec<Classification>,
    },
    /// Raw expression model scores in class order.
    ExpressionScores {
        scores: Vec<f32>,
    },
    InputSize(FrameSize),
    /// Close the listed streams, or all of them when none are listed.
    Close {
        #[serde(default)]
        streams: Vec<StreamTag>,
    },
}

/// One output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputRecord {
    Result(ProctorResult),
    Transform {
        timestamp: Timestamp,
        matrix: Transform4x4,
    },
}

impl OutputRecord {
    /// Records for a frame's outputs; the transform (if any) comes first.
    pub fn from_frame(frame: &FrameOutput) -> Vec<OutputRecord> {
        let mut records = Vec::with_capacity(2);
        if let (Some(timestamp), Some(matrix)) = (frame.timestamp, frame.transform) {
            records.push(OutputRecord::Transform { timestamp, matrix });
        }
        if let Some(result) = &frame.result {
            records.push(OutputRecord::Result(result.clone()));
        }
        records
    }
}

pub fn parse_line(line: &str) -> Result<InputPacket, serde_json::Error> {
    serde_json::from_str(line)
}

pub fn to_line(record: &OutputRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(record)
}

/// Route one packet into the graph.
pub fn dispatch(graph: &mut ProctorGraph, packet: InputPacket) -> FrameOutput {
    let ts = packet.timestamp;
    match packet.payload {
        Payload::Landmarks { landmarks } => graph.process_landmarks(ts, &landmarks),
        Payload::Blink(blink) => graph.push_signal(ts, Signal::Blink(blink)),
        Payload::Embedding { embedding } => graph.push_signal(ts, Signal::Embedding(embedding)),
        Payload::Expressions { expressions } => {
            graph.push_signal(ts, Signal::Expressions(expressions))
        }
        Payload::ExpressionScores { scores } => graph.push_signal(
            ts,
            Signal::Expressions(Classification::from_scores(&scores)),
        ),
        Payload::InputSize(size) => {
            graph.set_input_size(size);
            FrameOutput::default()
        }
        Payload::Close { streams } => {
            if streams.is_empty() {
                graph.close_all();
            } else {
                for stream in streams {
                    graph.close(stream);
                }
            }
            FrameOutput::default()
        }
    }
}
