//! Fusion of the per-frame signals into a [`ProctorResult`].
//!
//! [`aggregate`] applies the derivation rules to one complete input set.
//! [`ResultAggregator`] puts a [`TimestampSync`] in front of it so packets can
//! arrive stream by stream, in any interleaving, and still come out as one
//! result per timestamp in increasing timestamp order.

use std::cmp::Ordering;

use thiserror::Error;

use crate::landmarks::Timestamp;
use crate::result::{BlinkSignal, Classification, ProctorResult, EMBEDDING_DIM, MAX_EXPRESSIONS};
use crate::sync::{FrameInputs, Signal, StreamTag, TimestampSync};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("embedding has {actual} values (expected {expected})")]
    EmbeddingSizeMismatch { expected: usize, actual: usize },
    #[error("expression {label:?} has a non-finite score")]
    NonFiniteScore { label: String },
    #[error("input stream {stream} is closed")]
    StreamClosed { stream: StreamTag },
    #[error("{stream} packet at {timestamp} is not after the previous one at {last}")]
    OutOfOrder {
        stream: StreamTag,
        timestamp: Timestamp,
        last: Timestamp,
    },
}

/// `(left, right)` blink flags: an eye blinks when its score is below the
/// frame's threshold.
pub fn derive_blinks(blink: &BlinkSignal) -> (bool, bool) {
    (blink.left < blink.threshold, blink.right < blink.threshold)
}

/// Stable descending sort by score, capped at [`MAX_EXPRESSIONS`].
///
/// Equal scores keep their input order. NaN scores sink to the bottom.
pub fn rank_expressions(mut expressions: Vec<Classification>) -> Vec<Classification> {
    expressions.sort_by(|a, b| descending(a.score, b.score));
    expressions.truncate(MAX_EXPRESSIONS);
    expressions
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Fuse one complete set of inputs.
pub fn aggregate(timestamp: Timestamp, inputs: FrameInputs) -> Result<ProctorResult, AggregateError> {
    if inputs.embedding.len() != EMBEDDING_DIM {
        return Err(AggregateError::EmbeddingSizeMismatch {
            expected: EMBEDDING_DIM,
            actual: inputs.embedding.len(),
        });
    }

    if let Some(bad) = inputs.expressions.iter().find(|c| !c.score.is_finite()) {
        return Err(AggregateError::NonFiniteScore {
            label: bad.label.clone(),
        });
    }

    let (is_left_eye_blinking, is_right_eye_blinking) = derive_blinks(&inputs.blink);

    Ok(ProctorResult {
        timestamp,
        is_left_eye_blinking,
        is_right_eye_blinking,
        horizontal_align: inputs.orientation.horizontal_align,
        vertical_align: inputs.orientation.vertical_align,
        facial_activity: inputs.activity,
        face_movement: inputs.movement,
        embedding: inputs.embedding,
        expressions: rank_expressions(inputs.expressions),
    })
}

/// Synchronising front end to [`aggregate`].
#[derive(Debug, Default)]
pub struct ResultAggregator {
    sync: TimestampSync,
    emitted: u64,
    last_emitted: Option<Timestamp>,
}

impl ResultAggregator {
    pub fn new(horizon: usize) -> Self {
        Self {
            sync: TimestampSync::new(horizon),
            emitted: 0,
            last_emitted: None,
        }
    }

    /// Feed one packet. Returns the fused result when it completes a
    /// timestamp; `Ok(None)` while the timestamp is still partial.
    ///
    /// An error fails only the timestamp it belongs to.
    pub fn push(
        &mut self,
        timestamp: Timestamp,
        signal: Signal,
    ) -> Result<Option<ProctorResult>, AggregateError> {
        let Some((ts, inputs)) = self.sync.push(timestamp, signal)? else {
            return Ok(None);
        };

        let result = aggregate(ts, inputs)?;
        debug_assert!(self.last_emitted.map_or(true, |last| last < ts));
        self.last_emitted = Some(ts);
        self.emitted += 1;
        tracing::debug!(
            timestamp = ts.micros(),
            left_blink = result.is_left_eye_blinking,
            right_blink = result.is_right_eye_blinking,
            activity = result.facial_activity,
            movement = result.face_movement,
            "result aggregated"
        );
        Ok(Some(result))
    }

    /// Close one input stream; returns how many partial timestamps were dropped.
    pub fn close(&mut self, stream: StreamTag) -> usize {
        self.sync.close(stream)
    }

    /// Close every input stream.
    pub fn close_all(&mut self) -> usize {
        StreamTag::ALL.into_iter().map(|tag| self.sync.close(tag)).sum()
    }

    pub fn is_finished(&self) -> bool {
        self.sync.is_finished()
    }

    /// Results emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Partial timestamps dropped so far.
    pub fn discarded(&self) -> u64 {
        self.sync.discarded()
    }

    pub fn pending(&self) -> usize {
        self.sync.pending_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::OrientationVector;

    fn inputs() -> FrameInputs {
        FrameInputs {
            orientation: OrientationVector {
                horizontal_align: 0.1,
                vertical_align: -0.2,
            },
            blink: BlinkSignal {
                left: 0.2,
                right: 0.5,
                threshold: 0.4,
            },
            activity: 0.3,
            movement: 0.05,
            embedding: vec![0.5; EMBEDDING_DIM],
            expressions: Classification::from_scores(&[0.1, 0.6, 0.0, 0.3]),
        }
    }

    fn signals(i: FrameInputs) -> Vec<Signal> {
        vec![
            Signal::Orientation(i.orientation),
            Signal::Blink(i.blink),
            Signal::Activity(i.activity),
            Signal::Movement(i.movement),
            Signal::Embedding(i.embedding),
            Signal::Expressions(i.expressions),
        ]
    }

    #[test]
    fn test_blink_derivation() {
        let r = aggregate(Timestamp(0), inputs()).unwrap();
        assert!(r.is_left_eye_blinking);
        assert!(!r.is_right_eye_blinking);
    }

    #[test]
    fn test_blink_at_threshold_is_open() {
        let b = BlinkSignal {
            left: 0.4,
            right: 0.39,
            threshold: 0.4,
        };
        assert_eq!(derive_blinks(&b), (false, true));
    }

    #[test]
    fn test_copies_signals_through() {
        let r = aggregate(Timestamp(7), inputs()).unwrap();
        assert_eq!(r.timestamp, Timestamp(7));
        assert_eq!(r.horizontal_align, 0.1);
        assert_eq!(r.vertical_align, -0.2);
        assert_eq!(r.facial_activity, 0.3);
        assert_eq!(r.face_movement, 0.05);
        assert_eq!(r.embedding, vec![0.5; EMBEDDING_DIM]);
        assert_eq!(r.expressions[0].label, "happy");
    }

    #[test]
    fn test_stable_descending_rank() {
        let ranked = rank_expressions(vec![
            Classification::new("a", 0.5),
            Classification::new("b", 0.9),
            Classification::new("c", 0.5),
        ]);
        let labels: Vec<_> = ranked.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rank_caps_at_eight() {
        let many: Vec<_> = (0..12)
            .map(|i| Classification::new(format!("e{i}"), i as f32 / 12.0))
            .collect();
        let ranked = rank_expressions(many);
        assert_eq!(ranked.len(), MAX_EXPRESSIONS);
        assert_eq!(ranked[0].label, "e11");
    }

    #[test]
    fn test_rank_nan_last() {
        let ranked = rank_expressions(vec![
            Classification::new("nan", f32::NAN),
            Classification::new("low", 0.1),
        ]);
        assert_eq!(ranked[0].label, "low");
    }

    #[test]
    fn test_non_finite_score_fails_timestamp() {
        let mut i = inputs();
        i.expressions[1].score = f32::NAN;
        assert_eq!(
            aggregate(Timestamp(0), i).unwrap_err(),
            AggregateError::NonFiniteScore {
                label: "happy".into()
            }
        );

        let mut i = inputs();
        i.expressions[3].score = f32::INFINITY;
        assert!(matches!(
            aggregate(Timestamp(0), i),
            Err(AggregateError::NonFiniteScore { .. })
        ));
    }

    #[test]
    fn test_result_survives_json() {
        let r = aggregate(Timestamp(3), inputs()).unwrap();
        let line = serde_json::to_string(&r).unwrap();
        assert!(!line.contains("null"));
        let back: ProctorResult = serde_json::from_str(&line).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_embedding_size_mismatch() {
        let mut i = inputs();
        i.embedding.pop();
        assert_eq!(
            aggregate(Timestamp(0), i).unwrap_err(),
            AggregateError::EmbeddingSizeMismatch {
                expected: 128,
                actual: 127
            }
        );
    }

    #[test]
    fn test_waits_for_all_six() {
        let mut agg = ResultAggregator::default();
        let all = signals(inputs());
        for (n, s) in all.into_iter().enumerate() {
            let out = agg.push(Timestamp(1), s).unwrap();
            assert_eq!(out.is_some(), n == 5);
        }
        assert_eq!(agg.emitted(), 1);
    }

    #[test]
    fn test_never_emits_with_one_missing() {
        let mut agg = ResultAggregator::default();
        for skip in 0..6 {
            let ts = Timestamp(skip as i64);
            for (n, s) in signals(inputs()).into_iter().enumerate() {
                if n != skip {
                    assert!(agg.push(ts, s).unwrap().is_none());
                }
            }
        }
        assert_eq!(agg.emitted(), 0);
    }

    #[test]
    fn test_interleaved_timestamps_in_order() {
        let mut agg = ResultAggregator::default();
        let mut out = Vec::new();
        // Stream-major delivery: each stream sends ts 1..=3 before the next.
        let per_ts: Vec<Vec<Signal>> = (0..3).map(|_| signals(inputs())).collect();
        for stream in 0..6 {
            for (t, sigs) in per_ts.iter().enumerate() {
                if let Some(r) = agg.push(Timestamp(t as i64 + 1), sigs[stream].clone()).unwrap() {
                    out.push(r.timestamp);
                }
            }
        }
        assert_eq!(out, vec![Timestamp(1), Timestamp(2), Timestamp(3)]);
    }

    #[test]
    fn test_failed_timestamp_leaves_gap() {
        let mut agg = ResultAggregator::default();
        let mut bad = inputs();
        bad.embedding = vec![0.0; 3];
        let mut last = Ok(None);
        for s in signals(bad) {
            last = agg.push(Timestamp(1), s);
        }
        assert!(matches!(last, Err(AggregateError::EmbeddingSizeMismatch { .. })));

        let mut ok = None;
        for s in signals(inputs()) {
            ok = agg.push(Timestamp(2), s).unwrap();
        }
        assert_eq!(ok.unwrap().timestamp, Timestamp(2));
        assert_eq!(agg.emitted(), 1);
    }

    #[test]
    fn test_close_all_propagates() {
        let mut agg = ResultAggregator::default();
        agg.push(Timestamp(1), Signal::Activity(0.1)).unwrap();
        assert_eq!(agg.close_all(), 1);
        assert!(agg.is_finished());
        assert!(matches!(
            agg.push(Timestamp(2), Signal::Movement(0.0)),
            Err(AggregateError::StreamClosed { .. })
        ));
    }
}
