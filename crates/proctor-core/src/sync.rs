//! Timestamp synchronisation across the six aggregator input streams.
//!
//! Each stream delivers packets in strictly increasing timestamp order. A
//! timestamp is released once every stream has delivered a packet for it.
//! Because streams never go back in time, a buffered timestamp is dead as
//! soon as one of the streams it is still waiting on moves past it; dead
//! timestamps are discarded instead of being kept around.
//!
//! Buffering is bounded by a horizon: when more incomplete timestamps are
//! pending than the horizon allows, the oldest ones are dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregateError;
use crate::landmarks::Timestamp;
use crate::orientation::OrientationVector;
use crate::result::{BlinkSignal, Classification};

/// Default number of incomplete timestamps kept in flight.
pub const DEFAULT_HORIZON: usize = 32;

/// The aggregator's input streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTag {
    Orientation,
    Blink,
    Activity,
    Movement,
    Embedding,
    Expressions,
}

impl StreamTag {
    pub const ALL: [StreamTag; 6] = [
        StreamTag::Orientation,
        StreamTag::Blink,
        StreamTag::Activity,
        StreamTag::Movement,
        StreamTag::Embedding,
        StreamTag::Expressions,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamTag::Orientation => "orientation",
            StreamTag::Blink => "blink",
            StreamTag::Activity => "activity",
            StreamTag::Movement => "movement",
            StreamTag::Embedding => "embedding",
            StreamTag::Expressions => "expressions",
        }
    }
}

impl std::fmt::Display for StreamTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One packet payload on one of the input streams.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Orientation(OrientationVector),
    Blink(BlinkSignal),
    Activity(f64),
    Movement(f64),
    Embedding(Vec<f32>),
    Expressions(Vec<Classification>),
}

impl Signal {
    pub fn stream(&self) -> StreamTag {
        match self {
            Signal::Orientation(_) => StreamTag::Orientation,
            Signal::Blink(_) => StreamTag::Blink,
            Signal::Activity(_) => StreamTag::Activity,
            Signal::Movement(_) => StreamTag::Movement,
            Signal::Embedding(_) => StreamTag::Embedding,
            Signal::Expressions(_) => StreamTag::Expressions,
        }
    }
}

/// All six inputs for one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInputs {
    pub orientation: OrientationVector,
    pub blink: BlinkSignal,
    pub activity: f64,
    pub movement: f64,
    pub embedding: Vec<f32>,
    pub expressions: Vec<Classification>,
}

#[derive(Debug, Default)]
struct PendingFrame {
    orientation: Option<OrientationVector>,
    blink: Option<BlinkSignal>,
    activity: Option<f64>,
    movement: Option<f64>,
    embedding: Option<Vec<f32>>,
    expressions: Option<Vec<Classification>>,
}

impl PendingFrame {
    fn has(&self, tag: StreamTag) -> bool {
        match tag {
            StreamTag::Orientation => self.orientation.is_some(),
            StreamTag::Blink => self.blink.is_some(),
            StreamTag::Activity => self.activity.is_some(),
            StreamTag::Movement => self.movement.is_some(),
            StreamTag::Embedding => self.embedding.is_some(),
            StreamTag::Expressions => self.expressions.is_some(),
        }
    }

    fn set(&mut self, signal: Signal) {
        match signal {
            Signal::Orientation(v) => self.orientation = Some(v),
            Signal::Blink(v) => self.blink = Some(v),
            Signal::Activity(v) => self.activity = Some(v),
            Signal::Movement(v) => self.movement = Some(v),
            Signal::Embedding(v) => self.embedding = Some(v),
            Signal::Expressions(v) => self.expressions = Some(v),
        }
    }

    fn is_complete(&self) -> bool {
        StreamTag::ALL.iter().all(|&tag| self.has(tag))
    }

    fn into_inputs(self) -> Option<FrameInputs> {
        Some(FrameInputs {
            orientation: self.orientation?,
            blink: self.blink?,
            activity: self.activity?,
            movement: self.movement?,
            embedding: self.embedding?,
            expressions: self.expressions?,
        })
    }
}

/// Buffers partial timestamps until every stream has reported.
#[derive(Debug)]
pub struct TimestampSync {
    pending: BTreeMap<Timestamp, PendingFrame>,
    last_seen: [Option<Timestamp>; 6],
    closed: [bool; 6],
    horizon: usize,
    discarded: u64,
}

impl Default for TimestampSync {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON)
    }
}

impl TimestampSync {
    /// `horizon` is clamped to at least one pending timestamp.
    pub fn new(horizon: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            last_seen: [None; 6],
            closed: [false; 6],
            horizon: horizon.max(1),
            discarded: 0,
        }
    }

    /// Accept one packet. Returns the complete input set when this packet was
    /// the last one missing for its timestamp.
    pub fn push(
        &mut self,
        timestamp: Timestamp,
        signal: Signal,
    ) -> Result<Option<(Timestamp, FrameInputs)>, AggregateError> {
        let tag = signal.stream();
        let idx = tag.index();

        if self.closed[idx] {
            return Err(AggregateError::StreamClosed { stream: tag });
        }
        if let Some(last) = self.last_seen[idx] {
            if timestamp <= last {
                return Err(AggregateError::OutOfOrder {
                    stream: tag,
                    timestamp,
                    last,
                });
            }
        }
        self.last_seen[idx] = Some(timestamp);

        // This stream has moved past anything older that still waits on it.
        self.discard_where(|ts, frame| ts < timestamp && !frame.has(tag), "stream moved past");

        if let Some(closed) = self.first_closed_missing(timestamp, tag) {
            self.pending.remove(&timestamp);
            self.discarded += 1;
            return Err(AggregateError::StreamClosed { stream: closed });
        }

        // A stream still missing here has already moved past this timestamp,
        // so it was discarded earlier and can never complete.
        if let Some(passed) = self.first_passed_missing(timestamp, tag) {
            tracing::warn!(
                stream = %tag,
                timestamp = timestamp.micros(),
                passed = %passed,
                "late packet for a discarded timestamp, dropping"
            );
            return Ok(None);
        }

        let frame = self.pending.entry(timestamp).or_default();
        frame.set(signal);

        if frame.is_complete() {
            let inputs = self.pending.remove(&timestamp).and_then(PendingFrame::into_inputs);
            // Every stream is now past anything older.
            self.discard_where(|ts, _| ts < timestamp, "superseded");
            return Ok(inputs.map(|i| (timestamp, i)));
        }

        while self.pending.len() > self.horizon {
            if let Some((ts, _)) = self.pending.pop_first() {
                self.discarded += 1;
                tracing::warn!(
                    timestamp = ts.micros(),
                    horizon = self.horizon,
                    "sync horizon exceeded, dropping oldest partial timestamp"
                );
            }
        }

        Ok(None)
    }

    /// Mark `tag` permanently closed. Partial timestamps still waiting on it
    /// are discarded; the number discarded is returned.
    pub fn close(&mut self, tag: StreamTag) -> usize {
        self.closed[tag.index()] = true;
        let dropped = self.discard_where(|_, frame| !frame.has(tag), "stream closed");
        tracing::info!(stream = %tag, discarded = dropped, "input stream closed");
        dropped
    }

    pub fn is_closed(&self, tag: StreamTag) -> bool {
        self.closed[tag.index()]
    }

    /// True once no further result can ever be produced.
    pub fn is_finished(&self) -> bool {
        self.closed.iter().any(|&c| c) && self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Partial timestamps dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// A closed stream the frame at `timestamp` would still need, if any.
    /// `incoming` is about to be filled and does not count as missing.
    fn first_closed_missing(&self, timestamp: Timestamp, incoming: StreamTag) -> Option<StreamTag> {
        let frame = self.pending.get(&timestamp);
        StreamTag::ALL.into_iter().find(|&tag| {
            tag != incoming
                && self.closed[tag.index()]
                && !frame.map(|f| f.has(tag)).unwrap_or(false)
        })
    }

    /// A stream the frame at `timestamp` still lacks that has already
    /// delivered this timestamp or a later one.
    fn first_passed_missing(&self, timestamp: Timestamp, incoming: StreamTag) -> Option<StreamTag> {
        let frame = self.pending.get(&timestamp);
        StreamTag::ALL.into_iter().find(|&tag| {
            tag != incoming
                && self.last_seen[tag.index()].is_some_and(|last| last >= timestamp)
                && !frame.map(|f| f.has(tag)).unwrap_or(false)
        })
    }

    fn discard_where<F>(&mut self, mut pred: F, reason: &'static str) -> usize
    where
        F: FnMut(Timestamp, &PendingFrame) -> bool,
    {
        let doomed: Vec<Timestamp> = self
            .pending
            .iter()
            .filter(|(ts, frame)| pred(**ts, *frame))
            .map(|(ts, _)| *ts)
            .collect();
        for ts in &doomed {
            self.pending.remove(ts);
            tracing::warn!(timestamp = ts.micros(), reason, "discarding partial timestamp");
        }
        self.discarded += doomed.len() as u64;
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_set() -> Vec<Signal> {
        vec![
            Signal::Orientation(OrientationVector::default()),
            Signal::Blink(BlinkSignal {
                left: 1.0,
                right: 1.0,
                threshold: 0.5,
            }),
            Signal::Activity(0.0),
            Signal::Movement(0.0),
            Signal::Embedding(vec![0.0; 4]),
            Signal::Expressions(vec![]),
        ]
    }

    #[test]
    fn test_releases_only_when_complete() {
        let mut sync = TimestampSync::default();
        let ts = Timestamp(10);
        let signals = full_set();
        let last = signals.len() - 1;
        for (i, s) in signals.into_iter().enumerate() {
            let out = sync.push(ts, s).unwrap();
            if i < last {
                assert!(out.is_none(), "released early after {} inputs", i + 1);
            } else {
                let (t, _) = out.unwrap();
                assert_eq!(t, ts);
            }
        }
        assert_eq!(sync.pending_len(), 0);
    }

    #[test]
    fn test_any_arrival_order() {
        let mut sync = TimestampSync::default();
        let mut signals = full_set();
        signals.reverse();
        let mut released = 0;
        for s in signals {
            if sync.push(Timestamp(1), s).unwrap().is_some() {
                released += 1;
            }
        }
        assert_eq!(released, 1);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut sync = TimestampSync::default();
        sync.push(Timestamp(5), Signal::Activity(0.1)).unwrap();
        let err = sync.push(Timestamp(5), Signal::Activity(0.2)).unwrap_err();
        assert!(matches!(err, AggregateError::OutOfOrder { .. }));
        let err = sync.push(Timestamp(4), Signal::Activity(0.2)).unwrap_err();
        assert!(matches!(
            err,
            AggregateError::OutOfOrder {
                stream: StreamTag::Activity,
                ..
            }
        ));
    }

    #[test]
    fn test_stale_partial_discarded_when_stream_moves_on() {
        let mut sync = TimestampSync::default();
        // ts 1 gets everything but blink, then blink jumps to ts 2.
        for s in full_set() {
            if s.stream() != StreamTag::Blink {
                sync.push(Timestamp(1), s).unwrap();
            }
        }
        assert_eq!(sync.pending_len(), 1);
        sync.push(
            Timestamp(2),
            Signal::Blink(BlinkSignal {
                left: 0.0,
                right: 0.0,
                threshold: 0.1,
            }),
        )
        .unwrap();
        assert_eq!(sync.pending_len(), 1);
        assert_eq!(sync.discarded(), 1);
    }

    #[test]
    fn test_late_packet_for_discarded_timestamp_dropped() {
        let mut sync = TimestampSync::default();
        for t in [1, 2] {
            sync.push(Timestamp(t), Signal::Orientation(OrientationVector::default()))
                .unwrap();
            sync.push(Timestamp(t), Signal::Movement(0.0)).unwrap();
        }
        // activity skips ts 1, which is discarded
        sync.push(Timestamp(2), Signal::Activity(0.0)).unwrap();
        assert_eq!(sync.pending_len(), 1);
        assert_eq!(sync.discarded(), 1);

        let late = sync
            .push(
                Timestamp(1),
                Signal::Blink(BlinkSignal {
                    left: 0.0,
                    right: 0.0,
                    threshold: 0.1,
                }),
            )
            .unwrap();
        assert!(late.is_none());
        assert_eq!(sync.pending_len(), 1);
        assert_eq!(sync.discarded(), 1);
    }

    #[test]
    fn test_horizon_bounds_buffer() {
        let mut sync = TimestampSync::new(3);
        for t in 0..10 {
            sync.push(Timestamp(t), Signal::Activity(0.0)).unwrap();
        }
        assert_eq!(sync.pending_len(), 3);
        assert_eq!(sync.discarded(), 7);
    }

    #[test]
    fn test_close_discards_waiting_frames() {
        let mut sync = TimestampSync::default();
        sync.push(Timestamp(1), Signal::Activity(0.0)).unwrap();
        sync.push(Timestamp(1), Signal::Movement(0.0)).unwrap();
        sync.push(Timestamp(2), Signal::Activity(0.0)).unwrap();
        assert_eq!(sync.pending_len(), 2);
        // ts 2 still waits on movement; ts 1 already has it.
        assert_eq!(sync.close(StreamTag::Movement), 1);
        assert_eq!(sync.pending_len(), 1);
        assert!(sync.is_closed(StreamTag::Movement));
    }

    #[test]
    fn test_closed_stream_propagates() {
        let mut sync = TimestampSync::default();
        sync.close(StreamTag::Embedding);
        let err = sync.push(Timestamp(1), Signal::Embedding(vec![])).unwrap_err();
        assert_eq!(
            err,
            AggregateError::StreamClosed {
                stream: StreamTag::Embedding
            }
        );
        let err = sync.push(Timestamp(1), Signal::Activity(0.0)).unwrap_err();
        assert_eq!(
            err,
            AggregateError::StreamClosed {
                stream: StreamTag::Embedding
            }
        );
        assert_eq!(sync.pending_len(), 0);
        assert!(sync.is_finished());
    }

    #[test]
    fn test_frame_already_holding_closed_stream_completes() {
        let mut sync = TimestampSync::default();
        let signals = full_set();
        let (embedding, rest): (Vec<_>, Vec<_>) = signals
            .into_iter()
            .partition(|s| s.stream() == StreamTag::Embedding);
        for s in embedding {
            sync.push(Timestamp(3), s).unwrap();
        }
        sync.close(StreamTag::Embedding);
        let mut released = None;
        for s in rest {
            released = sync.push(Timestamp(3), s).unwrap();
        }
        assert!(released.is_some());
    }
}
