//! Recent frame durations per server, kept in arrival order.

use std::collections::{BTreeMap, VecDeque};

use monitor_proto::{FrameTelemetryUpdate, ServerId};

pub const DEFAULT_FRAME_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub server_id: ServerId,
    pub duration_ms: f32,
    /// Position in the overall arrival sequence since the last reset.
    pub sequence: u64,
}

#[derive(Debug)]
pub struct FrameTelemetry {
    max_len: usize,
    history: BTreeMap<ServerId, VecDeque<FrameSample>>,
    next_sequence: u64,
}

impl Default for FrameTelemetry {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_HISTORY)
    }
}

impl FrameTelemetry {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            history: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn push(&mut self, update: &FrameTelemetryUpdate) {
        let sample = FrameSample {
            server_id: update.server_id,
            duration_ms: update.frame_duration_ms,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        let max_len = self.max_len;
        let ring = self
            .history
            .entry(update.server_id)
            .or_insert_with(|| VecDeque::with_capacity(max_len));
        if ring.len() == max_len {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    pub fn push_batch(&mut self, batch: &[FrameTelemetryUpdate]) {
        for update in batch {
            self.push(update);
        }
    }

    /// Oldest first.
    pub fn history(&self, server_id: ServerId) -> impl Iterator<Item = &FrameSample> {
        self.history.get(&server_id).into_iter().flatten()
    }

    pub fn durations(&self, server_id: ServerId) -> Vec<f32> {
        self.history(server_id).map(|s| s.duration_ms).collect()
    }

    pub fn latest(&self, server_id: ServerId) -> Option<&FrameSample> {
        self.history.get(&server_id).and_then(|ring| ring.back())
    }

    pub fn servers(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.history.keys().copied()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.next_sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(server_id: ServerId, ms: f32) -> FrameTelemetryUpdate {
        FrameTelemetryUpdate {
            server_id,
            frame_duration_ms: ms,
        }
    }

    #[test]
    fn ring_keeps_most_recent_in_arrival_order() {
        let mut telemetry = FrameTelemetry::new(3);
        for ms in [10.0, 11.0, 12.0, 13.0, 14.0] {
            telemetry.push(&frame(1, ms));
        }
        assert_eq!(telemetry.durations(1), vec![12.0, 13.0, 14.0]);
        assert_eq!(telemetry.latest(1).unwrap().sequence, 4);
    }

    #[test]
    fn servers_are_tracked_independently() {
        let mut telemetry = FrameTelemetry::default();
        telemetry.push_batch(&[frame(1, 5.0), frame(2, 40.0), frame(1, 6.0)]);
        assert_eq!(telemetry.durations(1), vec![5.0, 6.0]);
        assert_eq!(telemetry.durations(2), vec![40.0]);
        assert!(telemetry.durations(3).is_empty());
        assert_eq!(telemetry.servers().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(telemetry.latest(2).unwrap().sequence, 1);
    }

    #[test]
    fn zero_length_is_floored() {
        let mut telemetry = FrameTelemetry::new(0);
        telemetry.push_batch(&[frame(1, 5.0), frame(1, 6.0)]);
        assert_eq!(telemetry.durations(1), vec![6.0]);
        telemetry.clear();
        assert!(telemetry.latest(1).is_none());
    }
}
