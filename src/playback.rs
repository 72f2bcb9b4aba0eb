//! Playhead-to-frame correlation for results review.
//!
//! Given a playhead time, the correlator picks the detection frame whose
//! timestamp is closest in absolute distance (not merely the latest at-or-
//! before) and derives the state the review screen shows: occupancy count,
//! confidence, and whether the declared capacity is exceeded. Each correlated
//! sample also lands in a bounded history ring for the trend display.

use std::collections::VecDeque;

use crate::frames::DetectionSample;

/// History keeps this many samples; the oldest is evicted at capacity.
pub const DETECTION_HISTORY_LIMIT: usize = 20;

/// Derived state at one playhead position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub count: u32,
    pub confidence: Option<f64>,
    /// Strictly greater than the declared capacity.
    pub capacity_exceeded: bool,
}

impl Observation {
    /// What the screen shows when no frame correlates: zero occupancy,
    /// unknown confidence.
    fn empty() -> Self {
        Observation {
            count: 0,
            confidence: None,
            capacity_exceeded: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: f64,
    pub count: u32,
    pub confidence: Option<f64>,
}

pub struct PlaybackCorrelator {
    frames: Vec<DetectionSample>,
    max_capacity: u32,
    /// Optional tolerance in seconds; playheads farther than this from every
    /// frame report no detection. `None` means pure nearest-frame.
    window: Option<f64>,
    history: VecDeque<HistoryEntry>,
}

impl PlaybackCorrelator {
    pub fn new(frames: Vec<DetectionSample>, max_capacity: u32) -> Self {
        Self {
            frames,
            max_capacity,
            window: None,
            history: VecDeque::with_capacity(DETECTION_HISTORY_LIMIT),
        }
    }

    pub fn with_window(mut self, seconds: f64) -> Self {
        self.window = Some(seconds);
        self
    }

    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    pub fn frames(&self) -> &[DetectionSample] {
        &self.frames
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Correlates the playhead with the nearest frame and records the sample.
    ///
    /// An empty sequence (or every frame outside the tolerance window) yields
    /// the zero/unknown observation and leaves the history untouched.
    pub fn seek(&mut self, playhead: f64) -> Observation {
        let Some((count, confidence)) = self
            .closest(playhead)
            .map(|frame| (frame.count, frame.confidence))
        else {
            return Observation::empty();
        };

        if self.history.len() == DETECTION_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            timestamp: playhead,
            count,
            confidence,
        });

        Observation {
            count,
            confidence,
            capacity_exceeded: count > self.max_capacity,
        }
    }

    /// Minimum absolute timestamp distance; ties keep the earlier frame, so
    /// identical input always resolves identically.
    fn closest(&self, playhead: f64) -> Option<&DetectionSample> {
        let mut best: Option<&DetectionSample> = None;
        for frame in &self.frames {
            let distance = (frame.timestamp - playhead).abs();
            match best {
                Some(current) if (current.timestamp - playhead).abs() <= distance => {}
                _ => best = Some(frame),
            }
        }
        match (best, self.window) {
            (Some(frame), Some(window)) if (frame.timestamp - playhead).abs() > window => None,
            _ => best,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(timestamp: f64, count: u32) -> DetectionSample {
        DetectionSample {
            timestamp,
            count,
            confidence: Some(0.8),
            detections: Vec::new(),
        }
    }

    fn correlator(max_capacity: u32) -> PlaybackCorrelator {
        PlaybackCorrelator::new(
            vec![frame(0.0, 10), frame(2.0, 20), frame(4.0, 30)],
            max_capacity,
        )
    }

    #[test]
    fn picks_minimum_absolute_distance() {
        let mut c = correlator(50);
        assert_eq!(c.seek(1.9).count, 20);
        assert_eq!(c.seek(3.1).count, 30);
        // nearest, not most-recent-at-or-before
        assert_eq!(c.seek(1.2).count, 20);
    }

    #[test]
    fn ties_resolve_to_the_earlier_frame() {
        let mut c = correlator(50);
        // 1.0 is equidistant from 0.0 and 2.0
        assert_eq!(c.seek(1.0).count, 10);
        assert_eq!(c.seek(1.0).count, 10);
    }

    #[test]
    fn capacity_exceeded_is_strict() {
        let mut c = PlaybackCorrelator::new(vec![frame(0.0, 55), frame(5.0, 50)], 50);
        assert!(c.seek(0.0).capacity_exceeded);
        assert!(!c.seek(5.0).capacity_exceeded);
    }

    #[test]
    fn empty_sequence_reports_unknown_state() {
        let mut c = PlaybackCorrelator::new(Vec::new(), 50);
        let obs = c.seek(3.0);
        assert_eq!(obs.count, 0);
        assert_eq!(obs.confidence, None);
        assert!(!obs.capacity_exceeded);
        assert_eq!(c.history().count(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let mut c = correlator(50);
        for i in 0..100 {
            c.seek(i as f64 * 0.1);
        }
        assert_eq!(c.history().count(), DETECTION_HISTORY_LIMIT);
        // oldest entries were evicted
        let first = c.history().next().unwrap();
        assert!((first.timestamp - 8.0).abs() < 1e-9);
    }

    #[test]
    fn window_filters_distant_frames() {
        let mut c = correlator(50).with_window(0.5);
        assert_eq!(c.seek(2.2).count, 20);
        let obs = c.seek(3.0);
        assert_eq!(obs.count, 0);
        assert_eq!(obs.confidence, None);
        // the miss did not pollute the history
        assert_eq!(c.history().count(), 1);
    }
}
