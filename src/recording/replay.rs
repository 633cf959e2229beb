//! Plays a loaded recording back through the source contract.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::RecordingError;
use crate::frame::{ComputedFrame, HistogramEntry};
use crate::sampler::accumulator::HistogramRing;
use crate::source::{SessionMetadata, StatSource};

use super::reader::Recording;

pub const PLAYBACK_SPEEDS: [f64; 7] = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0];
const NORMAL_SPEED_INDEX: usize = 2;

pub struct ReplaySource {
    metadata: SessionMetadata,
    frames: Vec<ComputedFrame>,
    truncated: bool,
    /// Index of the next frame to emit.
    index: usize,
    speed_index: usize,
    paused: bool,
    finished: bool,
    last_emit: Option<Instant>,
    histogram: HistogramRing,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self, RecordingError> {
        Ok(Self::from_recording(Recording::open(path)?))
    }

    pub fn from_recording(recording: Recording) -> Self {
        ReplaySource {
            metadata: recording.metadata,
            frames: recording.frames,
            truncated: recording.truncated,
            index: 0,
            speed_index: NORMAL_SPEED_INDEX,
            paused: false,
            finished: false,
            last_emit: None,
            histogram: HistogramRing::new(),
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Index of the most recently emitted frame.
    pub fn position(&self) -> Option<usize> {
        self.index.checked_sub(1)
    }

    pub fn speed(&self) -> f64 {
        PLAYBACK_SPEEDS[self.speed_index]
    }

    pub fn speed_up(&mut self) {
        self.speed_index = (self.speed_index + 1).min(PLAYBACK_SPEEDS.len() - 1);
    }

    pub fn slow_down(&mut self) {
        self.speed_index = self.speed_index.saturating_sub(1);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        if !self.paused {
            // Resume from here rather than bursting to catch up.
            self.last_emit = Some(Instant::now());
        }
    }

    /// Jumps to an absolute frame index, emits that frame immediately and
    /// rebuilds the histogram as it was just after that frame played live.
    pub fn seek(&mut self, target: usize) -> Option<ComputedFrame> {
        if self.frames.is_empty() {
            return None;
        }
        let target = target.min(self.frames.len() - 1);
        self.index = target + 1;
        self.finished = self.index == self.frames.len();
        self.last_emit = Some(Instant::now());

        self.histogram = HistogramRing::new();
        let frequency = self.metadata.cycle_counter_frequency;
        for frame in &self.frames[..=target] {
            if let Some(entry) = HistogramEntry::from_frame(frame, frequency) {
                self.histogram.push(entry);
            }
        }

        Some(self.frames[target].clone())
    }

    /// Steps relative to the most recently emitted frame.
    pub fn step(&mut self, delta: i64) -> Option<ComputedFrame> {
        let current = self.position().unwrap_or(0) as i64;
        let target = (current + delta).clamp(0, self.frames.len().saturating_sub(1) as i64);
        self.seek(target as usize)
    }
}

impl StatSource for ReplaySource {
    fn next_frame(&mut self) -> Option<ComputedFrame> {
        if self.paused || self.finished {
            return None;
        }
        let Some(frame) = self.frames.get(self.index) else {
            self.finished = true;
            return None;
        };

        if let Some(last_emit) = self.last_emit {
            let wait =
                Duration::from_nanos((frame.sample_period_ns as f64 / self.speed()) as u64);
            if last_emit.elapsed() < wait {
                return None;
            }
        }

        let frame = frame.clone();
        if let Some(entry) =
            HistogramEntry::from_frame(&frame, self.metadata.cycle_counter_frequency)
        {
            self.histogram.push(entry);
        }
        self.last_emit = Some(Instant::now());
        self.index += 1;
        if self.index == self.frames.len() {
            self.finished = true;
        }
        Some(frame)
    }

    fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    fn is_live(&self) -> bool {
        false
    }

    fn histogram(&self) -> &HistogramRing {
        &self.histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::reader::Recording;

    // Frames with a zero period are always due, which makes playback
    // deterministic in tests.
    fn immediate_frames(count: u64) -> Vec<ComputedFrame> {
        (0..count)
            .map(|i| {
                let mut frame = crate::recording::tests::test_frame(i);
                frame.sample_period_ns = 0;
                frame
            })
            .collect()
    }

    fn replay_over(frames: Vec<ComputedFrame>) -> ReplaySource {
        ReplaySource::from_recording(Recording {
            metadata: crate::recording::tests::test_metadata(),
            frames,
            truncated: false,
        })
    }

    #[test]
    fn emits_every_frame_in_file_order() {
        let frames = immediate_frames(10);
        let mut replay = replay_over(frames.clone());

        let mut emitted = Vec::new();
        while let Some(frame) = replay.next_frame() {
            emitted.push(frame);
        }
        assert_eq!(emitted, frames);
        assert!(replay.is_finished());
        assert!(replay.next_frame().is_none());
    }

    #[test]
    fn paused_playback_emits_nothing() {
        let mut replay = replay_over(immediate_frames(3));
        replay.toggle_pause();
        assert!(replay.next_frame().is_none());
        replay.toggle_pause();
        assert!(replay.next_frame().is_some());
    }

    #[test]
    fn frames_with_real_periods_are_paced() {
        let mut frames = immediate_frames(3);
        for frame in &mut frames {
            frame.sample_period_ns = 60_000_000_000; // 60 s, never due in a test
        }
        let mut replay = replay_over(frames);

        // The first frame emits immediately; the second is not due yet.
        assert!(replay.next_frame().is_some());
        assert!(replay.next_frame().is_none());
        assert!(!replay.is_finished());
    }

    #[test]
    fn seek_emits_the_target_and_playback_continues_after_it() {
        let frames = immediate_frames(10);
        let mut replay = replay_over(frames.clone());

        let at = replay.seek(4).unwrap();
        assert_eq!(at, frames[4]);
        assert_eq!(replay.position(), Some(4));
        assert_eq!(replay.next_frame().unwrap(), frames[5]);
    }

    #[test]
    fn seek_to_the_last_frame_finishes_playback() {
        let frames = immediate_frames(5);
        let mut replay = replay_over(frames.clone());
        let last = replay.seek(99).unwrap();
        assert_eq!(last, frames[4]);
        assert!(replay.is_finished());
        assert!(replay.next_frame().is_none());
    }

    #[test]
    fn stepping_backwards_replays_earlier_frames() {
        let frames = immediate_frames(5);
        let mut replay = replay_over(frames.clone());
        replay.seek(3);
        let back = replay.step(-1).unwrap();
        assert_eq!(back, frames[2]);
        assert!(!replay.is_finished());
    }

    #[test]
    fn seek_rebuilds_the_histogram_to_match_live_playback() {
        // A 1 ns period keeps the frames contributing histogram entries
        // while being due again by the time the test loops.
        let frames: Vec<ComputedFrame> = (0..8)
            .map(|i| {
                let mut frame = crate::recording::tests::test_frame(i);
                frame.sample_period_ns = 1;
                frame
            })
            .collect();

        let mut live = replay_over(frames.clone());
        // Play five frames "live" (indices 0..=4).
        let mut emitted = 0;
        while emitted < 5 {
            if live.next_frame().is_some() {
                emitted += 1;
            }
        }

        let mut seeked = replay_over(frames);
        seeked.seek(4);

        let lhs: Vec<_> = live.histogram().iter().collect();
        let rhs: Vec<_> = seeked.histogram().iter().collect();
        assert!(!lhs.is_empty());
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn speed_stays_within_the_supported_ladder() {
        let mut replay = replay_over(immediate_frames(1));
        for _ in 0..20 {
            replay.speed_up();
        }
        assert_eq!(replay.speed(), 16.0);
        for _ in 0..20 {
            replay.slow_down();
        }
        assert_eq!(replay.speed(), 0.25);
    }
}
