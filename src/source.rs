//! The contract between the frame producers and their consumers. The UI,
//! the CSV exporter and anything else downstream only ever see this trait,
//! so live sampling and replay are interchangeable; playback controls are a
//! capability of the replay type alone.

use serde::{Deserialize, Serialize};

use crate::frame::ComputedFrame;
use crate::sampler::accumulator::HistogramRing;
use crate::stats::AppType;

/// Fixed facts about a session, captured at attach (or recorded at the
/// start of a file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub pid: u32,
    pub fex_version: String,
    pub app_type: AppType,
    pub stats_version: u8,
    pub cycle_counter_frequency: u64,
    pub hardware_concurrency: u32,
    /// Wall clock when the session started, milliseconds since the Unix epoch.
    pub start_unix_ms: u64,
}

pub trait StatSource {
    /// Non-blocking. `None` means "nothing due yet" while running, and
    /// "no more frames" once the target exited, playback finished or is
    /// paused. Performs all of its work synchronously and holds no locks
    /// at return.
    fn next_frame(&mut self) -> Option<ComputedFrame>;

    fn metadata(&self) -> &SessionMetadata;

    fn is_live(&self) -> bool;

    /// The scrolling chart's backing ring, oldest entry first.
    fn histogram(&self) -> &HistogramRing;
}
