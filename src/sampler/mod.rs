//! The live sampling loop: owns the shm reader, the differ, the load
//! accumulator, the liveness watcher and the memory-sampling worker, and
//! drives them on a cadence through a non-blocking `next_frame`.

pub mod accumulator;
pub mod differ;
pub mod liveness;
pub mod mem_sampler;

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use crate::cycles;
use crate::error::AttachError;
use crate::frame::ComputedFrame;
use crate::recording::writer::RecordingWriter;
use crate::source::{SessionMetadata, StatSource};
use crate::stats::reader::ShmReader;

use accumulator::{HistogramRing, LoadAccumulator};
use differ::{ThreadStatsDiffer, DEFAULT_STALE_TIMEOUT};
use liveness::LivenessWatcher;
use mem_sampler::MemSamplerHandle;

pub const MIN_SAMPLE_PERIOD: Duration = Duration::from_millis(10);
pub const MAX_SAMPLE_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Running,
    TargetExited,
    Failed,
}

pub struct LiveSource {
    reader: ShmReader,
    differ: ThreadStatsDiffer,
    accumulator: LoadAccumulator,
    liveness: LivenessWatcher,
    mem: MemSamplerHandle,
    recorder: Option<RecordingWriter>,
    metadata: SessionMetadata,
    sample_period: Duration,
    epoch: Instant,
    next_due: Instant,
    state: SourceState,
    reported_truncation: bool,
}

impl LiveSource {
    pub fn attach(pid: u32, sample_period: Duration) -> Result<Self, AttachError> {
        let sample_period = sample_period.clamp(MIN_SAMPLE_PERIOD, MAX_SAMPLE_PERIOD);
        let reader = ShmReader::open(pid)?;
        let header = reader.header();
        let hardware_concurrency = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        let cycle_counter_frequency = cycles::counter_frequency();

        let metadata = SessionMetadata {
            pid,
            fex_version: header.fex_version.clone(),
            app_type: header.app_type,
            stats_version: header.version,
            cycle_counter_frequency,
            hardware_concurrency,
            start_unix_ms: unix_time_ms(),
        };
        info!(
            "attached to pid {pid}: {} ({}), stats v{}",
            metadata.fex_version, metadata.app_type, metadata.stats_version
        );

        let mem = MemSamplerHandle::spawn(pid, sample_period)?;

        let now = Instant::now();
        Ok(LiveSource {
            reader,
            differ: ThreadStatsDiffer::new(DEFAULT_STALE_TIMEOUT),
            accumulator: LoadAccumulator::new(cycle_counter_frequency, hardware_concurrency),
            liveness: LivenessWatcher::new(pid),
            mem,
            recorder: None,
            metadata,
            sample_period,
            epoch: now,
            next_due: now,
            state: SourceState::Running,
            reported_truncation: false,
        })
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Starts mirroring every produced frame into `writer`.
    pub fn set_recorder(&mut self, writer: RecordingWriter) {
        self.recorder = Some(writer);
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Finalises a recording in progress, writing the EOF marker.
    pub fn stop_recording(&mut self) {
        if let Some(writer) = self.recorder.take() {
            if let Err(err) = writer.finish() {
                error!("could not finalise recording: {err}");
            }
        }
    }

    fn run_pass(&mut self, now: Instant) -> Option<ComputedFrame> {
        if let Err(err) = self.reader.remap_if_resized() {
            error!("lost the stats region: {err}");
            self.state = SourceState::Failed;
            self.stop_recording();
            return None;
        }

        let walk = self.reader.sample();
        if walk.truncated && !self.reported_truncation {
            warn!("thread list truncated; continuing with the records seen so far");
            self.reported_truncation = true;
        }

        let sample = self.differ.sample(&walk.records, now);
        let mem = self.mem.latest();
        let monotonic_ns = sample.timestamp.duration_since(self.epoch).as_nanos() as u64;
        let frame = self
            .accumulator
            .compute(sample, mem, monotonic_ns, unix_time_ms());

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(err) = recorder.write_frame(&frame) {
                error!("recording failed, stopping it: {err}");
                self.recorder = None;
            }
        }

        Some(frame)
    }
}

impl StatSource for LiveSource {
    fn next_frame(&mut self) -> Option<ComputedFrame> {
        if self.state != SourceState::Running {
            return None;
        }
        let now = Instant::now();
        if now < self.next_due {
            return None;
        }

        if self.liveness.has_exited() {
            info!("target pid {} exited", self.metadata.pid);
            self.state = SourceState::TargetExited;
            self.stop_recording();
            return None;
        }

        // Schedule relative to the intended wakeup so jitter does not drift
        // the cadence, but never fall behind by more than one period.
        self.next_due = (self.next_due + self.sample_period).max(now);

        self.run_pass(now)
    }

    fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    fn is_live(&self) -> bool {
        true
    }

    fn histogram(&self) -> &HistogramRing {
        self.accumulator.histogram()
    }
}

fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
