//! The data that flows out of the sampling pipeline: per-thread deltas,
//! period totals, derived loads, memory snapshots and histogram entries.
//! Everything here is what gets serialised into recordings, so field order
//! is part of the on-disk format.

use serde::{Deserialize, Serialize};

/// Per-thread counter change over one sample period. Field meanings match
/// [`crate::stats::ThreadStats`]; values are `current - previous`, clamped
/// to zero when a counter regressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDelta {
    pub tid: u32,
    pub jit_time: u64,
    pub signal_time: u64,
    pub sigbus_count: u64,
    pub smc_count: u64,
    pub float_fallback_count: u64,
    pub cache_miss_count: u64,
    pub cache_read_lock_time: u64,
    pub cache_write_lock_time: u64,
    pub jit_count: u64,
}

/// Counter deltas summed over all threads in one sample period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub jit_time: u64,
    pub signal_time: u64,
    pub sigbus_count: u64,
    pub smc_count: u64,
    pub float_fallback_count: u64,
    pub cache_miss_count: u64,
    pub cache_read_lock_time: u64,
    pub cache_write_lock_time: u64,
    pub jit_count: u64,
}

impl PeriodTotals {
    pub fn accumulate(&mut self, delta: &ThreadDelta) {
        self.jit_time += delta.jit_time;
        self.signal_time += delta.signal_time;
        self.sigbus_count += delta.sigbus_count;
        self.smc_count += delta.smc_count;
        self.float_fallback_count += delta.float_fallback_count;
        self.cache_miss_count += delta.cache_miss_count;
        self.cache_read_lock_time += delta.cache_read_lock_time;
        self.cache_write_lock_time += delta.cache_write_lock_time;
        self.jit_count += delta.jit_count;
    }
}

/// The allocator mapping with the largest resident size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargestAnon {
    pub begin: u64,
    pub end: u64,
    pub size: u64,
}

/// Categorised resident-set totals for the observed process, in bytes.
/// "Not yet sampled" is represented as `Option<MemSnapshot>` wherever a
/// snapshot may be absent; a present snapshot with zeros means the maps
/// genuinely reported zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemSnapshot {
    pub total_anon: u64,
    pub jit_code: u64,
    pub op_dispatcher: u64,
    pub frontend: u64,
    pub cpu_backend: u64,
    pub lookup: u64,
    pub lookup_l1: u64,
    pub thread_states: u64,
    pub block_links: u64,
    pub misc: u64,
    pub allocator: u64,
    pub unaccounted: u64,
    pub largest_anon: LargestAnon,
}

/// Period smc_count at or above this flags heavy code invalidation.
pub const HIGH_INVALIDATION_SMC_COUNT: u64 = 500;
/// Period sigbus_count at or above this flags unaligned-atomic fault storms.
pub const HIGH_SIGBUS_COUNT: u64 = 5_000;
/// Period float_fallback_count at or above this flags softfloat-heavy code.
pub const HIGH_SOFTFLOAT_COUNT: u64 = 1_000_000;

/// One column of the scrolling load chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramEntry {
    pub load_percent: f32,
    pub high_jit_load: bool,
    pub high_invalidation: bool,
    pub high_sigbus: bool,
    pub high_softfloat: bool,
}

impl HistogramEntry {
    /// Builds the entry for a period with the given totals. `max_cycles` is
    /// the cycle budget of a single core over that period.
    pub fn from_totals(load_percent: f64, totals: &PeriodTotals, max_cycles: f64) -> Self {
        HistogramEntry {
            load_percent: load_percent as f32,
            high_jit_load: totals.jit_time as f64 >= max_cycles,
            high_invalidation: totals.smc_count >= HIGH_INVALIDATION_SMC_COUNT,
            high_sigbus: totals.sigbus_count >= HIGH_SIGBUS_COUNT,
            high_softfloat: totals.float_fallback_count >= HIGH_SOFTFLOAT_COUNT,
        }
    }

    /// Recomputes the entry a frame contributed when it was emitted live.
    /// The first frame of a session has no period and contributes none.
    pub fn from_frame(frame: &ComputedFrame, cycle_frequency: u64) -> Option<Self> {
        if frame.sample_period_ns == 0 {
            return None;
        }
        let max_cycles = cycle_frequency as f64 * (frame.sample_period_ns as f64 / 1e9);
        Some(Self::from_totals(
            frame.fex_load_percent,
            &frame.totals,
            max_cycles,
        ))
    }
}

/// Load contribution of a single guest thread over one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadLoad {
    pub tid: u32,
    pub load_percent: f64,
    pub total_cycles: u64,
}

/// Everything a consumer sees for one sample period. This is the unit that
/// goes over the source contract and into recordings; `per_thread_deltas`
/// keeps the recording lossless for offline analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputedFrame {
    /// Wall clock at the end of the pass, milliseconds since the Unix epoch.
    pub unix_time_ms: u64,
    /// Monotonic clock at the end of the pass, nanoseconds since attach.
    pub monotonic_ns: u64,
    /// Elapsed monotonic time since the previous pass; 0 on the first pass.
    pub sample_period_ns: u64,
    pub threads_sampled: u32,
    pub totals: PeriodTotals,
    /// Overall JIT load as a percentage of saturating all active cores.
    /// Not clamped; sustained compilation can push this past 100.
    pub fex_load_percent: f64,
    /// Busiest threads first, at most `min(hardware_concurrency, 32)` entries.
    pub thread_loads: Vec<ThreadLoad>,
    pub mem: Option<MemSnapshot>,
    pub per_thread_deltas: Vec<ThreadDelta>,
}
