//! Turns absolute per-thread counters into per-period deltas.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::frame::ThreadDelta;
use crate::stats::ThreadStats;

/// Threads absent from the producer's list for this long are forgotten, so a
/// recycled tid starts over with a zero delta instead of inheriting counters.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(10);

struct PrevEntry {
    stats: ThreadStats,
    last_seen: Instant,
}

pub struct DifferOutput {
    pub timestamp: Instant,
    pub per_thread_deltas: Vec<ThreadDelta>,
    pub threads_sampled: u32,
}

pub struct ThreadStatsDiffer {
    previous: HashMap<u32, PrevEntry>,
    stale_timeout: Duration,
}

impl ThreadStatsDiffer {
    pub fn new(stale_timeout: Duration) -> Self {
        ThreadStatsDiffer {
            previous: HashMap::new(),
            stale_timeout,
        }
    }

    /// One pass over the raw records. A thread seen for the first time
    /// contributes a zero delta; a counter that went backwards (thread
    /// restart, counter reset) contributes zero for that counter only and
    /// the stored previous value is re-seated either way.
    pub fn sample(&mut self, raw_stats: &[ThreadStats], now: Instant) -> DifferOutput {
        let mut per_thread_deltas = Vec::with_capacity(raw_stats.len());
        for raw in raw_stats {
            let delta = match self.previous.get_mut(&raw.tid) {
                Some(entry) => {
                    let delta = diff(raw, &entry.stats);
                    entry.stats = *raw;
                    entry.last_seen = now;
                    delta
                }
                None => {
                    self.previous.insert(
                        raw.tid,
                        PrevEntry {
                            stats: *raw,
                            last_seen: now,
                        },
                    );
                    ThreadDelta {
                        tid: raw.tid,
                        ..ThreadDelta::default()
                    }
                }
            };
            per_thread_deltas.push(delta);
        }

        let stale_timeout = self.stale_timeout;
        self.previous
            .retain(|_, entry| now.duration_since(entry.last_seen) < stale_timeout);

        DifferOutput {
            timestamp: now,
            per_thread_deltas,
            threads_sampled: raw_stats.len() as u32,
        }
    }

    #[cfg(test)]
    fn tracked_tids(&self) -> Vec<u32> {
        let mut tids: Vec<u32> = self.previous.keys().copied().collect();
        tids.sort_unstable();
        tids
    }
}

fn diff(current: &ThreadStats, previous: &ThreadStats) -> ThreadDelta {
    ThreadDelta {
        tid: current.tid,
        jit_time: current.jit_time.saturating_sub(previous.jit_time),
        signal_time: current.signal_time.saturating_sub(previous.signal_time),
        sigbus_count: current.sigbus_count.saturating_sub(previous.sigbus_count),
        smc_count: current.smc_count.saturating_sub(previous.smc_count),
        float_fallback_count: current
            .float_fallback_count
            .saturating_sub(previous.float_fallback_count),
        cache_miss_count: current
            .cache_miss_count
            .saturating_sub(previous.cache_miss_count),
        cache_read_lock_time: current
            .cache_read_lock_time
            .saturating_sub(previous.cache_read_lock_time),
        cache_write_lock_time: current
            .cache_write_lock_time
            .saturating_sub(previous.cache_write_lock_time),
        jit_count: current.jit_count.saturating_sub(previous.jit_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(tid: u32, jit_time: u64, smc_count: u64) -> ThreadStats {
        ThreadStats {
            tid,
            jit_time,
            smc_count,
            ..ThreadStats::default()
        }
    }

    #[test]
    fn first_sighting_emits_zero_delta() {
        let mut differ = ThreadStatsDiffer::new(DEFAULT_STALE_TIMEOUT);
        let out = differ.sample(&[stats(7, 1_000, 5)], Instant::now());
        assert_eq!(out.threads_sampled, 1);
        assert_eq!(out.per_thread_deltas.len(), 1);
        assert_eq!(out.per_thread_deltas[0].tid, 7);
        assert_eq!(out.per_thread_deltas[0].jit_time, 0);
        assert_eq!(out.per_thread_deltas[0].smc_count, 0);
    }

    #[test]
    fn second_sighting_emits_the_difference() {
        let mut differ = ThreadStatsDiffer::new(DEFAULT_STALE_TIMEOUT);
        let t0 = Instant::now();
        differ.sample(&[stats(7, 1_000, 5)], t0);
        let out = differ.sample(&[stats(7, 1_500, 9)], t0 + Duration::from_secs(1));
        assert_eq!(out.per_thread_deltas[0].jit_time, 500);
        assert_eq!(out.per_thread_deltas[0].smc_count, 4);
    }

    #[test]
    fn regression_clamps_only_the_regressed_counter() {
        let mut differ = ThreadStatsDiffer::new(DEFAULT_STALE_TIMEOUT);
        let t0 = Instant::now();
        differ.sample(&[stats(7, 1_000, 5)], t0);
        // jit_time went backwards, smc_count kept counting.
        let out = differ.sample(&[stats(7, 400, 8)], t0 + Duration::from_secs(1));
        assert_eq!(out.per_thread_deltas[0].jit_time, 0);
        assert_eq!(out.per_thread_deltas[0].smc_count, 3);

        // previous re-seated to the regressed value, so counting resumes.
        let out = differ.sample(&[stats(7, 600, 8)], t0 + Duration::from_secs(2));
        assert_eq!(out.per_thread_deltas[0].jit_time, 200);
    }

    #[test]
    fn stale_threads_are_evicted() {
        let mut differ = ThreadStatsDiffer::new(DEFAULT_STALE_TIMEOUT);
        let t0 = Instant::now();
        differ.sample(&[stats(1, 10, 0)], t0);
        differ.sample(&[stats(2, 20, 0)], t0 + Duration::from_secs(1));
        assert_eq!(differ.tracked_tids(), vec![1, 2]);

        // tid 1 was last seen at t0; by t0+11s it has been gone >= 10s.
        differ.sample(&[stats(2, 30, 0)], t0 + Duration::from_secs(11));
        assert_eq!(differ.tracked_tids(), vec![2]);
    }

    #[test]
    fn reappearing_after_eviction_starts_from_zero() {
        let mut differ = ThreadStatsDiffer::new(Duration::from_secs(10));
        let t0 = Instant::now();
        differ.sample(&[stats(1, 10_000, 0)], t0);
        differ.sample(&[], t0 + Duration::from_secs(11));
        let out = differ.sample(&[stats(1, 50_000, 0)], t0 + Duration::from_secs(12));
        assert_eq!(out.per_thread_deltas[0].jit_time, 0);
    }
}
