//! Converts per-period deltas and elapsed time into load figures and the
//! scrolling histogram.

use std::collections::VecDeque;

use crate::frame::{ComputedFrame, HistogramEntry, MemSnapshot, PeriodTotals, ThreadLoad};
use crate::sampler::differ::DifferOutput;

/// Number of past periods the chart keeps.
pub const HISTOGRAM_CAPACITY: usize = 200;

/// Per-thread load entries are capped at this many even on very wide machines.
pub const MAX_THREAD_LOADS: usize = 32;

/// Fixed-capacity queue of past period summaries, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramRing {
    entries: VecDeque<HistogramEntry>,
}

impl HistogramRing {
    pub fn new() -> Self {
        HistogramRing {
            entries: VecDeque::with_capacity(HISTOGRAM_CAPACITY),
        }
    }

    pub fn push(&mut self, entry: HistogramEntry) {
        if self.entries.len() == HISTOGRAM_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &HistogramEntry> {
        self.entries.iter()
    }

    pub fn newest(&self) -> Option<&HistogramEntry> {
        self.entries.back()
    }
}

pub struct LoadAccumulator {
    cycle_frequency: u64,
    hardware_concurrency: u32,
    histogram: HistogramRing,
    prev_monotonic_ns: Option<u64>,
}

impl LoadAccumulator {
    pub fn new(cycle_frequency: u64, hardware_concurrency: u32) -> Self {
        LoadAccumulator {
            cycle_frequency,
            hardware_concurrency,
            histogram: HistogramRing::new(),
            prev_monotonic_ns: None,
        }
    }

    pub fn histogram(&self) -> &HistogramRing {
        &self.histogram
    }

    /// Folds one differ pass into a frame. The first pass has no prior
    /// timestamp, so it produces a frame with zeroed derived fields and does
    /// not touch the histogram.
    pub fn compute(
        &mut self,
        sample: DifferOutput,
        mem: Option<MemSnapshot>,
        monotonic_ns: u64,
        unix_time_ms: u64,
    ) -> ComputedFrame {
        let mut totals = PeriodTotals::default();
        for delta in &sample.per_thread_deltas {
            totals.accumulate(delta);
        }

        let Some(prev_ns) = self.prev_monotonic_ns.replace(monotonic_ns) else {
            return ComputedFrame {
                unix_time_ms,
                monotonic_ns,
                sample_period_ns: 0,
                threads_sampled: sample.threads_sampled,
                totals,
                fex_load_percent: 0.0,
                thread_loads: Vec::new(),
                mem,
                per_thread_deltas: sample.per_thread_deltas,
            };
        };

        let sample_period_ns = monotonic_ns.saturating_sub(prev_ns);
        let max_cycles = self.cycle_frequency as f64 * (sample_period_ns as f64 / 1e9);
        let active_cores = self.hardware_concurrency.min(sample.threads_sampled);

        let fex_load_percent = if active_cores == 0 || max_cycles <= 0.0 {
            0.0
        } else {
            totals.jit_time as f64 / (max_cycles * active_cores as f64) * 100.0
        };

        let mut thread_loads: Vec<ThreadLoad> = sample
            .per_thread_deltas
            .iter()
            .map(|delta| ThreadLoad {
                tid: delta.tid,
                load_percent: if max_cycles > 0.0 {
                    delta.jit_time as f64 / max_cycles * 100.0
                } else {
                    0.0
                },
                total_cycles: delta.jit_time + delta.signal_time,
            })
            .collect();
        thread_loads.sort_by(|a, b| b.total_cycles.cmp(&a.total_cycles));
        thread_loads.truncate((self.hardware_concurrency as usize).min(MAX_THREAD_LOADS));

        self.histogram
            .push(HistogramEntry::from_totals(fex_load_percent, &totals, max_cycles));

        ComputedFrame {
            unix_time_ms,
            monotonic_ns,
            sample_period_ns,
            threads_sampled: sample.threads_sampled,
            totals,
            fex_load_percent,
            thread_loads,
            mem,
            per_thread_deltas: sample.per_thread_deltas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ThreadDelta;
    use std::time::Instant;

    const GHZ: u64 = 1_000_000_000;
    const SECOND_NS: u64 = 1_000_000_000;

    fn delta(tid: u32, jit_time: u64) -> ThreadDelta {
        ThreadDelta {
            tid,
            jit_time,
            ..ThreadDelta::default()
        }
    }

    fn pass(deltas: Vec<ThreadDelta>) -> DifferOutput {
        DifferOutput {
            timestamp: Instant::now(),
            threads_sampled: deltas.len() as u32,
            per_thread_deltas: deltas,
        }
    }

    #[test]
    fn first_pass_emits_zeroed_derived_fields_and_no_histogram_entry() {
        let mut acc = LoadAccumulator::new(GHZ, 4);
        let frame = acc.compute(pass(vec![delta(7, 0)]), None, 0, 0);
        assert_eq!(frame.sample_period_ns, 0);
        assert_eq!(frame.fex_load_percent, 0.0);
        assert!(frame.thread_loads.is_empty());
        assert!(acc.histogram().is_empty());
    }

    #[test]
    fn single_thread_half_a_core() {
        let mut acc = LoadAccumulator::new(GHZ, 4);
        acc.compute(pass(vec![delta(7, 0)]), None, 0, 0);
        let frame = acc.compute(pass(vec![delta(7, 500_000_000)]), None, SECOND_NS, 1_000);

        assert_eq!(frame.totals.jit_time, 500_000_000);
        assert_eq!(frame.fex_load_percent, 50.0);
        assert_eq!(frame.thread_loads.len(), 1);
        assert_eq!(frame.thread_loads[0].tid, 7);
        assert_eq!(frame.thread_loads[0].load_percent, 50.0);
        assert_eq!(frame.thread_loads[0].total_cycles, 500_000_000);

        let entry = acc.histogram().newest().unwrap();
        assert_eq!(entry.load_percent, 50.0);
        assert!(!entry.high_jit_load);
        assert!(!entry.high_invalidation);
        assert!(!entry.high_sigbus);
        assert!(!entry.high_softfloat);
    }

    #[test]
    fn more_than_one_core_of_jit_is_flagged() {
        let mut acc = LoadAccumulator::new(GHZ, 4);
        acc.compute(pass(vec![delta(7, 0)]), None, 0, 0);
        let frame = acc.compute(pass(vec![delta(7, 1_500_000_000)]), None, SECOND_NS, 1_000);

        assert_eq!(frame.fex_load_percent, 150.0);
        assert!(acc.histogram().newest().unwrap().high_jit_load);
    }

    #[test]
    fn thread_loads_are_sorted_and_capped_by_core_count() {
        let mut acc = LoadAccumulator::new(GHZ, 4);
        acc.compute(pass(Vec::new()), None, 0, 0);

        let deltas: Vec<ThreadDelta> = (0..8).map(|i| delta(i, (i as u64 + 1) * 1_000)).collect();
        let frame = acc.compute(pass(deltas), None, SECOND_NS, 1_000);

        assert_eq!(frame.thread_loads.len(), 4);
        assert_eq!(frame.thread_loads[0].tid, 7);
        assert!(frame
            .thread_loads
            .windows(2)
            .all(|w| w[0].total_cycles >= w[1].total_cycles));
    }

    #[test]
    fn thread_loads_never_exceed_thirty_two() {
        let mut acc = LoadAccumulator::new(GHZ, 128);
        acc.compute(pass(Vec::new()), None, 0, 0);
        let deltas: Vec<ThreadDelta> = (0..64).map(|i| delta(i, 1_000)).collect();
        let frame = acc.compute(pass(deltas), None, SECOND_NS, 1_000);
        assert_eq!(frame.thread_loads.len(), MAX_THREAD_LOADS);
    }

    #[test]
    fn totals_equal_the_sum_of_deltas() {
        let mut acc = LoadAccumulator::new(GHZ, 4);
        acc.compute(pass(Vec::new()), None, 0, 0);
        let deltas = vec![delta(1, 100), delta(2, 250), delta(3, 50)];
        let frame = acc.compute(pass(deltas.clone()), None, SECOND_NS, 1_000);
        let sum: u64 = deltas.iter().map(|d| d.jit_time).sum();
        assert_eq!(frame.totals.jit_time, sum);
        assert_eq!(frame.per_thread_deltas, deltas);
    }

    #[test]
    fn histogram_keeps_the_newest_two_hundred() {
        let mut acc = LoadAccumulator::new(GHZ, 4);
        for i in 0..=220u64 {
            acc.compute(
                pass(vec![delta(7, i * 1_000_000)]),
                None,
                i * SECOND_NS,
                i * 1_000,
            );
        }
        assert_eq!(acc.histogram().len(), HISTOGRAM_CAPACITY);
        // Pass 21 is the oldest survivor: 220 periods, the first pass adds none.
        let oldest = acc.histogram().iter().next().unwrap();
        assert_eq!(
            oldest.load_percent,
            (21.0f64 * 1_000_000.0 / 1e9 * 100.0) as f32
        );
    }

    #[test]
    fn no_threads_means_zero_load() {
        let mut acc = LoadAccumulator::new(GHZ, 4);
        acc.compute(pass(Vec::new()), None, 0, 0);
        let frame = acc.compute(pass(Vec::new()), None, SECOND_NS, 1_000);
        assert_eq!(frame.fex_load_percent, 0.0);
    }
}
