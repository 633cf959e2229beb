//! CSV export of a frame sequence. The column set is consumed by external
//! tooling, so it only ever grows at the end.

use std::io::{self, Write};

use crate::frame::{ComputedFrame, MemSnapshot};

const BASE_COLUMNS: &str = "timestamp_ms,sample_period_ms,threads_sampled,fex_load_percent,\
total_jit_time,total_signal_time,total_sigbus_count,total_smc_count,\
total_float_fallback_count,total_cache_miss_count,\
total_cache_read_lock_time,total_cache_write_lock_time,\
total_jit_count,total_jit_invocations,\
mem_total_anon,mem_jit_code,mem_op_dispatcher,mem_frontend,\
mem_cpu_backend,mem_lookup,mem_lookup_l1,mem_thread_states,\
mem_block_links,mem_misc,mem_allocator,mem_unaccounted";

pub fn export_csv<W: Write>(out: &mut W, frames: &[ComputedFrame]) -> io::Result<()> {
    let thread_columns = frames
        .iter()
        .map(|frame| frame.thread_loads.len())
        .max()
        .unwrap_or(0);

    write!(out, "{BASE_COLUMNS}")?;
    for i in 0..thread_columns {
        write!(out, ",thread_{i}_load,thread_{i}_cycles")?;
    }
    writeln!(out)?;

    let mut jit_invocations: u64 = 0;
    for frame in frames {
        jit_invocations += frame.totals.jit_count;
        let mem = frame.mem.unwrap_or(MemSnapshot::default());
        let totals = &frame.totals;
        write!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            frame.unix_time_ms,
            frame.sample_period_ns as f64 / 1e6,
            frame.threads_sampled,
            frame.fex_load_percent,
            totals.jit_time,
            totals.signal_time,
            totals.sigbus_count,
            totals.smc_count,
            totals.float_fallback_count,
            totals.cache_miss_count,
            totals.cache_read_lock_time,
            totals.cache_write_lock_time,
            totals.jit_count,
            jit_invocations,
            mem.total_anon,
            mem.jit_code,
            mem.op_dispatcher,
            mem.frontend,
            mem.cpu_backend,
            mem.lookup,
            mem.lookup_l1,
            mem.thread_states,
            mem.block_links,
            mem.misc,
            mem.allocator,
            mem.unaccounted,
        )?;
        for i in 0..thread_columns {
            match frame.thread_loads.get(i) {
                Some(load) => write!(out, ",{},{}", load.load_percent, load.total_cycles)?,
                None => write!(out, ",,")?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PeriodTotals, ThreadLoad};

    fn frame(jit_time: u64, jit_count: u64, loads: Vec<ThreadLoad>) -> ComputedFrame {
        ComputedFrame {
            unix_time_ms: 1_700_000_000_000,
            monotonic_ns: 0,
            sample_period_ns: 100_000_000,
            threads_sampled: loads.len() as u32,
            totals: PeriodTotals {
                jit_time,
                jit_count,
                ..PeriodTotals::default()
            },
            fex_load_percent: 12.5,
            thread_loads: loads,
            mem: None,
            per_thread_deltas: Vec::new(),
        }
    }

    #[test]
    fn header_grows_with_the_widest_frame() {
        let frames = vec![
            frame(
                100,
                1,
                vec![ThreadLoad {
                    tid: 7,
                    load_percent: 10.0,
                    total_cycles: 100,
                }],
            ),
            frame(
                200,
                2,
                vec![
                    ThreadLoad {
                        tid: 7,
                        load_percent: 10.0,
                        total_cycles: 100,
                    },
                    ThreadLoad {
                        tid: 8,
                        load_percent: 5.0,
                        total_cycles: 50,
                    },
                ],
            ),
        ];
        let mut out = Vec::new();
        export_csv(&mut out, &frames).unwrap();
        let text = String::from_utf8(out).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.ends_with("thread_0_load,thread_0_cycles,thread_1_load,thread_1_cycles"));

        // The narrow frame pads its missing thread columns.
        let first_row = text.lines().nth(1).unwrap();
        assert!(first_row.ends_with(",10,100,,"));
    }

    #[test]
    fn jit_invocations_accumulate_across_rows() {
        let frames = vec![frame(100, 3, Vec::new()), frame(100, 4, Vec::new())];
        let mut out = Vec::new();
        export_csv(&mut out, &frames).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().skip(1).collect();

        let field = |row: &str, idx: usize| row.split(',').nth(idx).unwrap().to_owned();
        // total_jit_count is column 12, total_jit_invocations column 13.
        assert_eq!(field(rows[0], 12), "3");
        assert_eq!(field(rows[0], 13), "3");
        assert_eq!(field(rows[1], 12), "4");
        assert_eq!(field(rows[1], 13), "7");
    }

    #[test]
    fn missing_memory_snapshot_prints_zeros() {
        let frames = vec![frame(0, 0, Vec::new())];
        let mut out = Vec::new();
        export_csv(&mut out, &frames).unwrap();
        let text = String::from_utf8(out).unwrap();
        let row = text.lines().nth(1).unwrap();
        let mem_total_anon = row.split(',').nth(14).unwrap();
        assert_eq!(mem_total_anon, "0");
    }
}
