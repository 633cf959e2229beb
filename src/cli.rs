use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::sampler::{MAX_SAMPLE_PERIOD, MIN_SAMPLE_PERIOD};

#[derive(Debug, Parser)]
#[command(
    name = "fextop",
    version,
    about = r#"
fextop observes a running FEX-Emu process through its published profiling
counters: JIT load, per-thread activity and resident memory by category.

EXAMPLES:
    # Watch a guest process live (pid from `fextop list`):
    fextop top -p 12345

    # Record a session to disk while watching it:
    fextop top -p 12345 --record session.fextrace

    # Record headless, then replay and export later:
    fextop record -p 12345 -o session.fextrace
    fextop replay session.fextrace
    fextop export session.fextrace -o session.csv
"#
)]
pub struct Opt {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Attach to a running emulator and show live statistics.
    Top(TopArgs),

    /// Attach and record frames to a file without a UI.
    Record(RecordArgs),

    /// Play a recorded session back in the UI.
    Replay(ReplayArgs),

    /// Convert a recorded session to CSV.
    Export(ExportArgs),

    /// List emulator processes that publish statistics.
    List,
}

#[derive(Debug, Args)]
pub struct TopArgs {
    /// Pid of the emulator process. May be omitted when exactly one
    /// candidate is running.
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Sample period in milliseconds (10-1000).
    #[arg(long, default_value = "1000", value_parser = parse_interval)]
    pub interval: Duration,

    /// Also record every sampled frame to this file.
    #[arg(long)]
    pub record: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Pid of the emulator process. May be omitted when exactly one
    /// candidate is running.
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Output file.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Sample period in milliseconds (10-1000).
    #[arg(long, default_value = "1000", value_parser = parse_interval)]
    pub interval: Duration,

    /// Stop recording after this many seconds.
    #[arg(short, long)]
    pub duration: Option<f64>,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Path of the recording to play.
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Path of the recording to convert.
    pub file: PathBuf,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

fn parse_interval(arg: &str) -> Result<Duration, String> {
    let ms: u64 = arg
        .parse()
        .map_err(|_| format!("not a number of milliseconds: {arg}"))?;
    let interval = Duration::from_millis(ms);
    if !(MIN_SAMPLE_PERIOD..=MAX_SAMPLE_PERIOD).contains(&interval) {
        return Err(format!(
            "interval must be between {} and {} ms",
            MIN_SAMPLE_PERIOD.as_millis(),
            MAX_SAMPLE_PERIOD.as_millis()
        ));
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_bounds_are_enforced() {
        assert!(parse_interval("10").is_ok());
        assert!(parse_interval("1000").is_ok());
        assert!(parse_interval("9").is_err());
        assert!(parse_interval("1001").is_err());
        assert!(parse_interval("fast").is_err());
    }
}
