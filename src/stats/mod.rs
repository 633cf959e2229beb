//! Byte layout of the profiling region FEX publishes at `/dev/shm/fex-<pid>-stats`.
//!
//! The region starts with a fixed [`RawStatsHeader`] followed by an intrusive
//! singly-linked list of [`ThreadStats`] records. All offsets in the list are
//! relative to the start of the region. The producer appends records and bumps
//! the `size` field when it grows the region; it never moves existing records.

pub mod reader;

use std::mem;

use serde::{Deserialize, Serialize};

/// Layout version this build understands. Anything else is rejected at attach.
pub const STATS_VERSION: u8 = 2;

/// Length of the NUL-terminated FEX version string in the header.
pub const FEX_VERSION_LEN: usize = 48;

/// Header at the start of the shared region. Field order and widths mirror the
/// producer; `head` and `size` are updated atomically on the producer side and
/// must only be read with volatile loads.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStatsHeader {
    pub version: u8,
    pub app_type: u8,
    pub thread_stats_size: u16,
    pub fex_version: [u8; FEX_VERSION_LEN],
    pub head: u32,
    pub size: u32,
    pub reserved: [u8; 4],
}

/// Owned copy of the header with the text field decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsHeader {
    pub version: u8,
    pub app_type: AppType,
    pub thread_stats_size: u16,
    pub fex_version: String,
    pub head: u32,
    pub size: u32,
}

/// Guest application flavour reported by the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppType {
    Linux32,
    Linux64,
    WinArm64ec,
    WinWow64,
    Unknown,
}

impl From<u8> for AppType {
    fn from(value: u8) -> Self {
        match value {
            0 => AppType::Linux32,
            1 => AppType::Linux64,
            2 => AppType::WinArm64ec,
            3 => AppType::WinWow64,
            _ => AppType::Unknown,
        }
    }
}

impl std::fmt::Display for AppType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AppType::Linux32 => "Linux32",
            AppType::Linux64 => "Linux64",
            AppType::WinArm64ec => "WinArm64ec",
            AppType::WinWow64 => "WinWow64",
            AppType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// One per-thread counter record in the region.
///
/// Records are 16-byte aligned and their size is a multiple of 16, which is
/// what lets the reader copy them with 16-byte single-copy-atomic loads on
/// aarch64. All counters are monotonically increasing; the time-valued ones
/// are in raw cycle-counter ticks.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    pub next: u32,
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

const _: () = assert!(mem::size_of::<RawStatsHeader>() == 64);
const _: () = assert!(mem::size_of::<ThreadStats>() % 16 == 0);
