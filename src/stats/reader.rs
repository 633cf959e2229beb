//! Read-only access to the stats region of a running emulator.
//!
//! The producer updates the region concurrently with our reads and never
//! coordinates with us, so nothing in here holds a reference into the
//! mapping: every read is a volatile load and every record comes back as an
//! owned copy. A fence before each pass makes the producer's plain stores
//! observable, and record copies happen in 16-byte loads on aarch64 to get
//! single-copy atomicity at the counter pair width.

use std::fs::File;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{fence, Ordering};

use memmap2::{Mmap, MmapOptions};

use crate::error::AttachError;
use crate::stats::{RawStatsHeader, StatsHeader, ThreadStats, STATS_VERSION};

const HEADER_SIZE: usize = mem::size_of::<RawStatsHeader>();
const RECORD_SIZE: usize = mem::size_of::<ThreadStats>();

/// Where the emulator publishes the stats region for a given pid.
pub fn region_path(pid: u32) -> PathBuf {
    PathBuf::from(format!("/dev/shm/fex-{pid}-stats"))
}

/// Result of walking the thread list once.
pub struct ThreadWalk {
    pub records: Vec<ThreadStats>,
    /// An out-of-range offset cut the walk short. The records gathered up to
    /// that point are still valid.
    pub truncated: bool,
}

#[derive(Debug)]
pub struct ShmReader {
    file: File,
    map: Mmap,
}

impl ShmReader {
    pub fn open(pid: u32) -> Result<Self, AttachError> {
        Self::open_path(&region_path(pid))
    }

    pub fn open_path(path: &Path) -> Result<Self, AttachError> {
        let file = File::open(path).map_err(|source| AttachError::OpenFailed {
            path: path.to_owned(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| AttachError::OpenFailed {
                path: path.to_owned(),
                source,
            })?
            .len();
        if (len as usize) < HEADER_SIZE {
            return Err(AttachError::RegionTooSmall { size: len });
        }
        let map = unsafe { MmapOptions::new().len(len as usize).map(&file) }
            .map_err(AttachError::MapFailed)?;

        let reader = ShmReader { file, map };
        let version = reader.header().version;
        if version != STATS_VERSION {
            return Err(AttachError::VersionMismatch {
                found: version,
                expected: STATS_VERSION,
            });
        }
        Ok(reader)
    }

    fn raw(&self) -> *const RawStatsHeader {
        self.map.as_ptr() as *const RawStatsHeader
    }

    /// Volatile copy of the header. `head` and `size` are the producer's
    /// atomics; the rest only changes at producer startup.
    pub fn header(&self) -> StatsHeader {
        let raw = self.raw();
        unsafe {
            let version = ptr::read_volatile(ptr::addr_of!((*raw).version));
            let app_type = ptr::read_volatile(ptr::addr_of!((*raw).app_type));
            let thread_stats_size = ptr::read_volatile(ptr::addr_of!((*raw).thread_stats_size));
            let mut fex_version = [0u8; crate::stats::FEX_VERSION_LEN];
            let src = ptr::addr_of!((*raw).fex_version) as *const u8;
            for (i, byte) in fex_version.iter_mut().enumerate() {
                *byte = ptr::read_volatile(src.add(i));
            }
            let head = ptr::read_volatile(ptr::addr_of!((*raw).head));
            let size = ptr::read_volatile(ptr::addr_of!((*raw).size));

            let nul = fex_version
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(fex_version.len());
            StatsHeader {
                version,
                app_type: app_type.into(),
                thread_stats_size,
                fex_version: String::from_utf8_lossy(&fex_version[..nul]).into_owned(),
                head,
                size,
            }
        }
    }

    /// Compares the header's `size` against the current mapping and remaps at
    /// the new length when they differ. The base address may move; callers
    /// must not cache pointers across passes.
    pub fn remap_if_resized(&mut self) -> Result<(), AttachError> {
        let size = unsafe { ptr::read_volatile(ptr::addr_of!((*self.raw()).size)) } as usize;
        if size == self.map.len() || size < HEADER_SIZE {
            return Ok(());
        }
        self.map = unsafe { MmapOptions::new().len(size).map(&self.file) }
            .map_err(AttachError::MapFailed)?;
        Ok(())
    }

    /// One sampling pass: fence, then walk the thread list from `head`,
    /// copying each record out of the mapping. Offsets are bounds-checked
    /// against the current `size` before every dereference; a bad offset
    /// truncates the walk rather than faulting.
    pub fn sample(&self) -> ThreadWalk {
        fence(Ordering::SeqCst);

        let header = self.header();
        let producer_record = usize::from(header.thread_stats_size);
        let copy_len = producer_record.min(RECORD_SIZE);
        let region_size = (header.size as usize).min(self.map.len());
        let base = self.map.as_ptr();

        let mut records = Vec::new();
        let mut truncated = false;
        // An offset chain longer than the region can hold is a cycle.
        let max_records = if producer_record == 0 {
            0
        } else {
            region_size / producer_record + 1
        };

        let mut offset = header.head as usize;
        while offset != 0 {
            if producer_record == 0
                || records.len() >= max_records
                || offset.checked_add(producer_record).map_or(true, |end| end > region_size)
            {
                truncated = true;
                break;
            }
            let record = unsafe { copy_record(base.add(offset), copy_len) };
            offset = record.next as usize;
            records.push(record);
        }

        ThreadWalk { records, truncated }
    }
}

/// Copies `len` bytes of a record out of the mapping into an owned value.
/// On aarch64 the aligned body is read in 16-byte volatile loads; elsewhere
/// (development hosts) a byte-wise volatile copy has to do.
unsafe fn copy_record(src: *const u8, len: usize) -> ThreadStats {
    let mut raw = [0u8; RECORD_SIZE];
    let len = len.min(RECORD_SIZE);

    #[cfg(target_arch = "aarch64")]
    {
        if src as usize % 16 == 0 {
            let chunks = len / 16;
            for i in 0..chunks {
                let value = ptr::read_volatile((src as *const u128).add(i));
                ptr::write_unaligned(raw.as_mut_ptr().cast::<u128>().add(i), value);
            }
            for i in chunks * 16..len {
                raw[i] = ptr::read_volatile(src.add(i));
            }
        } else {
            for (i, byte) in raw.iter_mut().enumerate().take(len) {
                *byte = ptr::read_volatile(src.add(i));
            }
        }
    }

    #[cfg(not(target_arch = "aarch64"))]
    for (i, byte) in raw.iter_mut().enumerate().take(len) {
        *byte = ptr::read_volatile(src.add(i));
    }

    ptr::read_unaligned(raw.as_ptr() as *const ThreadStats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    struct RegionBuilder {
        bytes: Vec<u8>,
    }

    impl RegionBuilder {
        fn new(region_size: u32, head: u32) -> Self {
            let mut bytes = vec![0u8; region_size as usize];
            bytes[0] = STATS_VERSION;
            bytes[1] = 1; // Linux64
            bytes[2..4].copy_from_slice(&(RECORD_SIZE as u16).to_ne_bytes());
            bytes[4..4 + 6].copy_from_slice(b"FEX-91");
            bytes[52..56].copy_from_slice(&head.to_ne_bytes());
            bytes[56..60].copy_from_slice(&region_size.to_ne_bytes());
            RegionBuilder { bytes }
        }

        fn record(mut self, offset: usize, stats: ThreadStats) -> Self {
            let raw: [u8; RECORD_SIZE] = unsafe { mem::transmute(stats) };
            self.bytes[offset..offset + RECORD_SIZE].copy_from_slice(&raw);
            self
        }

        fn write_to(self, file: &mut File) {
            file.seek(SeekFrom::Start(0)).unwrap();
            file.write_all(&self.bytes).unwrap();
            file.flush().unwrap();
        }
    }

    fn stats(tid: u32, next: u32, jit_time: u64) -> ThreadStats {
        ThreadStats {
            next,
            tid,
            jit_time,
            ..ThreadStats::default()
        }
    }

    fn temp_region() -> (tempfile::TempDir, PathBuf, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fex-1234-stats");
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        (dir, path, file)
    }

    #[test]
    fn walks_the_thread_list() {
        let (_dir, path, mut file) = temp_region();
        RegionBuilder::new(4096, 64)
            .record(64, stats(7, 160, 111))
            .record(160, stats(8, 0, 222))
            .write_to(&mut file);

        let reader = ShmReader::open_path(&path).unwrap();
        let header = reader.header();
        assert_eq!(header.fex_version, "FEX-91");
        assert_eq!(header.app_type, crate::stats::AppType::Linux64);

        let walk = reader.sample();
        assert!(!walk.truncated);
        assert_eq!(walk.records.len(), 2);
        assert_eq!(walk.records[0].tid, 7);
        assert_eq!(walk.records[0].jit_time, 111);
        assert_eq!(walk.records[1].tid, 8);
        assert_eq!(walk.records[1].jit_time, 222);
    }

    #[test]
    fn rejects_unknown_version() {
        let (_dir, path, mut file) = temp_region();
        let mut region = RegionBuilder::new(4096, 0);
        region.bytes[0] = STATS_VERSION + 1;
        region.write_to(&mut file);

        match ShmReader::open_path(&path) {
            Err(AttachError::VersionMismatch { found, expected }) => {
                assert_eq!(found, STATS_VERSION + 1);
                assert_eq!(expected, STATS_VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn rejects_undersized_region() {
        let (_dir, path, mut file) = temp_region();
        file.write_all(&[0u8; 32]).unwrap();
        assert!(matches!(
            ShmReader::open_path(&path),
            Err(AttachError::RegionTooSmall { size: 32 })
        ));
    }

    #[test]
    fn out_of_range_offset_truncates_the_walk() {
        let (_dir, path, mut file) = temp_region();
        // Second record's `next` points past the end of the region.
        RegionBuilder::new(4096, 64)
            .record(64, stats(7, 4096, 111))
            .write_to(&mut file);

        let reader = ShmReader::open_path(&path).unwrap();
        let walk = reader.sample();
        assert!(walk.truncated);
        assert_eq!(walk.records.len(), 1);
        assert_eq!(walk.records[0].tid, 7);
    }

    #[test]
    fn cyclic_offsets_do_not_hang() {
        let (_dir, path, mut file) = temp_region();
        RegionBuilder::new(4096, 64)
            .record(64, stats(7, 64, 1))
            .write_to(&mut file);

        let reader = ShmReader::open_path(&path).unwrap();
        let walk = reader.sample();
        assert!(walk.truncated);
    }

    #[test]
    fn region_growth_is_observed_after_remap() {
        let (_dir, path, mut file) = temp_region();
        RegionBuilder::new(4096, 64)
            .record(64, stats(7, 0, 111))
            .write_to(&mut file);

        let mut reader = ShmReader::open_path(&path).unwrap();
        assert_eq!(reader.sample().records.len(), 1);

        // The producer grows the file and links in a record past the old end.
        RegionBuilder::new(8192, 64)
            .record(64, stats(7, 4160, 111))
            .record(4160, stats(9, 0, 333))
            .write_to(&mut file);

        reader.remap_if_resized().unwrap();
        let walk = reader.sample();
        assert!(!walk.truncated);
        assert_eq!(walk.records.len(), 2);
        assert_eq!(walk.records[1].tid, 9);
        assert_eq!(walk.records[1].jit_time, 333);
    }

    #[test]
    fn short_producer_records_copy_only_their_prefix() {
        let (_dir, path, mut file) = temp_region();
        // Producer built against an older layout: 32-byte records, so only
        // next/tid and the first three counters are present.
        let mut region = RegionBuilder::new(4096, 64).record(64, stats(7, 0, 111));
        region.bytes[2..4].copy_from_slice(&32u16.to_ne_bytes());
        // Poison the bytes past the producer's record size; they must not
        // end up in the copied record.
        for byte in &mut region.bytes[64 + 32..64 + RECORD_SIZE] {
            *byte = 0xff;
        }
        region.write_to(&mut file);

        let reader = ShmReader::open_path(&path).unwrap();
        let walk = reader.sample();
        assert_eq!(walk.records[0].jit_time, 111);
        assert_eq!(walk.records[0].cache_miss_count, 0);
        assert_eq!(walk.records[0].jit_count, 0);
    }
}
