//! Resident-memory sampling from `/proc/<pid>/smaps`.
//!
//! The emulator names its anonymous mappings, which is what lets us split
//! the resident set into JIT code, dispatcher scratch, lookup tables and so
//! on. Parsing runs on its own worker thread because a wide smaps file can
//! take longer to read than a sampling pass is allowed to; the latest
//! snapshot is published whole into a shared slot.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::AttachError;
use crate::frame::{LargestAnon, MemSnapshot};

#[derive(Clone, Copy)]
enum Category {
    JitCode,
    OpDispatcher,
    Frontend,
    CpuBackend,
    LookupL1,
    Lookup,
    ThreadStates,
    BlockLinks,
    Misc,
    Unaccounted,
    Allocator,
}

/// First match wins; `FEXMem_Lookup_L1` must be probed before `FEXMem_Lookup`.
fn classify(name: &str) -> Option<Category> {
    const TAGS: &[(&str, Category)] = &[
        ("FEXMemJIT", Category::JitCode),
        ("FEXMem_OpDispatcher", Category::OpDispatcher),
        ("FEXMem_Frontend", Category::Frontend),
        ("FEXMem_CPUBackend", Category::CpuBackend),
        ("FEXMem_Lookup_L1", Category::LookupL1),
        ("FEXMem_Lookup", Category::Lookup),
        ("FEXMem_ThreadState", Category::ThreadStates),
        ("FEXMem_BlockLinks", Category::BlockLinks),
        ("FEXMem_Misc", Category::Misc),
        ("FEXMem", Category::Unaccounted),
        ("JEMalloc", Category::Allocator),
        ("FEXAllocator", Category::Allocator),
    ];
    TAGS.iter()
        .find(|(tag, _)| name.contains(tag))
        .map(|&(_, category)| category)
}

fn take_field<'a>(p: &mut &'a str) -> &'a str {
    let trimmed = p.trim_start();
    let end = trimmed
        .find(char::is_whitespace)
        .unwrap_or(trimmed.len());
    let (field, rest) = trimmed.split_at(end);
    *p = rest;
    field
}

/// `begin-end perms offset dev inode name` — the line that starts each
/// mapping block. Key-value lines fail the address-range parse.
fn parse_block_header(line: &str) -> Option<(u64, u64, &str)> {
    let mut rest = line;
    let range = take_field(&mut rest);
    let (begin, end) = range.split_once('-')?;
    let begin = u64::from_str_radix(begin, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    for _ in 0..4 {
        take_field(&mut rest);
    }
    Some((begin, end, rest.trim()))
}

/// `Rss:    1234 kB`
fn parse_rss_bytes(line: &str) -> Option<u64> {
    let rest = line.strip_prefix("Rss:")?;
    let mut parts = rest.split_whitespace();
    let value: u64 = parts.next()?.parse().ok()?;
    match parts.next() {
        Some("kB") => Some(value * 1024),
        _ => None,
    }
}

/// Walks the smaps text once, summing resident sizes per category.
pub fn parse_smaps(smaps: &str) -> MemSnapshot {
    let mut snap = MemSnapshot::default();
    let mut current: Option<(Category, u64, u64)> = None;

    for line in smaps.lines() {
        if let Some((begin, end, name)) = parse_block_header(line) {
            current = classify(name).map(|category| (category, begin, end));
        } else if let Some(rss) = parse_rss_bytes(line) {
            // One Rss line per block; drop the block so a stray duplicate
            // cannot double-count.
            if let Some((category, begin, end)) = current.take() {
                let slot = match category {
                    Category::JitCode => &mut snap.jit_code,
                    Category::OpDispatcher => &mut snap.op_dispatcher,
                    Category::Frontend => &mut snap.frontend,
                    Category::CpuBackend => &mut snap.cpu_backend,
                    Category::LookupL1 => &mut snap.lookup_l1,
                    Category::Lookup => &mut snap.lookup,
                    Category::ThreadStates => &mut snap.thread_states,
                    Category::BlockLinks => &mut snap.block_links,
                    Category::Misc => &mut snap.misc,
                    Category::Unaccounted => &mut snap.unaccounted,
                    Category::Allocator => &mut snap.allocator,
                };
                *slot += rss;
                snap.total_anon += rss;
                if matches!(category, Category::Allocator) && rss > snap.largest_anon.size {
                    snap.largest_anon = LargestAnon {
                        begin,
                        end,
                        size: rss,
                    };
                }
            }
        }
    }

    snap
}

/// Re-reads `/proc/<pid>/smaps` through a single kept-open handle.
pub struct MemMapSampler {
    file: File,
    text: String,
}

impl MemMapSampler {
    pub fn open(pid: u32) -> Result<Self, AttachError> {
        let path = PathBuf::from(format!("/proc/{pid}/smaps"));
        let file = File::open(&path).map_err(|source| AttachError::MemMapsUnavailable {
            path,
            source,
        })?;
        Ok(MemMapSampler {
            file,
            text: String::new(),
        })
    }

    /// One pass. Returns `None` when the pass yielded zero resident bytes,
    /// which happens transiently while the target is tearing down mappings;
    /// callers keep their last good snapshot in that case.
    pub fn sample(&mut self) -> std::io::Result<Option<MemSnapshot>> {
        self.file.seek(SeekFrom::Start(0))?;
        self.text.clear();
        self.file.read_to_string(&mut self.text)?;
        let snap = parse_smaps(&self.text);
        if snap.total_anon == 0 {
            return Ok(None);
        }
        Ok(Some(snap))
    }
}

/// Worker thread wrapper around [`MemMapSampler`]. The snapshot slot is the
/// only datum shared with the sampling flow; it is replaced whole, so a
/// reader sees either the previous or the new snapshot.
pub struct MemSamplerHandle {
    slot: Arc<Mutex<Option<MemSnapshot>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MemSamplerHandle {
    pub fn spawn(pid: u32, period: Duration) -> Result<Self, AttachError> {
        let mut sampler = MemMapSampler::open(pid)?;
        let slot = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = std::thread::spawn({
            let slot = Arc::clone(&slot);
            let shutdown = Arc::clone(&shutdown);
            move || {
                while !shutdown.load(Ordering::Relaxed) {
                    match sampler.sample() {
                        Ok(Some(snap)) => *slot.lock().unwrap() = Some(snap),
                        Ok(None) => debug!("discarding empty memory-map pass"),
                        Err(err) => {
                            // The target going away mid-read lands here; the
                            // liveness watcher ends the session, we just stop
                            // refreshing.
                            warn!("memory-map pass failed: {err}");
                        }
                    }
                    let deadline = Instant::now() + period;
                    while Instant::now() < deadline {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(50).min(period));
                    }
                }
            }
        });

        Ok(MemSamplerHandle {
            slot,
            shutdown,
            worker: Some(worker),
        })
    }

    pub fn latest(&self) -> Option<MemSnapshot> {
        *self.slot.lock().unwrap()
    }
}

impl Drop for MemSamplerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
