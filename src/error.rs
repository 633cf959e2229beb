use std::path::PathBuf;

use thiserror::Error;

/// Failures while attaching to a running emulator. All of these are fatal at
/// session start; nothing here is retried.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("could not open stats region {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("stats region is only {size} bytes, too small to hold a header")]
    RegionTooSmall { size: u64 },

    #[error("stats region has layout version {found}, this build expects {expected}")]
    VersionMismatch { found: u8, expected: u8 },

    #[error("could not map stats region: {0}")]
    MapFailed(std::io::Error),

    #[error("could not open {path}: {source}")]
    MemMapsUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures while writing or reading a recording. A missing EOF marker is
/// deliberately not here: truncated files load as a prefix with a warning.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("not a fextop recording (bad magic)")]
    BadMagic,

    #[error("unsupported recording format version {0}")]
    UnsupportedVersion(u8),

    #[error("recording metadata is unreadable: {0}")]
    BadMetadata(bincode::Error),

    #[error("recording i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame encoding failed: {0}")]
    Encode(#[from] bincode::Error),
}
