//! On-disk recording format.
//!
//! ```text
//! MAGIC(4) | FORMAT_VERSION(1) | zstd stream {
//!     SessionMetadata (bincode, varint)
//!     { frame_len: u32 LE | frame bytes (bincode, varint) }*
//!     EOF_MARKER(4)
//! }
//! ```
//!
//! Everything after the version byte goes through one streaming zstd frame.
//! A file that ends without the EOF marker (crash, disk full, writer
//! dropped) is still loadable up to the last complete frame.

pub mod reader;
pub mod replay;
pub mod writer;

use bincode::Options;

pub const MAGIC: [u8; 4] = *b"WTFR";
pub const EOF_MARKER: [u8; 4] = *b"WEOF";
pub const FORMAT_VERSION: u8 = 1;
pub const COMPRESSION_LEVEL: i32 = 3;

/// Frames are small; anything claiming to be bigger than this is a corrupt
/// length word, not a frame.
pub(crate) const MAX_FRAME_LEN: u32 = 16 << 20;

/// Varint bincode, little-endian: compact, stable, fields in declared order.
pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new()
}
