//! Loads a recording into memory, tolerating truncated files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bincode::Options;
use log::{debug, warn};

use crate::error::RecordingError;
use crate::frame::ComputedFrame;
use crate::source::SessionMetadata;

use super::{codec, EOF_MARKER, FORMAT_VERSION, MAGIC, MAX_FRAME_LEN};

pub struct Recording {
    pub metadata: SessionMetadata,
    pub frames: Vec<ComputedFrame>,
    /// The file ended without its EOF marker. The frames loaded are a valid
    /// prefix of the original session.
    pub truncated: bool,
}

impl Recording {
    pub fn open(path: &Path) -> Result<Self, RecordingError> {
        let mut file = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(RecordingError::BadMagic);
        }
        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(RecordingError::UnsupportedVersion(version[0]));
        }

        let mut decoder = zstd::stream::Decoder::new(file)?;
        let metadata: SessionMetadata = codec()
            .deserialize_from(&mut decoder)
            .map_err(RecordingError::BadMetadata)?;

        let mut frames = Vec::new();
        let mut truncated = false;
        loop {
            let mut word = [0u8; 4];
            if let Err(err) = decoder.read_exact(&mut word) {
                debug!("recording stream ended without EOF marker: {err}");
                truncated = true;
                break;
            }
            if word == EOF_MARKER {
                break;
            }
            let len = u32::from_le_bytes(word);
            if len > MAX_FRAME_LEN {
                debug!("implausible frame length {len}, treating as truncation");
                truncated = true;
                break;
            }
            let mut buf = vec![0u8; len as usize];
            if let Err(err) = decoder.read_exact(&mut buf) {
                debug!("frame cut short: {err}");
                truncated = true;
                break;
            }
            match codec().deserialize::<ComputedFrame>(&buf) {
                Ok(frame) => frames.push(frame),
                Err(err) => {
                    debug!("undecodable frame: {err}");
                    truncated = true;
                    break;
                }
            }
        }

        if truncated {
            warn!(
                "recording {} is truncated; loaded {} frame(s)",
                path.display(),
                frames.len()
            );
        }

        Ok(Recording {
            metadata,
            frames,
            truncated,
        })
    }
}
