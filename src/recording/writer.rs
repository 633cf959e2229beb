//! Streaming recording writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bincode::Options;
use byteorder::{LittleEndian, WriteBytesExt};
use log::warn;

use crate::error::RecordingError;
use crate::frame::ComputedFrame;
use crate::source::SessionMetadata;

use super::{codec, COMPRESSION_LEVEL, EOF_MARKER, FORMAT_VERSION, MAGIC};

pub struct RecordingWriter {
    // Taken by finish(); drop still completes the zstd stream so the file
    // stays readable, just without the EOF marker.
    encoder: Option<zstd::stream::Encoder<'static, BufWriter<File>>>,
}

impl RecordingWriter {
    pub fn create(path: &Path, metadata: &SessionMetadata) -> Result<Self, RecordingError> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&MAGIC)?;
        out.write_all(&[FORMAT_VERSION])?;
        let mut encoder = zstd::stream::Encoder::new(out, COMPRESSION_LEVEL)?;
        codec().serialize_into(&mut encoder, metadata)?;
        Ok(RecordingWriter {
            encoder: Some(encoder),
        })
    }

    pub fn write_frame(&mut self, frame: &ComputedFrame) -> Result<(), RecordingError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        let bytes = codec().serialize(frame)?;
        encoder.write_u32::<LittleEndian>(bytes.len() as u32)?;
        encoder.write_all(&bytes)?;
        Ok(())
    }

    /// Writes the EOF marker, completes the zstd stream and flushes the file.
    pub fn finish(mut self) -> Result<(), RecordingError> {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.write_all(&EOF_MARKER)?;
            let mut out = encoder.finish()?;
            out.flush()?;
        }
        Ok(())
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            match encoder.finish() {
                Ok(mut out) => {
                    let _ = out.flush();
                }
                Err(err) => warn!("could not complete recording stream: {err}"),
            }
        }
    }
}
