/// Recording buffer module
///
/// Keeps every frame seen during a session and writes them out as a single
/// mono 16-bit PCM WAV file when the session ends.

use crate::frame::AudioFrame;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to write recording to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

/// In-memory accumulator of session audio
///
/// Frames are stored as shared handles, so appending never copies samples.
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    frames: Vec<AudioFrame>,
    samples: usize,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, frame: &AudioFrame) {
        self.samples += frame.len();
        self.frames.push(frame.clone());
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Duration of the recorded audio at `sample_rate`
    pub fn duration_secs(&self, sample_rate: u32) -> f32 {
        self.samples as f32 / sample_rate as f32
    }

    /// Write all frames, in arrival order, to `path`
    ///
    /// Consumes the buffer. Returns `Ok(None)` without touching the
    /// filesystem when nothing was recorded.
    pub fn finalize(self, path: &Path, sample_rate: u32) -> Result<Option<PathBuf>, RecordingError> {
        if self.frames.is_empty() {
            debug!("Recording is empty, skipping write to {}", path.display());
            return Ok(None);
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let write_error = |source| RecordingError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = hound::WavWriter::create(path, spec).map_err(write_error)?;
        for &sample in self.frames.iter().flat_map(|f| f.samples().iter()) {
            writer.write_sample(sample).map_err(write_error)?;
        }
        writer.finalize().map_err(write_error)?;

        info!(
            "Wrote {} frames ({:.1}s) to {}",
            self.frames.len(),
            self.duration_secs(sample_rate),
            path.display()
        );

        Ok(Some(path.to_path_buf()))
    }
}
