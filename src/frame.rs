/// Audio frame types shared by capture, detection and recording
///
/// A frame is the atomic unit exchanged between the microphone and the
/// keyword engine: a fixed number of mono 16-bit PCM samples.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Sample rate required by the keyword engine
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per frame required by the keyword engine (32ms at 16kHz)
pub const FRAME_LENGTH: usize = 512;

/// Capture format negotiated between the keyword engine and the frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Samples per second
    pub sample_rate: u32,

    /// Samples per frame
    pub frame_length: usize,
}

impl FrameFormat {
    pub const fn new(sample_rate: u32, frame_length: usize) -> Self {
        Self {
            sample_rate,
            frame_length,
        }
    }

    /// Wall-clock duration of one frame
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(self.frame_length as f64 / self.sample_rate as f64)
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::new(SAMPLE_RATE, FRAME_LENGTH)
    }
}

/// One immutable chunk of the live stream
///
/// Clones share the same sample storage, so handing a frame to both the
/// recorder and the detector never copies audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    sequence: u64,
    samples: Arc<[AudioSample]>,
}

impl AudioFrame {
    pub fn new(sequence: u64, samples: Vec<AudioSample>) -> Self {
        Self {
            sequence,
            samples: samples.into(),
        }
    }

    /// Position of this frame in the capture stream, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }
}

impl Deref for AudioFrame {
    type Target = [AudioSample];

    fn deref(&self) -> &Self::Target {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_format_matches_engine() {
        let format = FrameFormat::default();
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.frame_length, 512);
        assert_relative_eq!(format.frame_period().as_secs_f64(), 0.032, epsilon = 1e-9);
    }

    #[test]
    fn test_clones_share_samples() {
        let frame = AudioFrame::new(7, vec![1, 2, 3]);
        let copy = frame.clone();

        assert_eq!(copy.sequence(), 7);
        assert!(std::ptr::eq(frame.samples(), copy.samples()));
        assert_eq!(&copy[..], &[1, 2, 3]);
    }
}
