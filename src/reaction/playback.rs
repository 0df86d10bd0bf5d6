//! Audio playback to speakers

use super::ReactionError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Longest stretch of speech played for one detection
pub const MAX_PLAYBACK: Duration = Duration::from_secs(30);

/// Mono audio decoded from a WAV payload
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

/// Decode 16-bit PCM WAV bytes, mixing down to mono
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, ReactionError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| ReactionError::Playback(format!("invalid WAV data: {}", e)))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(ReactionError::Playback(format!(
            "unsupported WAV format: {:?} {} bit",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let interleaved = reader
        .samples::<i16>()
        .map(|s| s.map(|s| f32::from(s) / 32768.0))
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|e| ReactionError::Playback(format!("corrupt WAV data: {}", e)))?;

    let channels = spec.channels.max(1) as usize;
    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(DecodedAudio {
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Linear-interpolation resampling
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let index = pos.floor() as usize;
            let frac = (pos - index as f64) as f32;
            let current = samples[index.min(samples.len() - 1)];
            let next = samples[(index + 1).min(samples.len() - 1)];
            current + (next - current) * frac
        })
        .collect()
}

/// Cut `samples` down to at most `max` of audio at `sample_rate`
///
/// Returns whether anything was cut.
fn clip_to_duration(samples: &mut Vec<f32>, sample_rate: u32, max: Duration) -> bool {
    let limit = (max.as_secs_f64() * sample_rate as f64) as usize;
    if samples.len() <= limit {
        return false;
    }

    samples.truncate(limit);
    true
}

/// Copy the next samples into an interleaved output buffer
fn fill_output<T: Copy>(
    data: &mut [T],
    channels: usize,
    samples: &[f32],
    position: &AtomicUsize,
    convert: impl Fn(f32) -> T,
) {
    let mut pos = position.load(Ordering::Acquire);

    for frame in data.chunks_mut(channels) {
        let sample = samples.get(pos).copied().unwrap_or(0.0);
        frame.fill(convert(sample));
        if pos < samples.len() {
            pos += 1;
        }
    }

    position.store(pos, Ordering::Release);
}

/// Play WAV bytes on the default output device, blocking until done
pub fn play_wav(bytes: &[u8]) -> Result<(), ReactionError> {
    let audio = decode_wav(bytes)?;
    if audio.samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| ReactionError::Playback("no output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| ReactionError::Playback(e.to_string()))?;

    let output_rate = supported.sample_rate().0;
    let channels = supported.channels().max(1) as usize;
    let config = supported.config();

    let mut samples = resample_linear(&audio.samples, audio.sample_rate, output_rate);
    if clip_to_duration(&mut samples, output_rate, MAX_PLAYBACK) {
        warn!("Speech longer than {:?}, playing the first part only", MAX_PLAYBACK);
    }

    let samples = Arc::new(samples);
    let total = samples.len();
    let position = Arc::new(AtomicUsize::new(0));

    let err_fn = |err: cpal::StreamError| error!("Audio playback error: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_output(data, channels, &samples, &position, |s| s)
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    fill_output(data, channels, &samples, &position, |s| {
                        (s * 32767.0).clamp(-32768.0, 32767.0) as i16
                    })
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(ReactionError::Playback(format!(
                "unsupported output format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| ReactionError::Playback(e.to_string()))?;

    stream
        .play()
        .map_err(|e| ReactionError::Playback(e.to_string()))?;

    // Wait for playback to finish, with a margin for device latency
    let expected = Duration::from_secs_f64(total as f64 / output_rate as f64);
    let deadline = Instant::now() + expected + Duration::from_millis(500);

    while position.load(Ordering::Acquire) < total && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    debug!("Playback complete ({} samples at {} Hz)", total, output_rate);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wav_bytes(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono() {
        let audio = decode_wav(&wav_bytes(1, 24000, &[0, 16384, -16384])).unwrap();

        assert_eq!(audio.sample_rate, 24000);
        assert_eq!(audio.samples, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn test_decode_mixes_stereo_down() {
        let audio = decode_wav(&wav_bytes(2, 16000, &[16384, 0, -16384, -16384])).unwrap();

        assert_eq!(audio.samples.len(), 2);
        assert_relative_eq!(audio.samples[0], 0.25);
        assert_relative_eq!(audio.samples[1], -0.5);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"definitely not a wav file").is_err());
    }

    #[test]
    fn test_resample_up_and_down() {
        let samples = vec![0.0, 1.0, 0.0, -1.0];

        let same = resample_linear(&samples, 16000, 16000);
        assert_eq!(same, samples);

        let up = resample_linear(&samples, 16000, 32000);
        assert_eq!(up.len(), 8);
        assert_relative_eq!(up[1], 0.5);

        let down = resample_linear(&samples, 16000, 8000);
        assert_eq!(down, vec![0.0, 0.0]);
    }

    #[test]
    fn test_clip_to_duration() {
        let mut short = vec![0.0; 100];
        assert!(!clip_to_duration(&mut short, 100, Duration::from_secs(1)));
        assert_eq!(short.len(), 100);

        let mut long = vec![0.0; 48000 * 45];
        assert!(clip_to_duration(&mut long, 48000, MAX_PLAYBACK));
        assert_eq!(long.len(), 48000 * 30);
    }

    #[test]
    fn test_fill_output_duplicates_channels_and_pads() {
        let position = AtomicUsize::new(0);
        let mut data = [9.0f32; 6];

        fill_output(&mut data, 2, &[0.1, 0.2], &position, |s| s);

        assert_eq!(data, [0.1, 0.1, 0.2, 0.2, 0.0, 0.0]);
        assert_eq!(position.load(Ordering::Acquire), 2);
    }
}
