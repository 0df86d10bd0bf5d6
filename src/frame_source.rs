/// Frame source module
///
/// Wraps a microphone capture device and yields fixed-length PCM frames at a
/// fixed sample rate. The cpal callback pushes samples into a capture ring;
/// `read_frame` blocks until one full frame is available.

use crate::capture_ring::{capture_ring, RingReader, RingWriter, RING_DURATION_SECS};
use crate::frame::{AudioFrame, FrameFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, SupportedStreamConfig, SupportedStreamConfigRange};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long a device may stay silent before it is considered disconnected
pub const STALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),
}

/// Producer of fixed-length audio frames
#[cfg_attr(test, mockall::automock)]
pub trait FrameSource {
    /// Format every frame returned by `read_frame` conforms to
    fn format(&self) -> FrameFormat;

    /// Block until exactly one full frame is available
    fn read_frame(&mut self) -> Result<AudioFrame, SourceError>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Cuts the ring's sample stream into numbered frames
struct FrameAssembler {
    reader: RingReader,
    format: FrameFormat,
    next_sequence: u64,
    stall_timeout: Duration,
}

impl FrameAssembler {
    fn new(reader: RingReader, format: FrameFormat, stall_timeout: Duration) -> Self {
        Self {
            reader,
            format,
            next_sequence: 0,
            stall_timeout,
        }
    }

    fn next_frame(&mut self) -> Result<AudioFrame, SourceError> {
        let poll_interval = self.format.frame_period() / 4;
        let started = Instant::now();

        loop {
            if let Some(fault) = self.reader.fault() {
                return Err(SourceError::Stream(fault.to_string()));
            }

            if let Some(samples) = self.reader.read_exact(self.format.frame_length) {
                let frame = AudioFrame::new(self.next_sequence, samples);
                self.next_sequence += 1;
                return Ok(frame);
            }

            if started.elapsed() >= self.stall_timeout {
                return Err(SourceError::Stream(format!(
                    "no audio received for {:?}, device disconnected?",
                    self.stall_timeout
                )));
            }

            std::thread::sleep(poll_interval);
        }
    }
}

/// Microphone frame source backed by cpal
pub struct MicrophoneSource {
    stream: Option<Stream>,
    frames: FrameAssembler,
    device_name: String,
}

impl MicrophoneSource {
    /// Open the default input device, or the device at `device_index` in the
    /// host's device enumeration
    pub fn open(format: FrameFormat, device_index: Option<usize>) -> Result<Self, SourceError> {
        let host = cpal::default_host();

        let device = match device_index {
            Some(index) => host
                .devices()
                .map_err(|e| SourceError::Device(format!("cannot enumerate devices: {}", e)))?
                .nth(index)
                .ok_or_else(|| SourceError::Device(format!("no audio device with index {}", index)))?,
            None => host
                .default_input_device()
                .ok_or_else(|| SourceError::Device("no input device available".to_string()))?,
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let config = select_input_config(&device, format.sample_rate)?;

        info!(
            "Opening input device '{}' ({} channel(s), {:?}) at {} Hz, {} samples per frame",
            device_name,
            config.channels(),
            config.sample_format(),
            format.sample_rate,
            format.frame_length
        );

        let capacity = RING_DURATION_SECS * format.sample_rate as usize;
        let (writer, reader) = capture_ring(capacity.max(format.frame_length * 2));

        let stream = build_input_stream(&device, &config, writer)?;
        stream
            .play()
            .map_err(|e| SourceError::Device(format!("failed to start capture: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            frames: FrameAssembler::new(reader, format, STALL_TIMEOUT),
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl FrameSource for MicrophoneSource {
    fn format(&self) -> FrameFormat {
        self.frames.format
    }

    fn read_frame(&mut self) -> Result<AudioFrame, SourceError> {
        if self.stream.is_none() {
            return Err(SourceError::Stream("capture device is closed".to_string()));
        }

        self.frames.next_frame()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause capture stream: {}", e);
            }
            drop(stream);
            debug!("Audio capture on '{}' closed", self.device_name);
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pick a configuration that captures at `sample_rate`, preferring mono and
/// native 16-bit samples
fn select_input_config(device: &Device, sample_rate: u32) -> Result<SupportedStreamConfig, SourceError> {
    let rate = SampleRate(sample_rate);

    let configs: Vec<SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map_err(|e| SourceError::Device(format!("not an input device: {}", e)))?
        .collect();

    if configs.is_empty() {
        return Err(SourceError::Device("not an input device".to_string()));
    }

    configs
        .into_iter()
        .filter(|c| {
            c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
                && matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32)
        })
        .min_by_key(|c| (c.channels() != 1, c.sample_format() != SampleFormat::I16))
        .map(|c| c.with_sample_rate(rate))
        .ok_or_else(|| {
            SourceError::Device(format!(
                "device cannot capture 16-bit mono audio at {} Hz",
                sample_rate
            ))
        })
}

/// Build a stream that feeds the first channel of every input frame into
/// the capture ring
fn build_input_stream(
    device: &Device,
    supported: &SupportedStreamConfig,
    mut writer: RingWriter,
) -> Result<Stream, SourceError> {
    let channels = supported.channels().max(1) as usize;
    let config = supported.config();
    let faults = writer.fault_handle();
    let err_fn = move |err: cpal::StreamError| faults.fail(err.to_string());

    let stream = match supported.sample_format() {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                writer.push_iter(data.iter().step_by(channels).copied(), data.len() / channels);
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Convert f32 [-1.0, 1.0] to i16
                let samples = data
                    .iter()
                    .step_by(channels)
                    .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16);
                writer.push_iter(samples, data.len() / channels);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(SourceError::Device(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| SourceError::Device(format!("failed to build input stream: {}", e)))
}

/// Input-capable audio device, as shown by the diagnostic listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    /// Index accepted by `MicrophoneSource::open`
    pub index: usize,
    pub name: String,
    pub default_sample_rate: Option<u32>,
    pub max_input_channels: u16,
}

impl fmt::Display for InputDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self
            .default_sample_rate
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        write!(
            f,
            "'index': '{}', 'name': '{}', 'defaultSampleRate': '{}', 'maxInputChannels': '{}'",
            self.index, self.name, rate, self.max_input_channels
        )
    }
}

/// List every device of the default host that can capture audio
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, SourceError> {
    let host = cpal::default_host();
    let devices = host
        .devices()
        .map_err(|e| SourceError::Device(format!("cannot enumerate devices: {}", e)))?;

    let mut found = Vec::new();

    for (index, device) in devices.enumerate() {
        let max_input_channels = match device.supported_input_configs() {
            Ok(configs) => configs.map(|c| c.channels()).max().unwrap_or(0),
            Err(_) => 0,
        };

        if max_input_channels == 0 {
            continue;
        }

        found.push(InputDeviceInfo {
            index,
            name: device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
            default_sample_rate: device.default_input_config().ok().map(|c| c.sample_rate().0),
            max_input_channels,
        });
    }

    Ok(found)
}
