/// Integration tests for the wake-word listener
///
/// Runs whole sessions against synthetic audio, checking cleanup order and
/// the written recording.

use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wakeword_listener::{
    run_session, spawn_session_with, AudioFrame, AudioSample, DetectionEvent, DetectorConfig,
    DetectorError, FrameFormat, FrameSource, KeywordDetector, ReactionError, SessionConfig,
    SessionError, SourceError, StopToken, FRAME_LENGTH, SAMPLE_RATE,
};

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Generate synthetic audio tone
fn generate_tone(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<i16> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = amplitude * (2.0 * PI * frequency * t).sin();
            (sample * i16::MAX as f32) as i16
        })
        .collect()
}

fn silence(duration_secs: f32) -> Vec<i16> {
    vec![0; (SAMPLE_RATE as f32 * duration_secs) as usize]
}

/// Silence with `bursts` half-second tones, one every second
fn tone_bursts(bursts: usize) -> Vec<i16> {
    let mut signal = silence(0.5);
    for _ in 0..bursts {
        signal.extend(generate_tone(440.0, 0.5, 0.8));
        signal.extend(silence(0.5));
    }
    signal
}

/// Plays a fixed signal frame by frame, then requests a stop
struct SignalSource {
    samples: Vec<i16>,
    position: usize,
    sequence: u64,
    fail_at: Option<u64>,
    stop: StopToken,
    log: Log,
}

impl SignalSource {
    fn new(samples: Vec<i16>, stop: &StopToken, log: &Log) -> Self {
        Self {
            samples,
            position: 0,
            sequence: 0,
            fail_at: None,
            stop: stop.clone(),
            log: Arc::clone(log),
        }
    }
}

impl FrameSource for SignalSource {
    fn format(&self) -> FrameFormat {
        FrameFormat::default()
    }

    fn read_frame(&mut self) -> Result<AudioFrame, SourceError> {
        if self.fail_at == Some(self.sequence) {
            return Err(SourceError::Stream("device disconnected".to_string()));
        }

        let end = self.position + FRAME_LENGTH;
        let samples = self
            .samples
            .get(self.position..end)
            .ok_or_else(|| SourceError::Stream("signal exhausted".to_string()))?
            .to_vec();

        self.position = end;
        if self.samples.len() - self.position < FRAME_LENGTH {
            self.stop.request_stop();
        }

        let frame = AudioFrame::new(self.sequence, samples);
        self.sequence += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        self.log.lock().unwrap().push("close");
    }
}

/// Live-paced silence that never ends
struct EndlessSource {
    sequence: u64,
    log: Log,
}

impl FrameSource for EndlessSource {
    fn format(&self) -> FrameFormat {
        FrameFormat::default()
    }

    fn read_frame(&mut self) -> Result<AudioFrame, SourceError> {
        std::thread::sleep(Duration::from_millis(1));
        let frame = AudioFrame::new(self.sequence, vec![0; FRAME_LENGTH]);
        self.sequence += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        self.log.lock().unwrap().push("close");
    }
}

/// Matches keyword 0 on the first loud frame of every burst
struct EdgeDetector {
    in_burst: bool,
    log: Log,
}

impl EdgeDetector {
    fn new(log: &Log) -> Self {
        Self {
            in_burst: false,
            log: Arc::clone(log),
        }
    }
}

impl KeywordDetector for EdgeDetector {
    fn format(&self) -> FrameFormat {
        FrameFormat::default()
    }

    fn keyword_count(&self) -> usize {
        1
    }

    fn process(&mut self, frame: &[AudioSample]) -> Result<Option<usize>, DetectorError> {
        let peak = frame.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let loud = peak > i16::MAX as u16 / 4;

        let matched = loud && !self.in_burst;
        self.in_burst = loud;

        Ok(matched.then_some(0))
    }

    fn release(&mut self) {
        self.log.lock().unwrap().push("release");
    }
}

fn session_config(dir: &TempDir, output: Option<PathBuf>) -> SessionConfig {
    let keyword = dir.path().join("computer_linux.ppn");
    std::fs::write(&keyword, b"model").unwrap();

    SessionConfig {
        detector: DetectorConfig {
            access_key: "test_key".to_string(),
            keyword_paths: vec![keyword],
            ..Default::default()
        }
        .with_default_sensitivities(),
        input_device: None,
        output_path: output,
    }
}

fn read_wav(path: &Path) -> (hound::WavSpec, Vec<i16>) {
    let mut reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();
    let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    (spec, samples)
}

#[test]
fn test_session_records_every_frame_in_order() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("session.wav");
    let config = session_config(&dir, Some(output.clone()));

    let signal = tone_bursts(2);
    let whole_frames = signal.len() / FRAME_LENGTH * FRAME_LENGTH;

    let log = Log::default();
    let stop = StopToken::new();
    let mut labels = Vec::new();
    let mut reaction = |event: &DetectionEvent| -> Result<(), ReactionError> {
        labels.push(event.label.clone());
        Ok(())
    };

    let report = run_session(
        &config,
        |_, _| Ok(SignalSource::new(signal.clone(), &stop, &log)),
        |_| Ok(EdgeDetector::new(&log)),
        &mut reaction,
        &stop,
    )
    .unwrap();

    assert_eq!(labels, vec!["computer", "computer"]);
    assert_eq!(report.stats.detections, 2);
    assert_eq!(report.stats.frames_processed as usize, whole_frames / FRAME_LENGTH);
    assert_eq!(report.recording.as_deref(), Some(output.as_path()));

    let (spec, samples) = read_wav(&output);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(samples, &signal[..whole_frames]);

    assert_eq!(*log.lock().unwrap(), vec!["release", "close"]);
}

#[test]
fn test_stream_error_finalizes_partial_recording() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("partial.wav");
    let config = session_config(&dir, Some(output.clone()));

    let signal = generate_tone(300.0, 1.0, 0.1);
    let log = Log::default();
    let stop = StopToken::new();
    let mut reaction = |_: &DetectionEvent| -> Result<(), ReactionError> { Ok(()) };

    let result = run_session(
        &config,
        |_, _| {
            let mut source = SignalSource::new(signal.clone(), &stop, &log);
            source.fail_at = Some(10);
            Ok(source)
        },
        |_| Ok(EdgeDetector::new(&log)),
        &mut reaction,
        &stop,
    );

    assert!(matches!(result, Err(SessionError::Stream(_))));
    assert_eq!(*log.lock().unwrap(), vec!["release", "close"]);

    let (_, samples) = read_wav(&output);
    assert_eq!(samples, &signal[..10 * FRAME_LENGTH]);
}

#[test]
fn test_reaction_failures_do_not_stop_session() {
    let dir = TempDir::new().unwrap();
    let config = session_config(&dir, None);

    let log = Log::default();
    let stop = StopToken::new();
    let mut reaction = |_: &DetectionEvent| -> Result<(), ReactionError> {
        Err(ReactionError::Playback("no output device available".to_string()))
    };

    let report = run_session(
        &config,
        |_, _| Ok(SignalSource::new(tone_bursts(3), &stop, &log)),
        |_| Ok(EdgeDetector::new(&log)),
        &mut reaction,
        &stop,
    )
    .unwrap();

    assert_eq!(report.stats.detections, 3);
    assert_eq!(report.stats.reaction_failures, 3);
    assert!(report.recording.is_none());
}

#[test]
fn test_stop_from_control_thread() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("stopped.wav");
    let config = session_config(&dir, Some(output.clone()));

    let log = Log::default();
    let source_log = Arc::clone(&log);
    let detector_log = Arc::clone(&log);

    let handle = spawn_session_with(
        config,
        move |_, _| {
            Ok(EndlessSource {
                sequence: 0,
                log: source_log,
            })
        },
        move |_| Ok(EdgeDetector::new(&detector_log)),
        |_: &DetectionEvent| -> Result<(), ReactionError> { Ok(()) },
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert!(!handle.is_finished());

    handle.request_stop();
    let report = handle.join().unwrap();

    assert!(report.stats.frames_processed > 0);
    assert_eq!(*log.lock().unwrap(), vec!["release", "close"]);

    let (_, samples) = read_wav(&output);
    assert_eq!(samples.len() as u64, report.stats.frames_processed * FRAME_LENGTH as u64);
}

#[test]
fn test_mismatched_sensitivities_open_no_device() {
    let dir = TempDir::new().unwrap();
    let mut config = session_config(&dir, None);
    config.detector.sensitivities = vec![0.5, 0.6];

    let log = Log::default();
    let stop = StopToken::new();
    let mut opened = false;
    let mut reaction = |_: &DetectionEvent| -> Result<(), ReactionError> { Ok(()) };

    let result = run_session(
        &config,
        |_, _| {
            opened = true;
            Ok(SignalSource::new(silence(1.0), &stop, &log))
        },
        |_| Ok(EdgeDetector::new(&log)),
        &mut reaction,
        &stop,
    );

    assert!(matches!(result, Err(SessionError::Config(_))));
    assert!(!opened);
    assert!(log.lock().unwrap().is_empty());
}

#[cfg(not(feature = "porcupine"))]
#[test]
fn test_mock_engine_detects_tone_bursts() {
    use wakeword_listener::PorcupineDetector;

    let dir = TempDir::new().unwrap();
    let config = session_config(&dir, None);

    let log = Log::default();
    let stop = StopToken::new();
    let mut detections = 0;
    let mut reaction = |_: &DetectionEvent| -> Result<(), ReactionError> {
        detections += 1;
        Ok(())
    };

    let report = run_session(
        &config,
        |_, _| Ok(SignalSource::new(tone_bursts(2), &stop, &log)),
        PorcupineDetector::create,
        &mut reaction,
        &stop,
    )
    .unwrap();

    assert_eq!(report.stats.detections, 2);
    assert_eq!(detections, 2);
}
