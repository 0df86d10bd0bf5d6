/// Session lifecycle module
///
/// Owns the frame source, the keyword detector and the recording buffer for
/// one listening session. Resources are acquired in order (source, then
/// detector) and released in reverse on every exit path: the detector is
/// released, the source closed, and only then is the recording written.

use crate::detection_loop::{run_detection_loop, LoopStats, StopToken};
use crate::detector::{DetectorConfig, DetectorError, KeywordDetector, KeywordSpec, PorcupineDetector};
use crate::frame::FrameFormat;
use crate::frame_source::{FrameSource, MicrophoneSource, SourceError};
use crate::reaction::Reaction;
use crate::recording::{RecordingBuffer, RecordingError};
use std::path::PathBuf;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    Config(DetectorError),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Keyword engine initialization failed: {0}")]
    Init(DetectorError),

    #[error("Keyword engine failed: {0}")]
    Detector(DetectorError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error("Failed to start detection thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Detection thread panicked")]
    Panicked,
}

impl From<SourceError> for SessionError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Device(msg) => SessionError::Device(msg),
            SourceError::Stream(msg) => SessionError::Stream(msg),
        }
    }
}

/// Everything needed to start a session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub detector: DetectorConfig,

    /// Input device index; `None` selects the system default
    pub input_device: Option<usize>,

    /// Write the session audio here when the session ends
    pub output_path: Option<PathBuf>,
}

impl SessionConfig {
    /// Reject bad configuration before any device is touched
    pub fn validate(&self) -> Result<(), SessionError> {
        self.detector.validate().map_err(SessionError::Config)
    }
}

/// Outcome of a session that ended without a fatal error
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub stats: LoopStats,

    /// Path of the written recording, if one was requested and non-empty
    pub recording: Option<PathBuf>,
}

/// Scoped owner of a session's resources
pub struct LifecycleGuard<S: FrameSource, D: KeywordDetector> {
    source: S,
    detector: D,
    keywords: Vec<KeywordSpec>,
    recorder: Option<RecordingBuffer>,
    output_path: Option<PathBuf>,
    format: FrameFormat,
    released: bool,
}

impl<S: FrameSource, D: KeywordDetector> LifecycleGuard<S, D> {
    /// Validate `config`, open the source, then create the detector
    ///
    /// Nothing is opened if validation fails. If anything fails after the
    /// source is open, whatever was acquired is released before returning.
    pub fn acquire<O, C>(
        config: &SessionConfig,
        open_source: O,
        create_detector: C,
    ) -> Result<Self, SessionError>
    where
        O: FnOnce(FrameFormat, Option<usize>) -> Result<S, SourceError>,
        C: FnOnce(&DetectorConfig) -> Result<D, DetectorError>,
    {
        config.validate()?;

        let format = config.detector.format;
        let keywords = config.detector.keywords();

        let mut source = open_source(format, config.input_device)?;

        if source.format() != format {
            let actual = source.format();
            source.close();
            return Err(SessionError::Device(format!(
                "device delivers {:?}, keyword engine requires {:?}",
                actual, format
            )));
        }

        let detector = match create_detector(&config.detector) {
            Ok(detector) => detector,
            Err(e) => {
                source.close();
                return Err(SessionError::Init(e));
            }
        };

        let mut guard = Self {
            source,
            detector,
            keywords,
            recorder: config.output_path.as_ref().map(|_| RecordingBuffer::new()),
            output_path: config.output_path.clone(),
            format,
            released: false,
        };

        if let Err(e) = guard.check_detector() {
            guard.release_live();
            return Err(SessionError::Init(e));
        }

        info!(
            "Session ready: {} keyword(s), recording {}",
            guard.keywords.len(),
            if guard.recorder.is_some() { "enabled" } else { "disabled" }
        );

        Ok(guard)
    }

    fn check_detector(&self) -> Result<(), DetectorError> {
        let actual = self.detector.format();
        if actual != self.format {
            return Err(DetectorError::FormatMismatch {
                expected: self.format,
                actual,
            });
        }

        if self.detector.keyword_count() != self.keywords.len() {
            return Err(DetectorError::InvalidConfig(format!(
                "engine loaded {} keyword model(s) but {} keyword(s) are configured",
                self.detector.keyword_count(),
                self.keywords.len()
            )));
        }

        Ok(())
    }

    pub fn keywords(&self) -> &[KeywordSpec] {
        &self.keywords
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Run the detection loop, then release everything
    pub fn run<R>(mut self, reaction: &mut R, stop: &StopToken) -> Result<SessionReport, SessionError>
    where
        R: Reaction + ?Sized,
    {
        let outcome = run_detection_loop(
            &mut self.source,
            &mut self.detector,
            &self.keywords,
            reaction,
            self.recorder.as_mut(),
            stop,
        );

        let finalized = self.finish();

        match (outcome, finalized) {
            (Ok(stats), Ok(recording)) => Ok(SessionReport { stats, recording }),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(recording_error)) => {
                error!("Recording could not be saved: {}", recording_error);
                Err(e)
            }
        }
    }

    /// Release everything without running
    pub fn shutdown(mut self) -> Result<Option<PathBuf>, SessionError> {
        Ok(self.finish()?)
    }

    /// Release the detector, then close the source
    fn release_live(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.detector.release();
        debug!("Keyword engine released");

        self.source.close();
        debug!("Frame source closed");
    }

    /// Release live resources, then write the recording
    fn finish(&mut self) -> Result<Option<PathBuf>, RecordingError> {
        if self.released {
            return Ok(None);
        }
        self.release_live();

        match (self.recorder.take(), self.output_path.as_deref()) {
            (Some(recorder), Some(path)) => recorder.finalize(path, self.format.sample_rate),
            _ => Ok(None),
        }
    }
}

impl<S: FrameSource, D: KeywordDetector> Drop for LifecycleGuard<S, D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!("Session ended abnormally, releasing resources");
        if let Err(e) = self.finish() {
            error!("Recording could not be saved: {}", e);
        }
    }
}

/// Run one session to completion on the current thread
pub fn run_session<S, D, O, C, R>(
    config: &SessionConfig,
    open_source: O,
    create_detector: C,
    reaction: &mut R,
    stop: &StopToken,
) -> Result<SessionReport, SessionError>
where
    S: FrameSource,
    D: KeywordDetector,
    O: FnOnce(FrameFormat, Option<usize>) -> Result<S, SourceError>,
    C: FnOnce(&DetectorConfig) -> Result<D, DetectorError>,
    R: Reaction + ?Sized,
{
    LifecycleGuard::acquire(config, open_source, create_detector)?.run(reaction, stop)
}

/// Run one session against the microphone and the Porcupine engine
pub fn run_microphone_session<R>(
    config: &SessionConfig,
    reaction: &mut R,
    stop: &StopToken,
) -> Result<SessionReport, SessionError>
where
    R: Reaction + ?Sized,
{
    run_session(config, MicrophoneSource::open, PorcupineDetector::create, reaction, stop)
}

/// A session running on its own thread
pub struct SessionHandle {
    stop: StopToken,
    thread: JoinHandle<Result<SessionReport, SessionError>>,
}

impl SessionHandle {
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Ask the loop to stop after the frame in flight
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the session to end
    pub fn join(self) -> Result<SessionReport, SessionError> {
        self.thread.join().unwrap_or(Err(SessionError::Panicked))
    }
}

/// Start a session on a dedicated thread
///
/// The source and detector are created on that thread, so neither needs to
/// be `Send`.
pub fn spawn_session_with<S, D, O, C, R>(
    config: SessionConfig,
    open_source: O,
    create_detector: C,
    mut reaction: R,
) -> Result<SessionHandle, SessionError>
where
    S: FrameSource,
    D: KeywordDetector,
    O: FnOnce(FrameFormat, Option<usize>) -> Result<S, SourceError> + Send + 'static,
    C: FnOnce(&DetectorConfig) -> Result<D, DetectorError> + Send + 'static,
    R: Reaction + Send + 'static,
{
    let stop = StopToken::new();
    let loop_stop = stop.clone();

    let thread = std::thread::Builder::new()
        .name("detection-loop".to_string())
        .spawn(move || run_session(&config, open_source, create_detector, &mut reaction, &loop_stop))?;

    Ok(SessionHandle { stop, thread })
}

/// Start a microphone session on a dedicated thread
pub fn spawn_session<R>(config: SessionConfig, reaction: R) -> Result<SessionHandle, SessionError>
where
    R: Reaction + Send + 'static,
{
    spawn_session_with(config, MicrophoneSource::open, PorcupineDetector::create, reaction)
}
