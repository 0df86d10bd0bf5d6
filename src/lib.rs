//! Wake-word listener
//!
//! This library provides a real-time wake-word listening loop:
//! - Fixed-length frame capture from a microphone via cpal
//! - Keyword spotting through the Porcupine engine (or a mock engine)
//! - Ordered, scoped release of device, engine and session recording
//! - A weather, speech and playback reaction to every detection

pub mod capture_ring;
pub mod detection_loop;
pub mod detector;
pub mod frame;
pub mod frame_source;
pub mod reaction;
pub mod recording;
pub mod session;

pub use detection_loop::{run_detection_loop, DetectionEvent, LoopStats, StopToken};
pub use detector::{
    DetectorConfig, DetectorError, KeywordDetector, KeywordSpec, PorcupineDetector, DEFAULT_SENSITIVITY,
};
pub use frame::{AudioFrame, AudioSample, FrameFormat, FRAME_LENGTH, SAMPLE_RATE};
pub use frame_source::{list_input_devices, FrameSource, InputDeviceInfo, MicrophoneSource, SourceError};
pub use reaction::{Reaction, ReactionError, ReactionPipeline};
pub use recording::{RecordingBuffer, RecordingError};
pub use session::{
    run_microphone_session, run_session, spawn_session, spawn_session_with, LifecycleGuard,
    SessionConfig, SessionError, SessionHandle, SessionReport,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// Log lines go to stderr; stdout carries the listener's own output.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wakeword_listener=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
