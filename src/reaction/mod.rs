//! Reactions to wake-word detections
//!
//! A [`Reaction`] runs synchronously on the detection thread. The default
//! pipeline announces the detection, fetches the forecast, speaks a short
//! summary and plays it back.

pub mod playback;
pub mod speech;
pub mod weather;

use crate::detection_loop::DetectionEvent;
use crate::detector::KeywordSpec;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;

pub use playback::play_wav;
pub use speech::{SpeechConfig, SpeechSynthesizer};
pub use weather::{spoken_summary, Forecast, WeatherClient, WeatherConfig};

/// Upper bound on how long `ReactionPipeline::react` blocks the loop
///
/// Weather request, speech request, clipped playback, plus device setup.
pub const MAX_REACTION_TIME: Duration = Duration::from_secs(
    weather::DEFAULT_TIMEOUT.as_secs()
        + speech::DEFAULT_TIMEOUT.as_secs()
        + playback::MAX_PLAYBACK.as_secs()
        + 2,
);

#[derive(Error, Debug)]
pub enum ReactionError {
    #[error("Weather lookup failed: {0}")]
    Weather(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Action triggered by a detection
///
/// Failures are reported to the caller, which must not let them stop the
/// detection loop.
pub trait Reaction {
    /// Called once the device is open and the engine is loaded, before the
    /// first frame is read
    fn on_ready(&mut self, _keywords: &[KeywordSpec]) {}

    fn react(&mut self, event: &DetectionEvent) -> Result<(), ReactionError>;
}

impl<F> Reaction for F
where
    F: FnMut(&DetectionEvent) -> Result<(), ReactionError>,
{
    fn react(&mut self, event: &DetectionEvent) -> Result<(), ReactionError> {
        self(event)
    }
}

/// The block printed when listening starts
pub fn listening_banner(keywords: &[KeywordSpec]) -> String {
    let mut banner = String::from("Listening {\n");
    for keyword in keywords {
        let _ = writeln!(banner, "  {} ({:.2})", keyword.label, keyword.sensitivity);
    }
    banner.push('}');
    banner
}

/// Announce, fetch weather, synthesize, play
///
/// HTTP calls are driven on `runtime`; `react` must therefore be called from
/// a thread that is not itself running async tasks.
pub struct ReactionPipeline {
    runtime: Handle,
    weather: Option<WeatherClient>,
    speech: Option<SpeechSynthesizer>,
}

impl ReactionPipeline {
    /// Pipeline that only announces detections
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            weather: None,
            speech: None,
        }
    }

    pub fn with_weather(mut self, weather: WeatherClient) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn with_speech(mut self, speech: SpeechSynthesizer) -> Self {
        self.speech = Some(speech);
        self
    }
}

impl Reaction for ReactionPipeline {
    fn on_ready(&mut self, keywords: &[KeywordSpec]) {
        println!("{}", listening_banner(keywords));
    }

    fn react(&mut self, event: &DetectionEvent) -> Result<(), ReactionError> {
        println!(
            "[{}] Detected {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            event.label
        );

        let Some(weather) = &self.weather else {
            return Ok(());
        };

        let forecast = self.runtime.block_on(weather.fetch())?;
        let summary = spoken_summary(&forecast)?;
        println!("{}", summary);

        if let Some(speech) = &self.speech {
            let audio = self.runtime.block_on(speech.synthesize(&summary))?;
            debug!("Playing {} bytes of synthesized speech", audio.len());
            play_wav(&audio)?;
        }

        Ok(())
    }
}
