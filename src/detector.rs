/// Keyword detector module
///
/// Defines the contract the detection loop expects from a keyword-spotting
/// engine and binds the Porcupine SDK to it. Uses a mock engine when the
/// `porcupine` feature is not enabled.

use crate::frame::{AudioSample, FrameFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Sensitivity used for every keyword when none are configured
pub const DEFAULT_SENSITIVITY: f32 = 0.5;

/// Keywords that ship with the engine and need no model file
pub const BUILTIN_KEYWORDS: &[&str] = &[
    "alexa",
    "americano",
    "blueberry",
    "bumblebee",
    "computer",
    "grapefruit",
    "grasshopper",
    "hey google",
    "hey siri",
    "jarvis",
    "ok google",
    "picovoice",
    "porcupine",
    "terminator",
];

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid detector configuration: {0}")]
    InvalidConfig(String),

    #[error("Keyword file not found: {0}")]
    KeywordNotFound(PathBuf),

    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Porcupine initialization failed: {0}")]
    Init(String),

    #[error("Engine frame format {actual:?} does not match capture format {expected:?}")]
    FormatMismatch {
        expected: FrameFormat,
        actual: FrameFormat,
    },

    #[error("Detection error: {0}")]
    Process(String),
}

/// Stateful keyword-spotting engine, fed one frame at a time
///
/// `process` returns `None` when no keyword matched, otherwise the index of
/// the matched keyword in configuration order.
#[cfg_attr(test, mockall::automock)]
pub trait KeywordDetector {
    /// Frame format the engine requires
    fn format(&self) -> FrameFormat;

    /// Number of keyword models loaded
    fn keyword_count(&self) -> usize;

    fn process(&mut self, frame: &[AudioSample]) -> Result<Option<usize>, DetectorError>;

    /// Free the engine. Safe to call more than once.
    fn release(&mut self);
}

/// A wake word and the sensitivity it is detected with
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSpec {
    /// Display label
    pub label: String,

    /// Sensitivity (0.0 - 1.0, higher = fewer misses, more false alarms)
    pub sensitivity: f32,
}

impl KeywordSpec {
    pub fn new(label: impl Into<String>, sensitivity: f32) -> Self {
        Self {
            label: label.into(),
            sensitivity,
        }
    }

    /// Derive a display label from a keyword model file name
    ///
    /// `hey_computer_linux.ppn` becomes `hey`.
    pub fn label_from_path(path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        name.replace(".ppn", "")
            .split('_')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

/// Configuration for the keyword engine
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Picovoice access key (required by the real SDK)
    pub access_key: String,

    /// Optional path to the engine's dynamic library
    pub library_path: Option<PathBuf>,

    /// Optional path to the engine model parameters
    pub model_path: Option<PathBuf>,

    /// Built-in keyword names from `BUILTIN_KEYWORDS`
    pub builtin_keywords: Vec<String>,

    /// Keyword model files (.ppn), one per wake word. Take precedence over
    /// `builtin_keywords` when both are set.
    pub keyword_paths: Vec<PathBuf>,

    /// One sensitivity per keyword model, in the same order
    pub sensitivities: Vec<f32>,

    /// Frame format the engine consumes (512 samples at 16kHz for Porcupine)
    pub format: FrameFormat,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(), // Must be provided by user
            library_path: None,
            model_path: None,
            builtin_keywords: Vec::new(),
            keyword_paths: Vec::new(),
            sensitivities: Vec::new(),
            format: FrameFormat::default(),
        }
    }
}

impl DetectorConfig {
    /// Whether the engine is built from the built-in keyword names
    pub fn uses_builtin_keywords(&self) -> bool {
        self.keyword_paths.is_empty()
    }

    /// Number of keywords the engine will load
    pub fn keyword_count(&self) -> usize {
        if self.uses_builtin_keywords() {
            self.builtin_keywords.len()
        } else {
            self.keyword_paths.len()
        }
    }

    /// Fill in the default sensitivity for every keyword if none were given
    pub fn with_default_sensitivities(mut self) -> Self {
        if self.sensitivities.is_empty() {
            self.sensitivities = vec![DEFAULT_SENSITIVITY; self.keyword_count()];
        }
        self
    }

    /// Keyword table in configuration order
    pub fn keywords(&self) -> Vec<KeywordSpec> {
        let labels: Vec<String> = if self.uses_builtin_keywords() {
            self.builtin_keywords.clone()
        } else {
            self.keyword_paths
                .iter()
                .map(|path| KeywordSpec::label_from_path(path))
                .collect()
        };

        labels
            .into_iter()
            .zip(&self.sensitivities)
            .map(|(label, &sensitivity)| KeywordSpec::new(label, sensitivity))
            .collect()
    }

    /// Validate configuration
    ///
    /// Touches nothing but the filesystem metadata of the configured paths.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if cfg!(feature = "porcupine") && self.access_key.is_empty() {
            return Err(DetectorError::InvalidConfig(
                "Access key is required".to_string(),
            ));
        }

        if self.keyword_paths.is_empty() && self.builtin_keywords.is_empty() {
            return Err(DetectorError::InvalidConfig(
                "Either --keywords or --keyword-paths must be set".to_string(),
            ));
        }

        if self.uses_builtin_keywords() {
            if let Some(unknown) = self
                .builtin_keywords
                .iter()
                .find(|k| !BUILTIN_KEYWORDS.contains(&k.as_str()))
            {
                return Err(DetectorError::InvalidConfig(format!(
                    "Unknown built-in keyword '{}', available: {}",
                    unknown,
                    BUILTIN_KEYWORDS.join(", ")
                )));
            }
        }

        if self.keyword_count() != self.sensitivities.len() {
            return Err(DetectorError::InvalidConfig(format!(
                "Number of keywords ({}) does not match the number of sensitivities ({})",
                self.keyword_count(),
                self.sensitivities.len()
            )));
        }

        if let Some(bad) = self.sensitivities.iter().find(|s| !(0.0..=1.0).contains(*s)) {
            return Err(DetectorError::InvalidConfig(format!(
                "Sensitivity {} must be between 0.0 and 1.0",
                bad
            )));
        }

        if self.format.frame_length == 0 || self.format.sample_rate == 0 {
            return Err(DetectorError::InvalidConfig(format!(
                "Invalid frame format: {:?}",
                self.format
            )));
        }

        if let Some(missing) = self.keyword_paths.iter().find(|p| !p.exists()) {
            return Err(DetectorError::KeywordNotFound(missing.clone()));
        }

        for path in self.model_path.iter().chain(&self.library_path) {
            if !path.exists() {
                return Err(DetectorError::ModelNotFound(path.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(feature = "porcupine")]
mod real_impl {
    use super::*;
    use porcupine::{BuiltinKeywords, Porcupine, PorcupineBuilder};
    use tracing::info;

    fn builtin(name: &str) -> Result<BuiltinKeywords, DetectorError> {
        let keyword = match name {
            "alexa" => BuiltinKeywords::Alexa,
            "americano" => BuiltinKeywords::Americano,
            "blueberry" => BuiltinKeywords::Blueberry,
            "bumblebee" => BuiltinKeywords::Bumblebee,
            "computer" => BuiltinKeywords::Computer,
            "grapefruit" => BuiltinKeywords::Grapefruit,
            "grasshopper" => BuiltinKeywords::Grasshopper,
            "hey google" => BuiltinKeywords::HeyGoogle,
            "hey siri" => BuiltinKeywords::HeySiri,
            "jarvis" => BuiltinKeywords::Jarvis,
            "ok google" => BuiltinKeywords::OkGoogle,
            "picovoice" => BuiltinKeywords::Picovoice,
            "porcupine" => BuiltinKeywords::Porcupine,
            "terminator" => BuiltinKeywords::Terminator,
            other => {
                return Err(DetectorError::InvalidConfig(format!(
                    "Unknown built-in keyword '{}'",
                    other
                )))
            }
        };
        Ok(keyword)
    }

    /// Porcupine wake-word engine
    pub struct PorcupineDetector {
        engine: Option<Porcupine>,
        format: FrameFormat,
        keyword_count: usize,
    }

    impl PorcupineDetector {
        /// Create the engine from validated configuration
        pub fn create(config: &DetectorConfig) -> Result<Self, DetectorError> {
            config.validate()?;

            info!("Loading Porcupine with {} keyword(s)", config.keyword_count());

            let mut builder = if config.uses_builtin_keywords() {
                let keywords = config
                    .builtin_keywords
                    .iter()
                    .map(|name| builtin(name))
                    .collect::<Result<Vec<_>, _>>()?;
                PorcupineBuilder::new_with_keywords(&config.access_key, &keywords)
            } else {
                PorcupineBuilder::new_with_keyword_paths(&config.access_key, &config.keyword_paths)
            };
            builder.sensitivities(&config.sensitivities);

            if let Some(model_path) = &config.model_path {
                builder.model_path(model_path);
            }

            if let Some(library_path) = &config.library_path {
                builder.library_path(library_path);
            }

            let engine = builder
                .init()
                .map_err(|e| DetectorError::Init(e.to_string()))?;

            let format = FrameFormat::new(engine.sample_rate(), engine.frame_length() as usize);
            debug!("Porcupine frame format: {:?}", format);

            Ok(Self {
                engine: Some(engine),
                format,
                keyword_count: config.keyword_count(),
            })
        }
    }

    impl KeywordDetector for PorcupineDetector {
        fn format(&self) -> FrameFormat {
            self.format
        }

        fn keyword_count(&self) -> usize {
            self.keyword_count
        }

        fn process(&mut self, frame: &[AudioSample]) -> Result<Option<usize>, DetectorError> {
            let engine = self
                .engine
                .as_ref()
                .ok_or_else(|| DetectorError::Process("engine already released".to_string()))?;

            let result = engine
                .process(frame)
                .map_err(|e| DetectorError::Process(e.to_string()))?;

            // Porcupine reports "no match" as -1
            Ok(usize::try_from(result).ok())
        }

        fn release(&mut self) {
            if self.engine.take().is_some() {
                debug!("Porcupine engine released");
            }
        }
    }
}

#[cfg(not(feature = "porcupine"))]
mod mock_impl {
    use super::*;
    use tracing::warn;

    /// Frames to ignore after a detection (~1s at 16kHz / 512)
    const REFRACTORY_FRAMES: usize = 31;

    /// Mock Porcupine engine
    ///
    /// Triggers on loud frames: keyword `i` matches when the frame's RMS
    /// exceeds a threshold that falls as its sensitivity rises.
    pub struct PorcupineDetector {
        thresholds: Vec<f64>,
        format: FrameFormat,
        refractory: usize,
        released: bool,
    }

    impl PorcupineDetector {
        /// Create a mock engine from validated configuration
        pub fn create(config: &DetectorConfig) -> Result<Self, DetectorError> {
            config.validate()?;

            warn!("Using MOCK keyword engine (porcupine feature not enabled)");

            let thresholds = config
                .sensitivities
                .iter()
                .map(|&s| 0.05 + 0.45 * (1.0 - f64::from(s)))
                .collect();

            Ok(Self {
                thresholds,
                format: config.format,
                refractory: 0,
                released: false,
            })
        }
    }

    impl KeywordDetector for PorcupineDetector {
        fn format(&self) -> FrameFormat {
            self.format
        }

        fn keyword_count(&self) -> usize {
            self.thresholds.len()
        }

        fn process(&mut self, frame: &[AudioSample]) -> Result<Option<usize>, DetectorError> {
            if self.released {
                return Err(DetectorError::Process("engine already released".to_string()));
            }

            if frame.len() != self.format.frame_length {
                return Err(DetectorError::Process(format!(
                    "expected {} samples, got {}",
                    self.format.frame_length,
                    frame.len()
                )));
            }

            if self.refractory > 0 {
                self.refractory -= 1;
                return Ok(None);
            }

            let energy: f64 = frame
                .iter()
                .map(|&s| {
                    let normalized = s as f64 / i16::MAX as f64;
                    normalized * normalized
                })
                .sum();
            let rms = (energy / frame.len() as f64).sqrt();

            let matched = self.thresholds.iter().position(|&t| rms > t);
            if matched.is_some() {
                self.refractory = REFRACTORY_FRAMES;
            }

            Ok(matched)
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                debug!("Mock keyword engine released");
            }
        }
    }
}

// Export the appropriate implementation
#[cfg(feature = "porcupine")]
pub use real_impl::PorcupineDetector;

#[cfg(not(feature = "porcupine"))]
pub use mock_impl::PorcupineDetector;
