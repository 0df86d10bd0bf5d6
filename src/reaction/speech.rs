//! Text-to-speech synthesis via Google Cloud Text-to-Speech

use super::ReactionError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const GOOGLE_TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Whole-request timeout used unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Voice and output settings
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_key: String,

    /// BCP-47 language of the voice
    pub language_code: String,

    /// `FEMALE`, `MALE` or `NEUTRAL`
    pub ssml_gender: String,

    pub speaking_rate: f32,

    /// Keep a copy of the synthesized WAV here
    pub output_path: Option<PathBuf>,

    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            language_code: "en-GB".to_string(),
            ssml_gender: "FEMALE".to_string(),
            speaking_rate: 1.1,
            output_path: None,
            endpoint: GOOGLE_TTS_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: TextInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct TextInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    ssml_gender: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    speaking_rate: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Synthesizes speech as 16-bit PCM WAV
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    config: SpeechConfig,
}

impl SpeechSynthesizer {
    pub fn new(config: SpeechConfig) -> Result<Self, ReactionError> {
        if config.api_key.is_empty() {
            return Err(ReactionError::Synthesis(
                "Google Text-to-Speech API key required".to_string(),
            ));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn request<'a>(&'a self, text: &'a str) -> SynthesizeRequest<'a> {
        SynthesizeRequest {
            input: TextInput { text },
            voice: VoiceSelection {
                language_code: &self.config.language_code,
                ssml_gender: &self.config.ssml_gender,
            },
            audio_config: AudioConfig {
                audio_encoding: "LINEAR16",
                speaking_rate: self.config.speaking_rate,
            },
        }
    }

    /// Synthesize `text`, returning WAV bytes
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ReactionError> {
        debug!("Synthesizing {} characters", text.len());

        let response = self
            .client
            .post(&self.config.endpoint)
            .query(&[("key", &self.config.api_key)])
            .json(&self.request(text))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReactionError::Synthesis(format!("{}: {}", status, body)));
        }

        let body: SynthesizeResponse = response.json().await?;
        let audio = decode_audio_content(&body.audio_content)?;

        if let Some(path) = &self.config.output_path {
            std::fs::write(path, &audio).map_err(|e| {
                ReactionError::Synthesis(format!("cannot write {}: {}", path.display(), e))
            })?;
            info!("Audio content written to file {}", path.display());
        }

        Ok(audio)
    }
}

fn decode_audio_content(encoded: &str) -> Result<Vec<u8>, ReactionError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| ReactionError::Synthesis(format!("invalid audio content: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthesizer() -> SpeechSynthesizer {
        SpeechSynthesizer::new(SpeechConfig {
            api_key: "key".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let synthesizer = synthesizer();
        let body = serde_json::to_value(synthesizer.request("Sunny")).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "input": { "text": "Sunny" },
                "voice": { "languageCode": "en-GB", "ssmlGender": "FEMALE" },
                "audioConfig": { "audioEncoding": "LINEAR16", "speakingRate": 1.1f32 }
            })
        );
    }

    #[test]
    fn test_decode_audio_content() {
        let encoded = STANDARD.encode(b"RIFF....WAVE");
        assert_eq!(decode_audio_content(&encoded).unwrap(), b"RIFF....WAVE");
        assert!(decode_audio_content("not base64!").is_err());
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        assert!(SpeechSynthesizer::new(SpeechConfig::default()).is_err());
    }
}
