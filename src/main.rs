/// Wake-word listener binary
///
/// Listens on a microphone for one or more wake words and answers each
/// detection with a spoken weather forecast.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use wakeword_listener::reaction::{SpeechConfig, SpeechSynthesizer, WeatherClient, WeatherConfig};
use wakeword_listener::{
    init_logging, list_input_devices, spawn_session, DetectorConfig, FrameFormat, ReactionPipeline,
    SessionConfig, VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "wakeword-listener")]
#[command(about = "Listen for wake words and answer with the weather", long_about = None)]
struct Cli {
    /// Built-in keywords, e.g. `porcupine,hey google`; ignored when --keyword-paths is set
    #[arg(long, env = "WAKEWORD_KEYWORDS", value_delimiter = ',', num_args = 1..)]
    keywords: Vec<String>,

    /// Keyword model files (.ppn)
    #[arg(long, env = "WAKEWORD_KEYWORD_PATHS", value_delimiter = ',', num_args = 1..)]
    keyword_paths: Vec<PathBuf>,

    /// Sensitivity per keyword in [0, 1]; 0.5 each if not set
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    sensitivities: Vec<f32>,

    /// Picovoice access key
    #[arg(long, env = "PORCUPINE_ACCESS_KEY", default_value = "", hide_env_values = true)]
    access_key: String,

    /// Path to the engine's dynamic library
    #[arg(long)]
    library_path: Option<PathBuf>,

    /// Path to the engine's model parameters
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Index of the input audio device
    #[arg(long)]
    audio_device_index: Option<usize>,

    /// Record the session audio to this WAV file
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// List input audio devices and exit
    #[arg(long)]
    show_audio_devices: bool,

    /// RapidAPI key for the Dark Sky forecast
    #[arg(long, env = "DARK_SKY_API_KEY", hide_env_values = true)]
    weather_api_key: Option<String>,

    #[arg(long, default_value_t = 42.42, allow_negative_numbers = true)]
    latitude: f64,

    #[arg(long, default_value_t = -71.16, allow_negative_numbers = true)]
    longitude: f64,

    /// Google Cloud Text-to-Speech API key
    #[arg(long, env = "GOOGLE_TTS_API_KEY", hide_env_values = true)]
    tts_api_key: Option<String>,

    /// Keep the last synthesized forecast in this WAV file
    #[arg(long)]
    speech_output: Option<PathBuf>,

    /// Only announce detections, skip the forecast
    #[arg(long)]
    no_weather: bool,
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();

    let result = if cli.show_audio_devices {
        show_audio_devices()
    } else {
        listen(cli).await
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn show_audio_devices() -> anyhow::Result<()> {
    let devices = list_input_devices().context("Failed to list audio devices")?;

    for device in devices {
        println!("{}", device);
    }

    Ok(())
}

async fn listen(cli: Cli) -> anyhow::Result<()> {
    info!("Starting wakeword-listener v{}", VERSION);

    let config = session_config(&cli);
    config.validate().context("Invalid configuration")?;

    let reaction = build_reaction(&cli)?;

    let handle = spawn_session(config, reaction).context("Failed to start listening")?;
    let stop = handle.stop_token();
    let mut session = tokio::task::spawn_blocking(move || handle.join());

    let joined = tokio::select! {
        joined = &mut session => joined,
        _ = tokio::signal::ctrl_c() => {
            println!("Stopping ...");
            stop.request_stop();
            session.await
        }
    };

    let report = joined
        .context("Detection thread could not be joined")?
        .context("Listening session failed")?;

    info!(
        "Session ended: {} frames, {} detection(s), {} failed reaction(s)",
        report.stats.frames_processed, report.stats.detections, report.stats.reaction_failures
    );

    if let Some(path) = report.recording {
        println!("Recording saved to {}", path.display());
    }

    Ok(())
}

fn session_config(cli: &Cli) -> SessionConfig {
    let detector = DetectorConfig {
        access_key: cli.access_key.clone(),
        library_path: cli.library_path.clone(),
        model_path: cli.model_path.clone(),
        builtin_keywords: cli.keywords.clone(),
        keyword_paths: cli.keyword_paths.clone(),
        sensitivities: cli.sensitivities.clone(),
        format: FrameFormat::default(),
    }
    .with_default_sensitivities();

    SessionConfig {
        detector,
        input_device: cli.audio_device_index,
        output_path: cli.output_path.clone(),
    }
}

fn build_reaction(cli: &Cli) -> anyhow::Result<ReactionPipeline> {
    let pipeline = ReactionPipeline::new(Handle::current());

    if cli.no_weather {
        return Ok(pipeline);
    }

    let Some(api_key) = cli.weather_api_key.clone() else {
        warn!("DARK_SKY_API_KEY not set, detections will only be announced");
        return Ok(pipeline);
    };

    let weather = WeatherClient::new(WeatherConfig {
        api_key,
        latitude: cli.latitude,
        longitude: cli.longitude,
        ..Default::default()
    })
    .context("Failed to create weather client")?;
    let pipeline = pipeline.with_weather(weather);

    let Some(api_key) = cli.tts_api_key.clone() else {
        warn!("GOOGLE_TTS_API_KEY not set, forecasts will be printed but not spoken");
        return Ok(pipeline);
    };

    let speech = SpeechSynthesizer::new(SpeechConfig {
        api_key,
        output_path: cli.speech_output.clone(),
        ..Default::default()
    })
    .context("Failed to create speech synthesizer")?;

    Ok(pipeline.with_speech(speech))
}
