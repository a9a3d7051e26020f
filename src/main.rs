use clap::Parser;
use std::path::PathBuf;

use anyhow::{Context, Result};
use kiosk_edge_rs::assistant::{create_session, ConversationSession};
use kiosk_edge_rs::audio::recorder::{CpalCapture, Recorder};
use kiosk_edge_rs::audio::sink::{CpalSink, CpalSinkConfig};
use kiosk_edge_rs::audio::AudioSink;
use kiosk_edge_rs::config::{load_config, Credentials, OPENAI_BASE_URL};
use kiosk_edge_rs::stt::SpeechToText;
use kiosk_edge_rs::tts::{SentencePlayer, TextToSpeech};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the env file with service credentials
    #[arg(long = "env-path")]
    env_path: PathBuf,

    /// Path to the kiosk settings file
    #[arg(long, default_value = "kiosk.yaml")]
    config: PathBuf,
}

/// Literal seed submitted as the first user turn so the kiosk opens with a
/// greeting before anyone has spoken
const GREETING_SEED: &str = "Hello.";

/// Main kiosk coordinator - completely blocking
pub struct Kiosk {
    recorder: Recorder,
    capture: CpalCapture,
    sink: CpalSink,
    stt: SpeechToText,
    tts: TextToSpeech,
    session: Box<dyn ConversationSession>,
}

impl Kiosk {
    pub fn new(args: &Args) -> Result<Self> {
        let credentials =
            Credentials::load(&args.env_path).context("Failed to load credentials")?;
        let config = load_config(&args.config).context("Failed to load configuration")?;

        let client = credentials
            .http_client()
            .context("Failed to build HTTP client")?;

        let sink = CpalSink::new(CpalSinkConfig {
            input_sample_rate: config.tts.sample_rate,
            ..CpalSinkConfig::default()
        })
        .context("Failed to open playback device")?;
        log::info!("🔈 Playback sink initialized");

        let capture =
            CpalCapture::new(config.stt.sample_rate).context("Failed to open capture device")?;
        let recorder = Recorder::from_config(&config.stt);
        log::info!("🎤 Recorder initialized");

        let stt = SpeechToText::new(
            client.clone(),
            OPENAI_BASE_URL.to_string(),
            config.stt.model.clone(),
        );
        log::info!("📝 STT service initialized");

        let tts = TextToSpeech::new(
            client.clone(),
            OPENAI_BASE_URL.to_string(),
            config.tts.model.clone(),
            config.tts.voice.clone(),
        );
        log::info!("🔊 TTS service initialized");

        let session = create_session(client, &config.assistant, credentials.environment)
            .context("Failed to create assistant session")?;

        Ok(Self {
            recorder,
            capture,
            sink,
            stt,
            tts,
            session,
        })
    }

    /// Run the kiosk turn loop (blocking, no terminal state)
    pub fn run(&mut self) -> Result<()> {
        log::info!("🤖 Starting kiosk turn loop");
        let mut user_text = GREETING_SEED.to_string();

        loop {
            // Speaking: the reply streams sentence-by-sentence through the
            // segmenter into TTS and the sink
            let mut player = SentencePlayer::new(&self.tts, &self.sink);
            match self.session.submit(&user_text, &mut player) {
                Ok(_reply) => {}
                Err(e) => {
                    log::error!("❌ Assistant turn failed: {}", e);
                }
            }

            // Block until the playback queue drains so the microphone never
            // hears the kiosk's own voice
            self.sink
                .wait_until_idle()
                .context("Playback sink failed")?;

            // Listening
            let utterance = self
                .recorder
                .record(&mut self.capture)
                .context("Failed to record utterance")?;

            user_text = self.stt.transcribe(&utterance);
        }
    }

    pub fn shutdown(&mut self) {
        if let Err(e) = self.session.close() {
            log::warn!("⚠️ Failed to close assistant session: {}", e);
        }
        if let Err(e) = self.sink.stop() {
            log::warn!("⚠️ Failed to stop playback sink: {}", e);
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    log::info!("🚀 Starting kiosk with args: {:?}", args);

    let mut kiosk = Kiosk::new(&args)?;
    let result = kiosk.run();

    // Only reached on a fatal turn fault; tear down the remote session and
    // the audio device before surfacing the error
    kiosk.shutdown();
    result
}
