use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::error::{KioskError, Result};

/// Hosted speech services live at the standard API base; only the assistant
/// endpoint is rebindable (e.g. to a local OpenAI-compatible server)
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Deployment environment, resolved from the `ENVIRONMENT` variable in the
/// env file. DEV swaps the hosted assistant for a canned mock session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Environment {
    Dev,
    Prod,
}

/// Credentials for the hosted speech and assistant services
#[derive(Debug)]
pub struct Credentials {
    api_key: SecretBox<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub environment: Environment,
}

impl Credentials {
    /// Load credentials from the env file named on the command line
    pub fn load(env_path: &Path) -> Result<Self> {
        dotenvy::from_path(env_path).map_err(|e| {
            KioskError::Config(format!(
                "failed to load env file {}: {}",
                env_path.display(),
                e
            ))
        })?;

        let api_key = Self::load_api_key("OPENAI_API_KEY")?;
        let organization = env::var("OPENAI_ORG_ID").ok().filter(|v| !v.is_empty());
        let project = env::var("OPENAI_PROJ_ID").ok().filter(|v| !v.is_empty());

        let environment = match env::var("ENVIRONMENT") {
            Ok(value) => Environment::from_str(&value).map_err(|_| {
                KioskError::Config(format!(
                    "ENVIRONMENT must be DEV or PROD, got '{}'",
                    value
                ))
            })?,
            Err(_) => Environment::Prod,
        };

        Ok(Self {
            api_key,
            organization,
            project,
            environment,
        })
    }

    /// Load and validate a single API key from the environment
    fn load_api_key(env_var: &str) -> Result<SecretBox<String>> {
        let key = env::var(env_var)
            .map_err(|_| KioskError::Config(format!("missing required variable {}", env_var)))?;

        if key.trim().is_empty() {
            return Err(KioskError::Config(format!("{} cannot be empty", env_var)));
        }

        Ok(SecretBox::new(Box::new(key)))
    }

    /// Get the API key (use only when making API calls)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Build a blocking HTTP client carrying the credential headers for
    /// every hosted-service call
    pub fn http_client(&self) -> Result<reqwest::blocking::Client> {
        use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

        let mut headers = HeaderMap::new();

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key()))
            .map_err(|e| KioskError::Config(format!("invalid API key: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        if let Some(org) = &self.organization {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(org)
                    .map_err(|e| KioskError::Config(format!("invalid organization id: {}", e)))?,
            );
        }

        if let Some(project) = &self.project {
            headers.insert(
                "OpenAI-Project",
                HeaderValue::from_str(project)
                    .map_err(|e| KioskError::Config(format!("invalid project id: {}", e)))?,
            );
        }

        reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60)) // assistant calls can be slow
            .default_headers(headers)
            .build()
            .map_err(|e| KioskError::Config(format!("failed to build HTTP client: {}", e)))
    }
}

/// Recording and transcription settings
#[derive(Debug, Clone, Deserialize)]
pub struct SttConfig {
    /// Seconds of unconditional initial capture before endpointing starts
    #[serde(default = "default_wait_time")]
    pub wait_time: u32,
    /// Peak i16 amplitude below which a 1-second window counts as silence
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: i16,
    #[serde(default = "default_stt_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_stt_model")]
    pub model: String,
    /// Hard cap on total utterance length in seconds
    #[serde(default = "default_max_duration")]
    pub max_duration: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            wait_time: default_wait_time(),
            silence_threshold: default_silence_threshold(),
            sample_rate: default_stt_sample_rate(),
            model: default_stt_model(),
            max_duration: default_max_duration(),
        }
    }
}

/// Speech synthesis settings
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    /// Sample rate of the PCM stream the synthesis endpoint returns
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_tts_sample_rate(),
            model: default_tts_model(),
            voice: default_tts_voice(),
        }
    }
}

/// Conversational assistant settings. When `id` is set the kiosk talks to a
/// remote thread under that assistant; otherwise it keeps the conversation
/// history locally and streams chat completions.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_assistant_model")]
    pub model: String,
    #[serde(default = "default_assistant_instructions")]
    pub instructions: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            id: None,
            model: default_assistant_model(),
            instructions: default_assistant_instructions(),
            base_url: default_base_url(),
        }
    }
}

/// Top-level kiosk settings parsed from the YAML config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

impl KioskConfig {
    /// Load settings from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KioskError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: KioskConfig = serde_yaml::from_str(&contents)?;

        if config.stt.wait_time == 0 {
            return Err(KioskError::Config(
                "stt.wait_time must be at least 1 second".to_string(),
            ));
        }
        if config.stt.max_duration <= config.stt.wait_time {
            return Err(KioskError::Config(
                "stt.max_duration must exceed stt.wait_time".to_string(),
            ));
        }

        Ok(config)
    }
}

fn default_wait_time() -> u32 {
    5
}

fn default_silence_threshold() -> i16 {
    1500
}

fn default_stt_sample_rate() -> u32 {
    44100
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_max_duration() -> u32 {
    120
}

fn default_tts_sample_rate() -> u32 {
    24000
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_tts_voice() -> String {
    "alloy".to_string()
}

fn default_assistant_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_assistant_instructions() -> String {
    "You are a drive-through attendant at Starbucks. You do not speak for user.".to_string()
}

fn default_base_url() -> String {
    OPENAI_BASE_URL.to_string()
}

/// Load kiosk settings with helpful error messages for development
pub fn load_config(path: &Path) -> Result<KioskConfig> {
    match KioskConfig::load(path) {
        Ok(config) => {
            log::info!("Successfully loaded kiosk configuration");
            Ok(config)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            log::error!(
                "Expected a YAML file at {} with stt/tts/assistant sections",
                path.display()
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_credentials_load_from_env_file() {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("OPENAI_ORG_ID");
        std::env::remove_var("OPENAI_PROJ_ID");
        std::env::remove_var("ENVIRONMENT");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "OPENAI_API_KEY=sk-test123").unwrap();
        writeln!(file, "OPENAI_ORG_ID=org-abc").unwrap();
        writeln!(file, "ENVIRONMENT=DEV").unwrap();

        let credentials = Credentials::load(file.path()).unwrap();
        assert_eq!(credentials.api_key(), "sk-test123");
        assert_eq!(credentials.organization.as_deref(), Some("org-abc"));
        assert!(credentials.project.is_none());
        assert_eq!(credentials.environment, Environment::Dev);
    }

    #[test]
    #[serial]
    fn test_credentials_missing_env_file_is_fatal() {
        assert!(Credentials::load(Path::new("/nonexistent/creds.env")).is_err());
    }

    #[test]
    #[serial]
    fn test_credentials_missing_api_key_is_fatal() {
        std::env::remove_var("OPENAI_API_KEY");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ENVIRONMENT=PROD").unwrap();

        assert!(Credentials::load(file.path()).is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from_str("DEV").unwrap(), Environment::Dev);
        assert_eq!(Environment::from_str("prod").unwrap(), Environment::Prod);
        assert!(Environment::from_str("staging").is_err());
        assert_eq!(Environment::Dev.to_string(), "DEV");
    }

    #[test]
    fn test_config_defaults_from_empty_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        let config = KioskConfig::load(file.path()).unwrap();
        assert_eq!(config.stt.wait_time, 5);
        assert_eq!(config.stt.silence_threshold, 1500);
        assert_eq!(config.stt.sample_rate, 44100);
        assert_eq!(config.tts.sample_rate, 24000);
        assert_eq!(config.tts.voice, "alloy");
        assert!(config.assistant.id.is_none());
    }

    #[test]
    fn test_config_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "stt:\n  wait_time: 3\n  silence_threshold: 800\n  sample_rate: 16000\n\
             tts:\n  voice: nova\nassistant:\n  id: asst_123\n"
        )
        .unwrap();

        let config = KioskConfig::load(file.path()).unwrap();
        assert_eq!(config.stt.wait_time, 3);
        assert_eq!(config.stt.silence_threshold, 800);
        assert_eq!(config.stt.sample_rate, 16000);
        assert_eq!(config.tts.voice, "nova");
        assert_eq!(config.assistant.id.as_deref(), Some("asst_123"));
    }

    #[test]
    fn test_config_rejects_zero_wait_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "stt:\n  wait_time: 0\n").unwrap();

        assert!(KioskConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_config_rejects_cap_below_wait_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "stt:\n  wait_time: 10\n  max_duration: 10\n").unwrap();

        assert!(KioskConfig::load(file.path()).is_err());
    }
}
