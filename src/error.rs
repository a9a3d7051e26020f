use thiserror::Error;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("STT error: {0}")]
    STT(String),

    #[error("TTS error: {0}")]
    TTS(String),

    #[error("Assistant error: {0}")]
    Assistant(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Network error: {0}")]
    Network(String),
}

pub type Result<T> = std::result::Result<T, KioskError>;

impl From<std::io::Error> for KioskError {
    fn from(err: std::io::Error) -> Self {
        KioskError::Audio(err.to_string())
    }
}

impl From<reqwest::Error> for KioskError {
    fn from(err: reqwest::Error) -> Self {
        KioskError::Network(err.to_string())
    }
}

impl From<serde_yaml::Error> for KioskError {
    fn from(err: serde_yaml::Error) -> Self {
        KioskError::Config(err.to_string())
    }
}
