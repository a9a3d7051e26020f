use reqwest::blocking::{multipart, Client};
use serde::Deserialize;

use crate::audio::Utterance;
use crate::error::{KioskError, Result};

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for the hosted transcription endpoint
pub struct SpeechToText {
    client: Client,
    base_url: String,
    model: String,
}

impl SpeechToText {
    pub fn new(client: Client, base_url: String, model: String) -> Self {
        Self {
            client,
            base_url,
            model,
        }
    }

    /// Transcribe one utterance.
    ///
    /// Never fails the turn: unintelligible audio and service errors both
    /// degrade to an empty transcript, with the error logged.
    pub fn transcribe(&self, utterance: &Utterance) -> String {
        match self.request_transcription(utterance) {
            Ok(text) => {
                if text.trim().is_empty() {
                    log::info!("📝 No speech recognized in utterance");
                }
                text
            }
            Err(e) => {
                log::warn!("⚠️ Transcription failed, continuing with empty text: {}", e);
                String::new()
            }
        }
    }

    fn request_transcription(&self, utterance: &Utterance) -> Result<String> {
        let wav = utterance.to_wav()?;
        log::debug!(
            "🎤 Uploading {:.1}s utterance ({} bytes) for transcription",
            utterance.duration_secs(),
            wav.len()
        );

        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(wav)
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| KioskError::STT(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(KioskError::STT(format!(
                "transcription API error {}: {}",
                status, body
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .map_err(|e| KioskError::STT(format!("invalid transcription response: {}", e)))?;

        log::info!("📝 Transcript: '{}'", result.text);
        Ok(result.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_stt() -> SpeechToText {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(200))
            .build()
            .unwrap();
        // A port from the reserved test range, so the request always fails
        SpeechToText::new(
            client,
            "http://127.0.0.1:9/v1".to_string(),
            "whisper-1".to_string(),
        )
    }

    #[test]
    fn test_service_error_degrades_to_empty_text() {
        let stt = unreachable_stt();
        let utterance = Utterance::new(vec![0i16; 1600], 16000);

        assert_eq!(stt.transcribe(&utterance), "");
    }

    #[test]
    fn test_request_transcription_reports_error() {
        let stt = unreachable_stt();
        let utterance = Utterance::new(vec![0i16; 1600], 16000);

        assert!(stt.request_transcription(&utterance).is_err());
    }
}
