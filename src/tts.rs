use reqwest::blocking::Client;
use serde_json::json;
use std::io::Read;

use crate::audio::AudioSink;
use crate::error::{KioskError, Result};
use crate::segmenter::SentenceSpeaker;

/// Bytes forwarded to the sink per read from the synthesis stream
const STREAM_CHUNK_BYTES: usize = 1024;

/// Client for the hosted speech-synthesis endpoint
pub struct TextToSpeech {
    client: Client,
    base_url: String,
    model: String,
    voice: String,
}

impl TextToSpeech {
    pub fn new(client: Client, base_url: String, model: String, voice: String) -> Self {
        Self {
            client,
            base_url,
            model,
            voice,
        }
    }

    /// Synthesize `text` and stream the PCM reply straight into the sink.
    ///
    /// This is a push pipeline: each received chunk is forwarded in arrival
    /// order before the next is read, so playback starts while the rest of
    /// the utterance is still being synthesized. Returns once the whole
    /// stream has been consumed and forwarded.
    pub fn speak(&self, text: &str, sink: &dyn AudioSink) -> Result<()> {
        if text.trim().is_empty() {
            log::debug!("Empty text, skipping TTS");
            return Ok(());
        }

        log::info!("🔊 Speaking: '{}'", text);

        let payload = json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "pcm",
        });

        let mut response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .json(&payload)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let mut body = String::new();
            let _ = response.read_to_string(&mut body);
            return Err(KioskError::TTS(format!(
                "synthesis API error {}: {}",
                status, body
            )));
        }

        let bytes_forwarded = forward_stream(&mut response, sink)?;
        log::debug!("🔊 Forwarded {} bytes to the sink", bytes_forwarded);

        Ok(())
    }
}

/// Couples the synthesis client with the playback sink so the segmenter can
/// speak sentences as it recognizes them
pub struct SentencePlayer<'a> {
    tts: &'a TextToSpeech,
    sink: &'a dyn AudioSink,
}

impl<'a> SentencePlayer<'a> {
    pub fn new(tts: &'a TextToSpeech, sink: &'a dyn AudioSink) -> Self {
        Self { tts, sink }
    }
}

impl SentenceSpeaker for SentencePlayer<'_> {
    fn speak_sentence(&mut self, sentence: &str) -> Result<()> {
        self.tts.speak(sentence, self.sink)
    }
}

/// Forward a synthesis stream to a sink chunk-by-chunk, preserving arrival
/// order. Returns the number of bytes forwarded.
pub fn forward_stream(reader: &mut dyn Read, sink: &dyn AudioSink) -> Result<usize> {
    let mut chunk = [0u8; STREAM_CHUNK_BYTES];
    let mut bytes_forwarded = 0usize;

    loop {
        let n = reader
            .read(&mut chunk)
            .map_err(|e| KioskError::TTS(format!("synthesis stream error: {}", e)))?;
        if n == 0 {
            break;
        }
        sink.write(&chunk[..n])?;
        bytes_forwarded += n;
    }

    Ok(bytes_forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Sink that records every write in order
    struct RecordingSink {
        writes: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
            }
        }
    }

    impl AudioSink for RecordingSink {
        fn write(&self, pcm: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push(pcm.to_vec());
            Ok(())
        }

        fn wait_until_idle(&self) -> Result<()> {
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stream_forwarded_in_order_without_loss() {
        // Three full chunks plus a short tail, with recognizable contents
        let mut stream = Vec::new();
        for chunk_id in 0u8..3 {
            stream.extend(std::iter::repeat(chunk_id).take(STREAM_CHUNK_BYTES));
        }
        stream.extend_from_slice(&[9, 9, 9]);

        let sink = RecordingSink::new();
        let forwarded = forward_stream(&mut Cursor::new(stream.clone()), &sink).unwrap();

        assert_eq!(forwarded, stream.len());

        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 4);
        for (chunk_id, write) in writes.iter().take(3).enumerate() {
            assert_eq!(write.len(), STREAM_CHUNK_BYTES);
            assert!(write.iter().all(|&b| b == chunk_id as u8));
        }
        assert_eq!(writes[3], vec![9, 9, 9]);

        // Concatenated writes reproduce the stream byte-for-byte
        let replayed: Vec<u8> = writes.iter().flatten().copied().collect();
        assert_eq!(replayed, stream);
    }

    #[test]
    fn test_empty_stream_forwards_nothing() {
        let sink = RecordingSink::new();
        let forwarded = forward_stream(&mut Cursor::new(Vec::new()), &sink).unwrap();

        assert_eq!(forwarded, 0);
        assert!(sink.writes.lock().unwrap().is_empty());
    }
}
