pub mod recorder;
pub mod sink;

use crate::error::{KioskError, Result};

/// One bounded audio capture representing a user's spoken turn.
///
/// Always mono 16-bit PCM. Created by the recorder when silence terminates a
/// capture, consumed exactly once by the transcription service, then dropped.
#[derive(Debug, Clone)]
pub struct Utterance {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl Utterance {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Largest absolute sample value in the utterance
    pub fn peak_amplitude(&self) -> u16 {
        self.samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    /// Encode the utterance as a WAV byte buffer for upload to the
    /// transcription endpoint
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| KioskError::Audio(e.to_string()))?;

            for &sample in &self.samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| KioskError::Audio(e.to_string()))?;
            }

            writer
                .finalize()
                .map_err(|e| KioskError::Audio(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}

/// Core trait for audio output handling
pub trait AudioSink: Send + Sync {
    /// Queue 16-bit little-endian PCM for playback. Chunks are played
    /// strictly in the order they are written, never reordered or dropped.
    fn write(&self, pcm: &[u8]) -> Result<()>;

    /// Block until every queued sample has been played out
    fn wait_until_idle(&self) -> Result<()>;

    /// Stop audio playback and clear any buffered data
    fn stop(&self) -> Result<()>;
}
