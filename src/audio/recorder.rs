use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::Utterance;
use crate::config::SttConfig;
use crate::error::{KioskError, Result};

/// Trait for audio sources that can provide fixed-duration capture windows
pub trait CaptureSource {
    /// Capture `seconds` of mono i16 PCM (blocking)
    fn read_window(&mut self, seconds: u32) -> Result<Vec<i16>>;

    /// Discard any audio buffered before this call
    fn flush(&mut self);

    fn sample_rate(&self) -> u32;
}

/// Capture source over the default cpal input device.
///
/// The input stream runs continuously so consecutive windows are contiguous;
/// the recorder flushes stale audio before a capture session begins.
pub struct CpalCapture {
    buffer: Arc<Mutex<Vec<i16>>>,
    _stream: cpal::Stream,
    sample_rate: u32,
}

impl CpalCapture {
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| KioskError::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| KioskError::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| {
                KioskError::Audio(format!(
                    "no mono input config at {} Hz on the default device",
                    sample_rate
                ))
            })?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        log::debug!(
            "Recorder: Using input device {:?} at {} Hz",
            device.name(),
            sample_rate
        );

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&buffer);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = writer.lock() {
                        buf.extend(data.iter().map(|&s| {
                            let clamped = s.clamp(-1.0, 1.0);
                            (clamped * 32768.0).clamp(-32768.0, 32767.0) as i16
                        }));
                    }
                },
                |err| {
                    log::error!("Recorder: Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| KioskError::Audio(e.to_string()))?;

        stream.play().map_err(|e| KioskError::Audio(e.to_string()))?;

        Ok(Self {
            buffer,
            _stream: stream,
            sample_rate,
        })
    }
}

impl CaptureSource for CpalCapture {
    fn read_window(&mut self, seconds: u32) -> Result<Vec<i16>> {
        let target = (seconds * self.sample_rate) as usize;

        loop {
            {
                let mut buf = self.buffer.lock().unwrap();
                if buf.len() >= target {
                    return Ok(buf.drain(..target).collect());
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn flush(&mut self) {
        self.buffer.lock().unwrap().clear();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Voice-activity-triggered recorder.
///
/// Captures an unconditional initial window of `wait_time` seconds so the
/// start of speech is never truncated, then appends 1-second windows until a
/// window's peak amplitude falls below the silence threshold. The terminating
/// quiet window stays in the buffer since it can carry the tail of a word.
pub struct Recorder {
    wait_time: u32,
    silence_threshold: i16,
    max_duration: u32,
}

impl Recorder {
    pub fn new(wait_time: u32, silence_threshold: i16, max_duration: u32) -> Self {
        Self {
            wait_time,
            silence_threshold,
            max_duration,
        }
    }

    pub fn from_config(config: &SttConfig) -> Self {
        Self::new(
            config.wait_time,
            config.silence_threshold,
            config.max_duration,
        )
    }

    /// Record one silence-terminated utterance from the source
    pub fn record<S: CaptureSource>(&self, source: &mut S) -> Result<Utterance> {
        source.flush();
        let sample_rate = source.sample_rate();
        let max_samples = (self.max_duration as usize) * (sample_rate as usize);

        log::info!("🎙️ Listening...");
        let mut samples = source.read_window(self.wait_time)?;

        loop {
            let window = source.read_window(1)?;
            let peak = window.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
            samples.extend_from_slice(&window);

            if peak < self.silence_threshold as u16 {
                log::debug!(
                    "Recorder: Window peak {} below threshold {}, ending capture",
                    peak,
                    self.silence_threshold
                );
                break;
            }

            if samples.len() >= max_samples {
                log::warn!(
                    "⏰ Recording reached the {}s cap, ending capture",
                    self.max_duration
                );
                break;
            }
        }

        let utterance = Utterance::new(samples, sample_rate);
        log::info!("🎙️ Captured {:.1}s utterance", utterance.duration_secs());
        Ok(utterance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    /// Source that replays scripted 1-second window peaks, then silence
    struct ScriptedSource {
        peaks: Vec<i16>,
        cursor: usize,
        flushed: bool,
    }

    impl ScriptedSource {
        fn new(peaks: Vec<i16>) -> Self {
            Self {
                peaks,
                cursor: 0,
                flushed: false,
            }
        }

        fn window_with_peak(&self, peak: i16, seconds: u32) -> Vec<i16> {
            let mut window = vec![0i16; (seconds * RATE) as usize];
            if let Some(first) = window.first_mut() {
                *first = peak;
            }
            window
        }
    }

    impl CaptureSource for ScriptedSource {
        fn read_window(&mut self, seconds: u32) -> Result<Vec<i16>> {
            // The initial window consumes one scripted peak per second
            let mut combined = Vec::new();
            for _ in 0..seconds {
                let peak = self.peaks.get(self.cursor).copied().unwrap_or(0);
                self.cursor += 1;
                combined.extend(self.window_with_peak(peak, 1));
            }
            Ok(combined)
        }

        fn flush(&mut self) {
            self.flushed = true;
        }

        fn sample_rate(&self) -> u32 {
            RATE
        }
    }

    #[test_log::test]
    fn test_silence_terminates_after_k_loud_windows() {
        let wait_time = 2;
        for k in 0..4usize {
            // wait_time seconds of anything, then k loud windows, then quiet
            let mut peaks = vec![5000i16; wait_time as usize];
            peaks.extend(vec![5000i16; k]);
            peaks.push(100);

            let mut source = ScriptedSource::new(peaks);
            let recorder = Recorder::new(wait_time, 1500, 120);
            let utterance = recorder.record(&mut source).unwrap();

            // Initial window + k loud windows + the terminating quiet window
            let expected_secs = wait_time as usize + k + 1;
            assert_eq!(
                utterance.samples().len(),
                expected_secs * RATE as usize,
                "k={}",
                k
            );
            assert!(source.flushed);
        }
    }

    #[test]
    fn test_immediate_silence_yields_minimum_length() {
        // Quiet from the very first endpointing window
        let mut source = ScriptedSource::new(vec![100; 10]);
        let recorder = Recorder::new(3, 1500, 120);
        let utterance = recorder.record(&mut source).unwrap();

        assert_eq!(utterance.samples().len(), 4 * RATE as usize);
        assert_eq!(utterance.duration_secs(), 4.0);
    }

    #[test_log::test]
    fn test_max_duration_caps_endless_speech() {
        // Peaks never drop below the threshold
        let mut source = ScriptedSource::new(vec![5000; 100]);
        let recorder = Recorder::new(2, 1500, 6);
        let utterance = recorder.record(&mut source).unwrap();

        assert_eq!(utterance.samples().len(), 6 * RATE as usize);
    }

    #[test]
    fn test_negative_peaks_count_as_sound() {
        // A window whose only energy is a negative excursion must not be
        // treated as silence
        struct NegativeSource {
            served: usize,
        }

        impl CaptureSource for NegativeSource {
            fn read_window(&mut self, seconds: u32) -> Result<Vec<i16>> {
                let mut window = vec![0i16; (seconds * RATE) as usize];
                self.served += 1;
                if self.served <= 2 {
                    window[0] = -5000;
                }
                Ok(window)
            }

            fn flush(&mut self) {}

            fn sample_rate(&self) -> u32 {
                RATE
            }
        }

        let mut source = NegativeSource { served: 0 };
        let recorder = Recorder::new(1, 1500, 120);
        let utterance = recorder.record(&mut source).unwrap();

        // Initial window, one loud (negative) window, one quiet window
        assert_eq!(utterance.samples().len(), 3 * RATE as usize);
    }
}
