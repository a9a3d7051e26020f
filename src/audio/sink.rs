use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{unbounded, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::AudioSink;
use crate::error::{KioskError, Result};

pub struct CpalSinkConfig {
    /// Sample rate of the PCM fed into the sink (the synthesis stream rate)
    pub input_sample_rate: u32,
    /// Buffer size in milliseconds
    pub buffer_size_ms: u32,
    /// Warning threshold for high buffer (percentage)
    pub high_buffer_warning: u8,
}

impl Default for CpalSinkConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 24000,
            buffer_size_ms: 45000,
            high_buffer_warning: 80,
        }
    }
}

struct CpalStats {
    /// Bytes accepted by `write` but not yet decoded onto the sample queue
    bytes_in_flight: AtomicUsize,
    /// Samples on the queue not yet played out
    pending_samples: AtomicUsize,
    max_buffer_samples: usize,
}

impl CpalStats {
    fn new(max_buffer_samples: usize) -> Self {
        Self {
            bytes_in_flight: AtomicUsize::new(0),
            pending_samples: AtomicUsize::new(0),
            max_buffer_samples,
        }
    }

    fn buffer_percentage(&self) -> u8 {
        ((self.pending_samples.load(Ordering::Acquire) * 100) / self.max_buffer_samples) as u8
    }

    fn is_idle(&self) -> bool {
        // A chunk leaves bytes_in_flight only after its samples are on the
        // queue, so bytes must be read first: whichever side of that handoff
        // the reads land on, one of the two counters is still nonzero
        self.bytes_in_flight.load(Ordering::Acquire) == 0
            && self.pending_samples.load(Ordering::Acquire) == 0
    }
}

enum AudioCommand {
    PlayAudio(Vec<u8>),
    Stop,
}

/// Playback sink over the default cpal output device.
///
/// PCM chunks are handed to a dedicated audio thread over a channel, decoded
/// to f32 and appended to a single ordered sample queue. The device callback
/// drains the queue front-to-back with linear-interpolation resampling to the
/// device rate, so arrival order is playback order.
pub struct CpalSink {
    audio_sender: Sender<AudioCommand>,
    stats: Arc<CpalStats>,
    config: CpalSinkConfig,
    is_stopped: Arc<AtomicBool>,
    audio_thread: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(config: CpalSinkConfig) -> Result<Self> {
        log::debug!("AudioSink: Creating new CpalSink");
        let (audio_sender, audio_receiver) = unbounded();
        let stats = Arc::new(CpalStats::new(
            (config.buffer_size_ms as usize * config.input_sample_rate as usize) / 1000,
        ));
        let stats_clone = Arc::clone(&stats);
        let is_stopped = Arc::new(AtomicBool::new(false));

        let host = cpal::default_host();
        log::debug!("AudioSink: Using audio host: {:?}", host.id());

        let device = match host.default_output_device() {
            Some(dev) => {
                log::debug!("AudioSink: Using output device: {:?}", dev.name());
                dev
            }
            None => {
                log::error!("AudioSink: No output device found!");
                return Err(KioskError::Audio("no output device found".to_string()));
            }
        };

        // Play at whatever the device prefers and resample our input to match
        let supported_config = device
            .default_output_config()
            .map_err(|e| KioskError::Audio(e.to_string()))?;

        log::debug!("AudioSink: Using output config: {:?}", supported_config);

        let output_sample_rate = supported_config.sample_rate().0;
        let output_channels = supported_config.channels() as usize;
        let input_sample_rate = config.input_sample_rate;

        let samples_queue = Arc::new(Mutex::new(Vec::new()));
        let samples_queue_clone = Arc::clone(&samples_queue);
        let stats_playback = Arc::clone(&stats);

        let audio_thread = thread::spawn(move || {
            log::debug!("AudioSink: Audio thread started");
            let stream = match device.build_output_stream(
                &supported_config.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = samples_queue_clone.lock().unwrap();
                    let initial_len = queue.len();

                    // How many input samples this output buffer consumes
                    let output_frames = data.len() / output_channels;
                    let input_samples_needed = (output_frames as f32 * input_sample_rate as f32
                        / output_sample_rate as f32)
                        .ceil() as usize;

                    // Fill output with available samples or silence, linearly
                    // interpolating between input samples
                    let mut input_sample_idx: f32 = 0.0;
                    let input_sample_step = input_sample_rate as f32 / output_sample_rate as f32;

                    for frame in data.chunks_mut(output_channels) {
                        let sample = if !queue.is_empty() {
                            let idx_floor = input_sample_idx.floor() as usize;
                            let idx_ceil = (input_sample_idx + 1.0).floor() as usize;
                            let fract = input_sample_idx.fract();

                            let sample1 = if idx_floor < queue.len() {
                                queue[idx_floor]
                            } else {
                                0.0
                            };

                            let sample2 = if idx_ceil < queue.len() {
                                queue[idx_ceil]
                            } else {
                                0.0
                            };

                            sample1 * (1.0 - fract) + sample2 * fract
                        } else {
                            0.0
                        };

                        for channel in frame.iter_mut() {
                            *channel = sample;
                        }

                        input_sample_idx += input_sample_step;
                    }

                    // Remove played samples
                    if input_samples_needed <= queue.len() {
                        queue.drain(0..input_samples_needed);
                    } else {
                        queue.clear();
                    }

                    let samples_played = initial_len - queue.len();
                    if samples_played > 0 {
                        // Saturating: a concurrent stop may have zeroed the
                        // counter under us
                        let _ = stats_playback.pending_samples.fetch_update(
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            |v| Some(v.saturating_sub(samples_played)),
                        );
                        log::trace!(
                            "AudioSink: Played {} samples ({} remaining)",
                            samples_played,
                            queue.len()
                        );
                    }
                },
                move |err| {
                    log::error!("AudioSink: Stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("AudioSink: Failed to create audio stream: {}", e);
                    return;
                }
            };

            log::debug!("AudioSink: Starting audio playback stream");
            if let Err(e) = stream.play() {
                log::error!("AudioSink: Failed to start audio stream: {}", e);
                return;
            }

            // A chunk boundary can split an i16 sample; the dangling byte is
            // carried into the next chunk
            let mut carry: Option<u8> = None;

            while let Ok(command) = audio_receiver.recv() {
                match command {
                    AudioCommand::PlayAudio(audio_data) => {
                        log::trace!(
                            "AudioSink: Received {} bytes of audio data",
                            audio_data.len()
                        );
                        let mut bytes = Vec::with_capacity(audio_data.len() + 1);
                        if let Some(b) = carry.take() {
                            bytes.push(b);
                        }
                        bytes.extend_from_slice(&audio_data);
                        if bytes.len() % 2 != 0 {
                            carry = bytes.pop();
                        }

                        {
                            let mut queue = samples_queue.lock().unwrap();
                            for chunk in bytes.chunks_exact(2) {
                                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                                queue.push(sample as f32 / 32768.0);
                            }
                        }
                        stats_clone
                            .pending_samples
                            .fetch_add(bytes.len() / 2, Ordering::AcqRel);
                        stats_clone
                            .bytes_in_flight
                            .fetch_sub(audio_data.len(), Ordering::AcqRel);
                    }
                    AudioCommand::Stop => {
                        log::debug!("AudioSink: Received stop command");
                        samples_queue.lock().unwrap().clear();
                        stats_clone.pending_samples.store(0, Ordering::Release);
                        stats_clone.bytes_in_flight.store(0, Ordering::Release);
                        break;
                    }
                }
            }

            log::debug!("AudioSink: Audio thread exiting");
            // Stream is dropped here when the thread exits
        });

        log::debug!("AudioSink: Successfully created CpalSink");
        Ok(Self {
            audio_sender,
            stats,
            config,
            is_stopped,
            audio_thread: Some(audio_thread),
        })
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if !self.is_stopped.load(Ordering::Acquire) {
            if let Err(e) = self.audio_sender.send(AudioCommand::Stop) {
                log::error!("Failed to send stop command: {}", e);
            }
        }

        if let Some(thread) = self.audio_thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Failed to join audio thread: {:?}", e);
            }
        }
    }
}

impl AudioSink for CpalSink {
    fn write(&self, pcm: &[u8]) -> Result<()> {
        if self.is_stopped.load(Ordering::Acquire) {
            log::warn!("AudioSink: Cannot write - sink is stopped");
            return Err(KioskError::Audio("sink is stopped".to_string()));
        }

        let buffer_percentage = self.stats.buffer_percentage();
        if buffer_percentage > self.config.high_buffer_warning {
            log::warn!(
                "AudioSink: Buffer high warning: {}% (threshold: {}%)",
                buffer_percentage,
                self.config.high_buffer_warning
            );
        }

        if buffer_percentage >= 100 {
            log::error!("AudioSink: Buffer full, refusing to drop audio");
            return Err(KioskError::Audio("playback buffer full".to_string()));
        }

        self.stats
            .bytes_in_flight
            .fetch_add(pcm.len(), Ordering::AcqRel);

        if let Err(e) = self.audio_sender.send(AudioCommand::PlayAudio(pcm.to_vec())) {
            self.stats
                .bytes_in_flight
                .fetch_sub(pcm.len(), Ordering::AcqRel);
            return Err(KioskError::Audio(e.to_string()));
        }

        log::trace!(
            "AudioSink: Queued {} bytes (buffer: {}%)",
            pcm.len(),
            buffer_percentage
        );

        Ok(())
    }

    fn wait_until_idle(&self) -> Result<()> {
        log::debug!("AudioSink: Waiting for playback queue to drain");
        while !self.stats.is_idle() {
            if self.is_stopped.load(Ordering::Acquire) {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        log::debug!("AudioSink: Playback queue drained");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        log::debug!("AudioSink: Stopping sink");
        self.is_stopped.store(true, Ordering::Release);
        self.audio_sender
            .send(AudioCommand::Stop)
            .map_err(|e| KioskError::Audio(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // These touch a real output device; run with --features test-audio
    #[cfg(feature = "test-audio")]
    mod device {
        use super::super::*;
        use serial_test::serial;

        #[test]
        #[serial]
        fn test_cpal_sink_creation() {
            let config = CpalSinkConfig::default();
            match CpalSink::new(config) {
                Ok(sink) => {
                    assert!(!sink.is_stopped.load(Ordering::Acquire));
                }
                Err(e) => {
                    log::warn!("Audio device not available in test environment: {}", e);
                }
            }
        }

        #[test]
        #[serial]
        fn test_cpal_sink_write_and_drain() {
            let config = CpalSinkConfig {
                input_sample_rate: 16000,
                ..CpalSinkConfig::default()
            };
            let Ok(sink) = CpalSink::new(config) else {
                log::warn!("Audio device not available in test environment");
                return;
            };

            // 200ms of 440Hz sine
            let sample_rate = 16000;
            let num_samples = sample_rate / 5;
            let mut samples = Vec::with_capacity(num_samples * 2);
            for i in 0..num_samples {
                let t = i as f32 / sample_rate as f32;
                let value = (2.0 * std::f32::consts::PI * 440.0 * t).sin();
                let sample = (value * i16::MAX as f32) as i16;
                samples.extend_from_slice(&sample.to_le_bytes());
            }

            sink.write(&samples).unwrap();
            sink.wait_until_idle().unwrap();
            assert_eq!(sink.stats.pending_samples.load(Ordering::Acquire), 0);
        }

        #[test]
        #[serial]
        fn test_cpal_sink_stop() {
            let config = CpalSinkConfig::default();
            let Ok(sink) = CpalSink::new(config) else {
                log::warn!("Audio device not available in test environment");
                return;
            };

            sink.stop().unwrap();
            assert!(sink.is_stopped.load(Ordering::Acquire));
            assert!(sink.write(&[0, 0]).is_err());
        }
    }
}
