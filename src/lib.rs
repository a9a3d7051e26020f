//! The main library for the `kiosk-edge-rs` voice ordering kiosk.
//!
//! This library provides all the core components for the kiosk turn loop:
//! silence-terminated audio capture, hosted speech-to-text, conversational
//! assistant sessions, incremental sentence segmentation, and streaming
//! text-to-speech playback.

// Public modules, accessible to the binary and other consumers
pub mod assistant;
pub mod audio;
pub mod config;
pub mod error;
pub mod segmenter;
pub mod stt;
pub mod tts;

// Re-export common types
pub use error::{KioskError, Result};
