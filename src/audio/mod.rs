//! # Audio Module
//!
//! Format descriptions, per-turn buffering and WAV encoding for the audio
//! that flows through a voice session.
//!
//! ## Audio Format Requirements:
//! - **Client → upstream**: 16kHz, 16-bit, mono, little-endian PCM
//! - **Upstream → client**: 24kHz, 16-bit, mono PCM, delivered as WAV

pub mod format;       // PCM format descriptors and immutable audio chunks
pub mod turn_buffer;  // Per-turn accumulation of upstream audio
pub mod wav;          // RIFF/WAVE container encoding

pub use format::{AudioChunk, PcmFormat};
pub use turn_buffer::TurnBuffer;
