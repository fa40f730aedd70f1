//! # Turn Buffer
//!
//! Accumulates the audio fragments of one spoken response ("turn") from the
//! upstream service, then hands the whole turn out as a single WAV file.
//!
//! ## Ownership:
//! A `TurnBuffer` is a plain owned value with no interior locking. Exactly one
//! task (the outbound pump) holds it, so appends and flushes never race.

use crate::audio::format::PcmFormat;
use crate::audio::wav;

/// Per-turn PCM accumulator.
#[derive(Debug)]
pub struct TurnBuffer {
    /// Raw PCM bytes received so far in the current turn
    pcm: Vec<u8>,

    /// Format of the accumulated audio (fixed for the lifetime of the buffer)
    format: PcmFormat,
}

impl TurnBuffer {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            pcm: Vec::new(),
            format,
        }
    }

    /// Append one audio fragment in arrival order.
    pub fn append(&mut self, fragment: &[u8]) {
        self.pcm.extend_from_slice(fragment);
    }

    /// Seconds of playback currently buffered.
    pub fn duration_seconds(&self) -> f64 {
        self.format.duration_seconds(self.pcm.len())
    }

    /// Close the current turn.
    ///
    /// Returns the buffered audio wrapped in a WAV container and leaves the
    /// buffer empty, or `None` when the turn carried no audio at all.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.pcm.is_empty() {
            return None;
        }

        let encoded = wav::encode_with(&self.pcm, self.format);
        self.pcm.clear();
        Some(encoded)
    }
}
