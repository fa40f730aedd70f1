//! # PCM Formats and Audio Chunks
//!
//! Both directions of the bridge carry raw little-endian signed 16-bit mono PCM,
//! but at different sample rates:
//! - **Client → upstream**: 16kHz (what the device microphone pipeline produces)
//! - **Upstream → client**: 24kHz (what the speech service synthesizes)

use serde::Serialize;

/// Describes raw PCM audio: sample rate, channel count and bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PcmFormat {
    /// Samples per second, per channel
    pub sample_rate: u32,

    /// Number of interleaved channels (1 = mono)
    pub channels: u16,

    /// Bits per sample (16 for s16le)
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// Audio captured on the client device and streamed to the upstream service.
    pub const CLIENT_INPUT: Self = Self::new(16_000, 1, 16);

    /// Audio synthesized by the upstream service and played on the client.
    pub const UPSTREAM_OUTPUT: Self = Self::new(24_000, 1, 16);

    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Bytes of audio per second of playback.
    ///
    /// Saturates at `u32::MAX` for formats too wide for a RIFF header.
    pub fn byte_rate(&self) -> u32 {
        let rate = u64::from(self.sample_rate)
            * u64::from(self.channels)
            * u64::from(self.bits_per_sample)
            / 8;
        u32::try_from(rate).unwrap_or(u32::MAX)
    }

    /// Bytes per sample frame (one sample for every channel). Saturates like `byte_rate`.
    pub fn block_align(&self) -> u16 {
        let align = u32::from(self.channels) * u32::from(self.bits_per_sample) / 8;
        u16::try_from(align).unwrap_or(u16::MAX)
    }

    /// MIME tag the upstream service expects alongside raw PCM.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Playback duration of `byte_len` bytes in this format.
    pub fn duration_seconds(&self, byte_len: usize) -> f64 {
        match self.byte_rate() {
            0 => 0.0,
            rate => byte_len as f64 / f64::from(rate),
        }
    }
}

/// An immutable piece of raw audio plus the format it was captured in.
///
/// Fields are private so a chunk cannot be modified once it has been handed
/// to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
    format: PcmFormat,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, format: PcmFormat) -> Self {
        Self { data, format }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_rates() {
        let format = PcmFormat::UPSTREAM_OUTPUT;
        assert_eq!(format.byte_rate(), 48_000);
        assert_eq!(format.block_align(), 2);

        let stereo = PcmFormat::new(44_100, 2, 16);
        assert_eq!(stereo.byte_rate(), 176_400);
        assert_eq!(stereo.block_align(), 4);
    }

    #[test]
    fn test_wide_formats_saturate() {
        // Intermediate products overflow the header field widths
        let wide = PcmFormat::new(48_000, 4096, 32);
        assert_eq!(wide.byte_rate(), 786_432_000);
        assert_eq!(wide.block_align(), 16_384);

        let absurd = PcmFormat::new(u32::MAX, u16::MAX, u16::MAX);
        assert_eq!(absurd.byte_rate(), u32::MAX);
        assert_eq!(absurd.block_align(), u16::MAX);
    }

    #[test]
    fn test_mime_type_carries_rate() {
        assert_eq!(PcmFormat::CLIENT_INPUT.mime_type(), "audio/pcm;rate=16000");
    }

    #[test]
    fn test_duration() {
        // 320 bytes of 16kHz mono s16le is 10ms
        let seconds = PcmFormat::CLIENT_INPUT.duration_seconds(320);
        assert!((seconds - 0.01).abs() < f64::EPSILON);
    }
}
