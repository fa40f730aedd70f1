//! # WAV Container Encoding
//!
//! Wraps raw PCM in a canonical 44-byte RIFF/WAVE header so the client can
//! hand each turn straight to a media player without knowing the format.
//!
//! ## Header Layout (all integers little-endian):
//! ```text
//! offset  size  field
//!  0      4     "RIFF"
//!  4      4     chunk size      = data size + 36
//!  8      4     "WAVE"
//! 12      4     "fmt "
//! 16      4     fmt chunk size  = 16
//! 20      2     audio format    = 1 (PCM)
//! 22      2     channels
//! 24      4     sample rate
//! 28      4     byte rate       = rate * channels * bits / 8
//! 32      2     block align     = channels * bits / 8
//! 34      2     bits per sample
//! 36      4     "data"
//! 40      4     data size
//! 44      ...   samples
//! ```

use crate::audio::format::PcmFormat;
use byteorder::{ByteOrder, LittleEndian};

/// Size of the canonical PCM WAV header.
pub const HEADER_LEN: usize = 44;

const FMT_CHUNK_LEN: u32 = 16;
const PCM_AUDIO_FORMAT: u16 = 1;

/// The fields of a canonical PCM WAV header.
///
/// Computed fresh for every encode call and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_size: u32,
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavHeader {
    /// Build the header describing `data_len` bytes of PCM in `format`.
    ///
    /// Sizes beyond 4 GiB cannot be represented in a RIFF header and saturate.
    pub fn for_samples(data_len: usize, format: PcmFormat) -> Self {
        let data_size = u32::try_from(data_len).unwrap_or(u32::MAX);
        Self {
            riff_size: data_size.saturating_add(36),
            audio_format: PCM_AUDIO_FORMAT,
            channels: format.channels,
            sample_rate: format.sample_rate,
            byte_rate: format.byte_rate(),
            block_align: format.block_align(),
            bits_per_sample: format.bits_per_sample,
            data_size,
        }
    }

    /// Serialize into the 44-byte on-disk layout.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(b"RIFF");
        LittleEndian::write_u32(&mut buf[4..8], self.riff_size);
        buf[8..12].copy_from_slice(b"WAVE");
        buf[12..16].copy_from_slice(b"fmt ");
        LittleEndian::write_u32(&mut buf[16..20], FMT_CHUNK_LEN);
        LittleEndian::write_u16(&mut buf[20..22], self.audio_format);
        LittleEndian::write_u16(&mut buf[22..24], self.channels);
        LittleEndian::write_u32(&mut buf[24..28], self.sample_rate);
        LittleEndian::write_u32(&mut buf[28..32], self.byte_rate);
        LittleEndian::write_u16(&mut buf[32..34], self.block_align);
        LittleEndian::write_u16(&mut buf[34..36], self.bits_per_sample);
        buf[36..40].copy_from_slice(b"data");
        LittleEndian::write_u32(&mut buf[40..44], self.data_size);
        buf
    }
}

/// Wrap raw PCM samples in a WAV container.
///
/// Pure and infallible: the output is always `samples.len() + 44` bytes.
pub fn encode(samples: &[u8], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let format = PcmFormat::new(sample_rate, channels, bits_per_sample);
    let header = WavHeader::for_samples(samples.len(), format);

    let mut out = Vec::with_capacity(HEADER_LEN + samples.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(samples);
    out
}

/// [`encode`] with the parameters taken from a [`PcmFormat`].
pub fn encode_with(samples: &[u8], format: PcmFormat) -> Vec<u8> {
    encode(
        samples,
        format.sample_rate,
        format.channels,
        format.bits_per_sample,
    )
}

/// Header parsing, used to check encoder output.
#[cfg(test)]
pub mod reader {
    use super::{WavHeader, HEADER_LEN};
    use crate::audio::format::PcmFormat;
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::{Cursor, Read};
    use thiserror::Error;

    /// Problems found while reading a WAV header back out of a byte stream.
    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum HeaderError {
        #[error("need 44 header bytes, got {0}")]
        Truncated(usize),

        #[error("expected `{expected}` marker at offset {offset}")]
        BadMarker {
            offset: usize,
            expected: &'static str,
        },
    }

    impl WavHeader {
        /// The PCM format this header declares.
        pub fn format(&self) -> PcmFormat {
            PcmFormat::new(self.sample_rate, self.channels, self.bits_per_sample)
        }

        /// Read a canonical header from the start of `bytes`.
        pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
            if bytes.len() < HEADER_LEN {
                return Err(HeaderError::Truncated(bytes.len()));
            }

            // The slice is exactly HEADER_LEN long, so none of the reads below can run short.
            let mut cursor = Cursor::new(&bytes[..HEADER_LEN]);
            expect_marker(&mut cursor, 0, "RIFF")?;
            let riff_size = read_u32(&mut cursor);
            expect_marker(&mut cursor, 8, "WAVE")?;
            expect_marker(&mut cursor, 12, "fmt ")?;
            let _fmt_len = read_u32(&mut cursor);
            let audio_format = read_u16(&mut cursor);
            let channels = read_u16(&mut cursor);
            let sample_rate = read_u32(&mut cursor);
            let byte_rate = read_u32(&mut cursor);
            let block_align = read_u16(&mut cursor);
            let bits_per_sample = read_u16(&mut cursor);
            expect_marker(&mut cursor, 36, "data")?;
            let data_size = read_u32(&mut cursor);

            Ok(Self {
                riff_size,
                audio_format,
                channels,
                sample_rate,
                byte_rate,
                block_align,
                bits_per_sample,
                data_size,
            })
        }
    }

    fn expect_marker(
        cursor: &mut Cursor<&[u8]>,
        offset: usize,
        expected: &'static str,
    ) -> Result<(), HeaderError> {
        let mut marker = [0u8; 4];
        cursor
            .read_exact(&mut marker)
            .map_err(|_| HeaderError::Truncated(offset))?;
        if &marker != expected.as_bytes() {
            return Err(HeaderError::BadMarker { offset, expected });
        }
        Ok(())
    }

    fn read_u16(cursor: &mut Cursor<&[u8]>) -> u16 {
        cursor.read_u16::<LittleEndian>().unwrap_or_default()
    }

    fn read_u32(cursor: &mut Cursor<&[u8]>) -> u32 {
        cursor.read_u32::<LittleEndian>().unwrap_or_default()
    }
}
