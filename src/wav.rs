//! 16-bit PCM RIFF/WAVE encoding.
//!
//! The header is written by hand so the byte layout and the asymmetric
//! quantization clamp are exact; `hound` is only used to read containers back.

use std::io::Cursor;
use std::path::Path;

use crate::error::SynthError;

/// Size of the fixed RIFF/WAVE header in bytes.
pub const HEADER_LEN: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: u16 = BITS_PER_SAMPLE / 8;
const FORMAT_PCM: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Convert one float sample to a signed 16-bit value.
///
/// `v >= 1.0` clamps to 32767, `v <= -1.0` clamps to -32768, everything else
/// is `round(v * 32768)`.
pub fn quantize(v: f32) -> i16 {
    if v >= 1.0 {
        i16::MAX
    } else if v <= -1.0 {
        i16::MIN
    } else {
        // Saturating cast: values rounding up to 32768 land on i16::MAX.
        (v * 32768.0).round() as i16
    }
}

/// Encode interleaved float samples as a 16-bit PCM WAVE container.
pub fn encode(pcm: &[f32], sample_rate: u32, channels: u16) -> Result<AudioContainer, SynthError> {
    if channels == 0 {
        return Err(SynthError::Container("channel count must be positive".to_string()));
    }
    if sample_rate == 0 {
        return Err(SynthError::Container("sample rate must be positive".to_string()));
    }
    let data_len = pcm
        .len()
        .checked_mul(BYTES_PER_SAMPLE as usize)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| n.checked_add(HEADER_LEN as u32 - 8).is_some())
        .ok_or_else(|| {
            SynthError::Container(format!("{} samples exceed the RIFF size limit", pcm.len()))
        })?;

    let block_align = channels * BYTES_PER_SAMPLE;
    let byte_rate = sample_rate
        .checked_mul(block_align as u32)
        .ok_or_else(|| SynthError::Container(format!("sample rate {sample_rate} too large")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(HEADER_LEN as u32 - 8 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for &v in pcm {
        out.extend_from_slice(&quantize(v).to_le_bytes());
    }

    Ok(AudioContainer { bytes: out })
}

/// Decoded fields of a 44-byte PCM WAVE header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub chunk_size: u32,
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl WavHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, SynthError> {
        if bytes.len() < HEADER_LEN {
            return Err(SynthError::Container(format!(
                "need {HEADER_LEN} header bytes, got {}",
                bytes.len()
            )));
        }
        for (offset, tag) in [(0, b"RIFF"), (8, b"WAVE"), (12, b"fmt "), (36, b"data")] {
            if &bytes[offset..offset + 4] != tag {
                return Err(SynthError::Container(format!(
                    "expected {:?} at offset {offset}",
                    String::from_utf8_lossy(tag)
                )));
            }
        }
        let u16_at = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
        let u32_at =
            |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        Ok(Self {
            chunk_size: u32_at(4),
            audio_format: u16_at(20),
            channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            data_len: u32_at(40),
        })
    }
}

/// A finished WAVE file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioContainer {
    bytes: Vec<u8>,
}

impl AudioContainer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn header(&self) -> Result<WavHeader, SynthError> {
        WavHeader::parse(&self.bytes)
    }

    /// Number of 16-bit samples in the data chunk.
    pub fn sample_count(&self) -> usize {
        self.bytes.len().saturating_sub(HEADER_LEN) / BYTES_PER_SAMPLE as usize
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> Result<f64, SynthError> {
        let header = self.header()?;
        let frames = self.sample_count() as f64 / header.channels as f64;
        Ok(frames / header.sample_rate as f64)
    }

    /// Decode the quantized samples back out of the container.
    pub fn samples(&self) -> Result<Vec<i16>, SynthError> {
        let reader = hound::WavReader::new(Cursor::new(&self.bytes))
            .map_err(|e| SynthError::Container(e.to_string()))?;
        reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SynthError::Container(e.to_string()))
    }

    /// Write the container to disk unchanged.
    pub fn write_wav(&self, path: &Path) -> Result<(), SynthError> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_boundaries() {
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32768);
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.5), 32767);
        assert_eq!(quantize(-7.0), -32768);
        assert_eq!(quantize(0.5), 16384);
        assert_eq!(quantize(-0.5), -16384);
        assert_eq!(quantize(0.99999), 32767);
    }

    #[test]
    fn header_matches_layout() {
        let container = encode(&[0.0, 0.25, -0.25], 22050, 1).unwrap();
        let bytes = container.as_bytes();

        assert_eq!(bytes.len(), 44 + 6);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[4..8], &(36u32 + 6).to_le_bytes());
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(&bytes[16..20], &16u32.to_le_bytes());
        assert_eq!(&bytes[20..22], &1u16.to_le_bytes());
        assert_eq!(&bytes[22..24], &1u16.to_le_bytes());
        assert_eq!(&bytes[24..28], &22050u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &44100u32.to_le_bytes());
        assert_eq!(&bytes[32..34], &2u16.to_le_bytes());
        assert_eq!(&bytes[34..36], &16u16.to_le_bytes());
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(&bytes[40..44], &6u32.to_le_bytes());
        assert_eq!(&bytes[44..46], &0i16.to_le_bytes());
        assert_eq!(&bytes[46..48], &8192i16.to_le_bytes());
        assert_eq!(&bytes[48..50], &(-8192i16).to_le_bytes());
    }

    #[test]
    fn sizes_scale_with_sample_count() {
        for n in [0usize, 1, 1000] {
            let header = encode(&vec![0.1; n], 16000, 1).unwrap().header().unwrap();
            assert_eq!(header.chunk_size as usize, 36 + 2 * n);
            assert_eq!(header.data_len as usize, 2 * n);
        }
    }

    #[test]
    fn stereo_header_fields() {
        let header = encode(&[0.0; 4], 48000, 2).unwrap().header().unwrap();
        assert_eq!(header.channels, 2);
        assert_eq!(header.block_align, 4);
        assert_eq!(header.byte_rate, 192000);
    }

    #[test]
    fn encoding_is_deterministic() {
        let pcm: Vec<f32> = (0..512).map(|i| (i as f32 * 0.05).sin()).collect();
        assert_eq!(encode(&pcm, 22050, 1).unwrap(), encode(&pcm, 22050, 1).unwrap());
    }

    #[test]
    fn hound_reads_encoded_container() {
        let container = encode(&[1.0, -1.0, 0.0, 2.0], 22050, 1).unwrap();
        assert_eq!(container.samples().unwrap(), vec![32767, -32768, 0, 32767]);
        assert_eq!(container.sample_count(), 4);
    }

    #[test]
    fn duration_uses_sample_rate() {
        let container = encode(&vec![0.0; 22050], 22050, 1).unwrap();
        assert!((container.duration_secs().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_zero_channels() {
        assert!(matches!(encode(&[0.0], 22050, 0), Err(SynthError::Container(_))));
    }

    #[test]
    fn parse_rejects_truncated_or_foreign_data() {
        assert!(WavHeader::parse(&[0u8; 10]).is_err());
        let mut bytes = encode(&[0.0], 8000, 1).unwrap().into_bytes();
        bytes[8..12].copy_from_slice(b"AVI ");
        assert!(WavHeader::parse(&bytes).is_err());
    }
}
