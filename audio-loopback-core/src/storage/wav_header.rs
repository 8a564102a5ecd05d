//! RIFF/WAVE header layout shared by the reader and writer.
//!
//! ```text
//! "RIFF" <riff size> "WAVE"
//! "fmt " <fmt size>  WAVEFORMATEX [+ cbSize extension bytes]
//! "data" <data size> samples...
//! ```

use crate::models::error::AudioError;
use crate::models::format::{ExtensibleFormat, WaveFormat, EXTENSIBLE_CB_SIZE, WAVE_FORMAT_EXTENSIBLE, WAVE_FORMAT_PCM};

/// Chunk id + size.
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Size of the base `WAVEFORMATEX` including `cbSize`.
pub const WAVEFORMATEX_SIZE: usize = 18;

/// `PCMWAVEFORMAT`, the only format stored without `cbSize`.
pub const PCM_FORMAT_SIZE: usize = 16;

/// Bytes 4..16 of `KSDATAFORMAT_SUBTYPE_*` GUIDs; bytes 0..4 carry the format tag.
pub const SUBTYPE_GUID_TAIL: [u8; 12] = [0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71];

/// Size of the `fmt ` chunk payload for `format`.
pub fn format_size(format: &WaveFormat) -> usize {
    if format.format_tag == WAVE_FORMAT_PCM {
        PCM_FORMAT_SIZE
    } else {
        WAVEFORMATEX_SIZE + format.cb_size() as usize
    }
}

/// Size of the header preceding the sample data.
pub fn header_size(format: &WaveFormat) -> usize {
    // "RIFF" + size + "WAVE", fmt chunk, data chunk header
    CHUNK_HEADER_SIZE + 4 + CHUNK_HEADER_SIZE + format_size(format) + CHUNK_HEADER_SIZE
}

/// Serialize `format` as the payload of a `fmt ` chunk.
pub fn encode_format(format: &WaveFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(format_size(format));
    out.extend_from_slice(&format.format_tag.to_le_bytes());
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.samples_per_sec.to_le_bytes());
    out.extend_from_slice(&format.avg_bytes_per_sec.to_le_bytes());
    out.extend_from_slice(&format.block_align.to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());
    if format.format_tag == WAVE_FORMAT_PCM {
        return out;
    }

    out.extend_from_slice(&format.cb_size().to_le_bytes());
    if let Some(ext) = format.extensible {
        out.extend_from_slice(&ext.valid_bits_per_sample.to_le_bytes());
        out.extend_from_slice(&ext.channel_mask.to_le_bytes());
        out.extend_from_slice(&(ext.sub_format as u32).to_le_bytes());
        out.extend_from_slice(&SUBTYPE_GUID_TAIL);
    }
    out
}

/// Parse the payload of a `fmt ` chunk.
///
/// An extensible format whose sub-format GUID is not one of the
/// `KSDATAFORMAT_SUBTYPE_*` family resolves to tag 0.
pub fn decode_format(bytes: &[u8]) -> Result<WaveFormat, AudioError> {
    if bytes.len() < PCM_FORMAT_SIZE {
        return Err(AudioError::InvalidWaveData(format!("fmt chunk too small ({} bytes)", bytes.len())));
    }

    let mut format = WaveFormat {
        format_tag: read_u16(bytes, 0),
        channels: read_u16(bytes, 2),
        samples_per_sec: read_u32(bytes, 4),
        avg_bytes_per_sec: read_u32(bytes, 8),
        block_align: read_u16(bytes, 12),
        bits_per_sample: read_u16(bytes, 14),
        extensible: None,
    };

    if format.format_tag == WAVE_FORMAT_EXTENSIBLE {
        let cb_size = if bytes.len() >= WAVEFORMATEX_SIZE {
            read_u16(bytes, 16)
        } else {
            0
        };
        if cb_size < EXTENSIBLE_CB_SIZE || bytes.len() < WAVEFORMATEX_SIZE + EXTENSIBLE_CB_SIZE as usize {
            return Err(AudioError::InvalidWaveData("truncated WAVEFORMATEXTENSIBLE".into()));
        }
        let guid = &bytes[24..40];
        let sub_format = if guid[4..] == SUBTYPE_GUID_TAIL {
            read_u32(guid, 0) as u16
        } else {
            0
        };
        format.extensible = Some(ExtensibleFormat {
            valid_bits_per_sample: read_u16(bytes, 18),
            channel_mask: read_u32(bytes, 20),
            sub_format,
        });
    }
    Ok(format)
}

/// Build a complete header for `data_size` bytes of samples.
pub fn generate_wav_header(format: &WaveFormat, data_size: u32) -> Vec<u8> {
    let fmt = encode_format(format);
    let riff_size = 4 + (CHUNK_HEADER_SIZE + fmt.len()) as u32 + CHUNK_HEADER_SIZE as u32 + data_size;

    let mut header = Vec::with_capacity(header_size(format));
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&riff_size.to_le_bytes());
    header.extend_from_slice(b"WAVE");

    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
    header.extend_from_slice(&fmt);

    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_size.to_le_bytes());
    header
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}
