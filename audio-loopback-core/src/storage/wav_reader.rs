use std::fs;
use std::ops::Range;
use std::path::Path;

use crate::models::error::AudioError;
use crate::models::format::{
    WaveFormat, WAVE_FORMAT_ADPCM, WAVE_FORMAT_IEEE_FLOAT, WAVE_FORMAT_PCM, WAVE_FORMAT_WMAUDIO2, WAVE_FORMAT_WMAUDIO3,
    WAVE_FORMAT_XMA2,
};

use super::wav_header::{decode_format, read_u16, read_u32, CHUNK_HEADER_SIZE};

/// `smpl` chunk: fixed fields before the loop table.
const SAMPLER_HEADER_SIZE: usize = 36;
const SAMPLER_LOOP_SIZE: usize = 24;
/// `wsmp` chunk loop record.
const DLS_LOOP_SIZE: usize = 16;
const LOOP_TYPE_FORWARD: u32 = 0;

/// A wave file loaded into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    pub format: WaveFormat,
    bytes: Vec<u8>,
    audio: Range<usize>,
    /// First looped sample, 0 when the file has no loop.
    pub loop_start: u32,
    /// Looped sample count, 0 when the file has no loop.
    pub loop_length: u32,
    /// xWMA (`dpds`) or XMA2 (`seek`) packet table, in host byte order.
    pub seek: Vec<u32>,
    /// ADPCM `wSamplesPerBlock`.
    pub samples_per_block: Option<u16>,
    /// XMA2 `SamplesEncoded`.
    pub samples_encoded: Option<u32>,
}

impl WavData {
    pub fn from_file(path: &Path) -> Result<Self, AudioError> {
        let bytes = fs::read(path).map_err(|e| AudioError::storage(&format!("failed to read {}", path.display()), e))?;
        Self::parse(bytes)
    }

    /// Parse a RIFF `WAVE` (or `XWMA`) image.
    pub fn parse(bytes: Vec<u8>) -> Result<Self, AudioError> {
        if bytes.len() < 12 || &bytes[0..4] != b"RIFF" {
            return Err(AudioError::InvalidWaveData("missing RIFF header".into()));
        }
        let form = &bytes[8..12];
        let is_xwma = form == b"XWMA";
        if form != b"WAVE" && !is_xwma {
            return Err(AudioError::InvalidWaveData("RIFF form type is not WAVE".into()));
        }

        let riff_end = (CHUNK_HEADER_SIZE + read_u32(&bytes, 4) as usize).min(bytes.len());
        let mut format = None;
        let mut audio = None;
        let mut loop_start = 0;
        let mut loop_length = 0;
        let mut seek = Vec::new();
        let mut samples_per_block = None;
        let mut samples_encoded = None;

        let mut pos = 12;
        while pos + CHUNK_HEADER_SIZE <= riff_end {
            let id = &bytes[pos..pos + 4];
            let size = read_u32(&bytes, pos + 4) as usize;
            let start = pos + CHUNK_HEADER_SIZE;
            let end = start
                .checked_add(size)
                .filter(|&end| end <= riff_end)
                .ok_or_else(|| {
                    AudioError::InvalidWaveData(format!("chunk `{}` overruns the file", String::from_utf8_lossy(id)))
                })?;
            let body = &bytes[start..end];

            match id {
                b"fmt " => {
                    let fmt = decode_format(body)?;
                    match fmt.tag() {
                        WAVE_FORMAT_ADPCM if body.len() >= 20 => samples_per_block = Some(read_u16(body, 18)),
                        WAVE_FORMAT_XMA2 if body.len() >= 28 => samples_encoded = Some(read_u32(body, 24)),
                        _ => {}
                    }
                    format = Some(fmt);
                }
                b"data" => audio = Some(start..end),
                b"smpl" if body.len() >= SAMPLER_HEADER_SIZE + SAMPLER_LOOP_SIZE => {
                    let loops = read_u32(body, 28);
                    let first = &body[SAMPLER_HEADER_SIZE..];
                    if loops > 0 && read_u32(first, 4) == LOOP_TYPE_FORWARD {
                        let loop_begin = read_u32(first, 8);
                        let loop_end = read_u32(first, 12);
                        loop_start = loop_begin;
                        // The sampler loop end is inclusive.
                        loop_length = loop_end
                            .saturating_sub(loop_begin)
                            .checked_add(1)
                            .ok_or_else(|| {
                                AudioError::InvalidWaveData(format!(
                                    "sampler loop {}..={} is longer than the format allows",
                                    loop_begin, loop_end
                                ))
                            })?;
                    }
                }
                b"wsmp" if body.len() >= 20 => {
                    let header = read_u32(body, 0) as usize;
                    let loops = read_u32(body, 16);
                    if loops > 0 && body.len() >= header + DLS_LOOP_SIZE {
                        let first = &body[header..];
                        if read_u32(first, 4) == LOOP_TYPE_FORWARD {
                            loop_start = read_u32(first, 8);
                            loop_length = read_u32(first, 12);
                        }
                    }
                }
                b"dpds" => seek = body.chunks_exact(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect(),
                b"seek" => seek = body.chunks_exact(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]])).collect(),
                _ => {}
            }

            pos = end + (size & 1);
        }

        let format = format.ok_or_else(|| AudioError::InvalidWaveData("missing fmt chunk".into()))?;
        let audio = audio.ok_or_else(|| AudioError::InvalidWaveData("missing data chunk".into()))?;

        let data = Self {
            format,
            bytes,
            audio,
            loop_start,
            loop_length,
            seek,
            samples_per_block,
            samples_encoded,
        };
        data.validate(is_xwma)?;
        Ok(data)
    }

    fn validate(&self, is_xwma: bool) -> Result<(), AudioError> {
        let format = &self.format;
        if format.channels == 0 || format.samples_per_sec == 0 || format.block_align == 0 {
            return Err(AudioError::InvalidWaveData("format has zero channels, rate or alignment".into()));
        }

        match format.tag() {
            WAVE_FORMAT_PCM | WAVE_FORMAT_IEEE_FLOAT => {
                let valid_bits = if format.tag() == WAVE_FORMAT_PCM {
                    matches!(format.bits_per_sample, 8 | 16 | 24 | 32)
                } else {
                    matches!(format.bits_per_sample, 32 | 64)
                };
                if !valid_bits {
                    return Err(AudioError::UnsupportedFormat(format!(
                        "{} bits per sample",
                        format.bits_per_sample
                    )));
                }
                if format.block_align as usize != format.channels as usize * format.sample_bytes() {
                    return Err(AudioError::InvalidWaveData("block alignment does not match channels".into()));
                }
            }
            WAVE_FORMAT_ADPCM => {
                if self.samples_per_block.unwrap_or(0) == 0 {
                    return Err(AudioError::InvalidWaveData("ADPCM format without samples per block".into()));
                }
            }
            WAVE_FORMAT_WMAUDIO2 | WAVE_FORMAT_WMAUDIO3 => {
                if !is_xwma || self.seek.is_empty() {
                    return Err(AudioError::InvalidWaveData("xWMA data requires an XWMA form and dpds table".into()));
                }
            }
            WAVE_FORMAT_XMA2 => {
                if self.samples_encoded.is_none() {
                    return Err(AudioError::InvalidWaveData("truncated XMA2 format".into()));
                }
            }
            tag => {
                return Err(AudioError::UnsupportedFormat(format!("format tag 0x{:04X}", tag)));
            }
        }
        Ok(())
    }

    /// The raw contents of the `data` chunk.
    pub fn audio(&self) -> &[u8] {
        &self.bytes[self.audio.clone()]
    }

    pub fn audio_bytes(&self) -> u32 {
        self.audio.len() as u32
    }

    /// Length of the audio in samples per channel.
    pub fn sample_duration(&self) -> u64 {
        let format = &self.format;
        let channels = format.channels as u64;
        if channels == 0 {
            return 0;
        }
        let audio_bytes = self.audio_bytes() as u64;

        match format.tag() {
            WAVE_FORMAT_ADPCM => {
                let block_align = format.block_align as u64;
                let per_block = self.samples_per_block.unwrap_or(0) as u64;
                let mut duration = audio_bytes / block_align * per_block;
                let partial = audio_bytes % block_align;
                if partial > 0 && partial >= 7 * channels {
                    duration += partial * 2 / channels - 12;
                }
                duration
            }
            WAVE_FORMAT_WMAUDIO2 | WAVE_FORMAT_WMAUDIO3 => {
                self.seek.last().map_or(0, |&last| last as u64 / (2 * channels))
            }
            WAVE_FORMAT_XMA2 => self.samples_encoded.unwrap_or(0) as u64,
            _ if format.bits_per_sample > 0 => audio_bytes * 8 / (format.bits_per_sample as u64 * channels),
            _ => 0,
        }
    }

    pub fn sample_duration_ms(&self) -> u64 {
        if self.format.samples_per_sec == 0 {
            return 0;
        }
        self.sample_duration() * 1000 / self.format.samples_per_sec as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wav_header::{encode_format, generate_wav_header};

    fn riff(form: &[u8; 4], chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut body = form.to_vec();
        for (id, data) in chunks {
            body.extend_from_slice(*id);
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
            if data.len() % 2 == 1 {
                body.push(0);
            }
        }
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend(body);
        out
    }

    fn raw_format(tag: u16, channels: u16, rate: u32, block_align: u16, bits: u16, extra: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(extra);
        out
    }

    #[test]
    fn parses_header_generated_by_writer() {
        let format = WaveFormat::pcm(44100, 2, 16);
        let mut bytes = generate_wav_header(&format, 8);
        bytes.extend_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0]);

        let wav = WavData::parse(bytes).unwrap();
        assert_eq!(wav.format, format);
        assert_eq!(wav.audio(), &[1, 0, 2, 0, 3, 0, 4, 0]);
        assert_eq!(wav.sample_duration(), 2);
    }

    #[test]
    fn pcm_duration_in_milliseconds() {
        let format = WaveFormat::pcm(8000, 1, 16);
        let bytes = riff(b"WAVE", &[(b"fmt ", encode_format(&format)), (b"data", vec![0; 16000])]);
        let wav = WavData::parse(bytes).unwrap();
        assert_eq!(wav.sample_duration(), 8000);
        assert_eq!(wav.sample_duration_ms(), 1000);
    }

    #[test]
    fn skips_unknown_and_odd_sized_chunks() {
        let format = WaveFormat::ieee_float(48000, 1);
        let bytes = riff(
            b"WAVE",
            &[
                (b"LIST", vec![7; 5]),
                (b"fmt ", encode_format(&format)),
                (b"data", 0.5f32.to_le_bytes().to_vec()),
            ],
        );
        let wav = WavData::parse(bytes).unwrap();
        assert_eq!(wav.audio_bytes(), 4);
        assert!(wav.format.is_float());
    }

    #[test]
    fn reads_sampler_loop() {
        let format = WaveFormat::pcm(22050, 1, 8);
        let mut smpl = vec![0u8; SAMPLER_HEADER_SIZE + SAMPLER_LOOP_SIZE];
        smpl[28..32].copy_from_slice(&1u32.to_le_bytes());
        smpl[44..48].copy_from_slice(&100u32.to_le_bytes());
        smpl[48..52].copy_from_slice(&199u32.to_le_bytes());
        let bytes = riff(
            b"WAVE",
            &[(b"fmt ", encode_format(&format)), (b"smpl", smpl), (b"data", vec![128; 400])],
        );

        let wav = WavData::parse(bytes).unwrap();
        assert_eq!(wav.loop_start, 100);
        assert_eq!(wav.loop_length, 100);
    }

    #[test]
    fn rejects_unbounded_sampler_loop() {
        let format = WaveFormat::pcm(22050, 1, 8);
        let mut smpl = vec![0u8; SAMPLER_HEADER_SIZE + SAMPLER_LOOP_SIZE];
        smpl[28..32].copy_from_slice(&1u32.to_le_bytes());
        smpl[48..52].copy_from_slice(&u32::MAX.to_le_bytes());
        let bytes = riff(
            b"WAVE",
            &[(b"fmt ", encode_format(&format)), (b"smpl", smpl), (b"data", vec![128; 400])],
        );

        assert!(matches!(WavData::parse(bytes), Err(AudioError::InvalidWaveData(_))));
    }

    #[test]
    fn resolves_extensible_pcm() {
        let format = WaveFormat {
            format_tag: crate::models::format::WAVE_FORMAT_EXTENSIBLE,
            extensible: Some(crate::models::format::ExtensibleFormat {
                valid_bits_per_sample: 24,
                channel_mask: 0x3,
                sub_format: WAVE_FORMAT_PCM,
            }),
            ..WaveFormat::pcm(48000, 2, 24)
        };
        let bytes = riff(b"WAVE", &[(b"fmt ", encode_format(&format)), (b"data", vec![0; 60])]);
        let wav = WavData::parse(bytes).unwrap();
        assert!(wav.format.is_pcm());
        assert_eq!(wav.sample_duration(), 10);
    }

    #[test]
    fn adpcm_duration_counts_partial_block() {
        // mono, 256-byte blocks of 500 samples
        let mut extra = 500u16.to_le_bytes().to_vec();
        extra.extend_from_slice(&[0; 30]);
        let fmt = raw_format(WAVE_FORMAT_ADPCM, 1, 22050, 256, 4, &extra);
        let bytes = riff(b"WAVE", &[(b"fmt ", fmt), (b"data", vec![0; 256 * 3 + 100])]);

        let wav = WavData::parse(bytes).unwrap();
        assert_eq!(wav.samples_per_block, Some(500));
        assert_eq!(wav.sample_duration(), 3 * 500 + (100 * 2 - 12));
    }

    #[test]
    fn xwma_duration_from_packet_table() {
        let fmt = raw_format(WAVE_FORMAT_WMAUDIO2, 2, 44100, 2230, 16, &[]);
        let dpds: Vec<u8> = [4096u32, 8192].iter().flat_map(|v| v.to_le_bytes()).collect();
        let bytes = riff(b"XWMA", &[(b"fmt ", fmt), (b"dpds", dpds), (b"data", vec![0; 4460])]);

        let wav = WavData::parse(bytes).unwrap();
        assert_eq!(wav.seek, vec![4096, 8192]);
        assert_eq!(wav.sample_duration(), 2048);
    }

    #[test]
    fn xma2_uses_samples_encoded_and_big_endian_seek() {
        let mut extra = vec![0u8; 34];
        extra[0..2].copy_from_slice(&1u16.to_le_bytes());
        extra[6..10].copy_from_slice(&12345u32.to_le_bytes());
        let fmt = raw_format(WAVE_FORMAT_XMA2, 2, 48000, 4, 16, &extra);
        let seek: Vec<u8> = [2048u32, 12345].iter().flat_map(|v| v.to_be_bytes()).collect();
        let bytes = riff(b"WAVE", &[(b"fmt ", fmt), (b"seek", seek), (b"data", vec![0; 2048])]);

        let wav = WavData::parse(bytes).unwrap();
        assert_eq!(wav.sample_duration(), 12345);
        assert_eq!(wav.seek, vec![2048, 12345]);
    }

    #[test]
    fn rejects_malformed_files() {
        assert!(matches!(WavData::parse(b"RIFX0000WAVE".to_vec()), Err(AudioError::InvalidWaveData(_))));

        let format = WaveFormat::pcm(8000, 1, 16);
        let no_data = riff(b"WAVE", &[(b"fmt ", encode_format(&format))]);
        assert!(matches!(WavData::parse(no_data), Err(AudioError::InvalidWaveData(_))));

        let mut overrun = riff(b"WAVE", &[(b"fmt ", encode_format(&format)), (b"data", vec![0; 8])]);
        let len = overrun.len();
        overrun[len - 12..len - 8].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(WavData::parse(overrun), Err(AudioError::InvalidWaveData(_))));
    }

    #[test]
    fn rejects_inconsistent_pcm() {
        let fmt = raw_format(WAVE_FORMAT_PCM, 2, 8000, 3, 16, &[]);
        let bytes = riff(b"WAVE", &[(b"fmt ", fmt), (b"data", vec![0; 12])]);
        assert!(matches!(WavData::parse(bytes), Err(AudioError::InvalidWaveData(_))));
    }
}
