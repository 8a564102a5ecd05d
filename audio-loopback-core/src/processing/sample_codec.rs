//! Conversion between interleaved device/file frames and normalized `f32` samples.

use crate::models::error::AudioError;
use crate::models::format::{WaveFormat, WAVE_FORMAT_IEEE_FLOAT, WAVE_FORMAT_PCM};

/// Per-sample encoding of an uncompressed format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Unsigned8,
    Signed16,
    Signed24,
    Signed32,
    Float32,
}

impl SampleEncoding {
    pub fn of(format: &WaveFormat) -> Result<Self, AudioError> {
        match (format.tag(), format.bits_per_sample) {
            (WAVE_FORMAT_PCM, 8) => Ok(Self::Unsigned8),
            (WAVE_FORMAT_PCM, 16) => Ok(Self::Signed16),
            (WAVE_FORMAT_PCM, 24) => Ok(Self::Signed24),
            (WAVE_FORMAT_PCM, 32) => Ok(Self::Signed32),
            (WAVE_FORMAT_IEEE_FLOAT, 32) => Ok(Self::Float32),
            (tag, bits) => Err(AudioError::UnsupportedFormat(format!(
                "format tag 0x{:04X} with {} bits per sample",
                tag, bits
            ))),
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::Unsigned8 => 1,
            Self::Signed16 => 2,
            Self::Signed24 => 3,
            Self::Signed32 | Self::Float32 => 4,
        }
    }

    fn decode(self, b: &[u8]) -> f32 {
        match self {
            Self::Unsigned8 => (b[0] as f32 - 128.0) / 128.0,
            Self::Signed16 => i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
            // Widen to 32 bits, replicating the top byte into the low byte.
            Self::Signed24 => i32::from_le_bytes([b[2], b[0], b[1], b[2]]) as f32 / 2_147_483_648.0,
            Self::Signed32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0,
            Self::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        }
    }

    fn encode(self, sample: f32, out: &mut [u8]) {
        let clamped = sample.clamp(-1.0, 1.0);
        match self {
            Self::Unsigned8 => out[0] = (clamped * 127.0 + 128.0) as u8,
            Self::Signed16 => out.copy_from_slice(&((clamped * i16::MAX as f32) as i16).to_le_bytes()),
            Self::Signed24 => {
                let value = (clamped as f64 * 8_388_607.0) as i32;
                out.copy_from_slice(&value.to_le_bytes()[..3]);
            }
            Self::Signed32 => {
                let value = (clamped as f64 * i32::MAX as f64) as i32;
                out.copy_from_slice(&value.to_le_bytes());
            }
            Self::Float32 => out.copy_from_slice(&sample.to_le_bytes()),
        }
    }
}

/// Reads whole frames from an interleaved byte stream as `f32`.
///
/// Past the end of the data every frame reads as silence.
pub struct SampleReader<'a> {
    data: &'a [u8],
    position: usize,
    channels: usize,
    encoding: SampleEncoding,
}

impl<'a> SampleReader<'a> {
    pub fn new(data: &'a [u8], format: &WaveFormat) -> Result<Self, AudioError> {
        let encoding = SampleEncoding::of(format)?;
        if format.channels == 0 {
            return Err(AudioError::UnsupportedFormat("zero channels".into()));
        }
        Ok(Self {
            data,
            position: 0,
            channels: format.channels as usize,
            encoding,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.channels * self.encoding.bytes()
    }

    pub fn frames_remaining(&self) -> usize {
        (self.data.len() - self.position) / self.frame_bytes()
    }

    pub fn is_eof(&self) -> bool {
        self.frames_remaining() == 0
    }

    /// Decode the next frame into `out`.
    ///
    /// Channels beyond `out.len()` are skipped and slots beyond the frame's
    /// channel count are zeroed. Returns the number of channels decoded.
    pub fn read_frame(&mut self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        if self.is_eof() {
            return 0;
        }

        let width = self.encoding.bytes();
        let frame = &self.data[self.position..self.position + self.frame_bytes()];
        let decoded = self.channels.min(out.len());
        for (slot, sample) in out.iter_mut().zip(frame.chunks_exact(width)).take(decoded) {
            *slot = self.encoding.decode(sample);
        }
        self.position += self.frame_bytes();
        decoded
    }
}

/// Writes `f32` frames into an interleaved byte buffer.
pub struct SampleWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
    channels: usize,
    encoding: SampleEncoding,
}

impl<'a> SampleWriter<'a> {
    pub fn new(buffer: &'a mut [u8], format: &WaveFormat) -> Result<Self, AudioError> {
        let encoding = SampleEncoding::of(format)?;
        if format.channels == 0 {
            return Err(AudioError::UnsupportedFormat("zero channels".into()));
        }
        Ok(Self {
            buffer,
            position: 0,
            channels: format.channels as usize,
            encoding,
        })
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() - self.position < self.channels * self.encoding.bytes()
    }

    /// Encode one frame; missing channels are written as silence.
    ///
    /// Returns `false` without writing when the buffer has no room left.
    pub fn write_frame(&mut self, frame: &[f32]) -> bool {
        if self.is_full() {
            return false;
        }
        let width = self.encoding.bytes();
        for channel in 0..self.channels {
            let sample = frame.get(channel).copied().unwrap_or(0.0);
            let start = self.position + channel * width;
            self.encoding.encode(sample, &mut self.buffer[start..start + width]);
        }
        self.position += self.channels * width;
        true
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn pcm16_decodes_to_unit_range() {
        let format = WaveFormat::pcm(44100, 2, 16);
        let data: Vec<u8> = [i16::MIN, i16::MAX, 0, 16384].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut reader = SampleReader::new(&data, &format).unwrap();

        let mut frame = [0.0f32; 2];
        assert_eq!(reader.read_frame(&mut frame), 2);
        assert_relative_eq!(frame[0], -1.0);
        assert_relative_eq!(frame[1], 32767.0 / 32768.0);

        reader.read_frame(&mut frame);
        assert_relative_eq!(frame[0], 0.0);
        assert_relative_eq!(frame[1], 0.5);
        assert!(reader.is_eof());
    }

    #[test]
    fn pcm24_replicates_top_byte() {
        let format = WaveFormat::pcm(48000, 1, 24);
        // 0x400000 = half scale
        let data = [0x00, 0x00, 0x40];
        let mut reader = SampleReader::new(&data, &format).unwrap();
        let mut frame = [0.0f32; 1];
        reader.read_frame(&mut frame);
        assert_relative_eq!(frame[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn reads_silence_after_eof() {
        let format = WaveFormat::ieee_float(48000, 1);
        let data = 0.75f32.to_le_bytes();
        let mut reader = SampleReader::new(&data, &format).unwrap();

        let mut frame = [0.0f32; 1];
        reader.read_frame(&mut frame);
        assert_relative_eq!(frame[0], 0.75);

        frame[0] = 9.0;
        assert_eq!(reader.read_frame(&mut frame), 0);
        assert_eq!(frame[0], 0.0);
    }

    #[test]
    fn writer_zero_fills_missing_channels() {
        let format = WaveFormat::ieee_float(48000, 3);
        let mut buf = vec![0xFFu8; 12];
        let mut writer = SampleWriter::new(&mut buf, &format).unwrap();
        assert!(writer.write_frame(&[0.25]));
        assert!(writer.is_full());
        assert!(!writer.write_frame(&[0.5]));

        let samples: Vec<f32> = buf.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect();
        assert_eq!(samples, vec![0.25, 0.0, 0.0]);
    }

    #[test]
    fn pcm_encodings_scale_by_max() {
        let mut buf = [0u8; 2];
        SampleWriter::new(&mut buf, &WaveFormat::pcm(8000, 1, 16)).unwrap().write_frame(&[1.0]);
        assert_eq!(i16::from_le_bytes(buf), i16::MAX);

        let mut buf = [0u8; 4];
        SampleWriter::new(&mut buf, &WaveFormat::pcm(8000, 1, 32)).unwrap().write_frame(&[-2.0]);
        assert_eq!(i32::from_le_bytes(buf), -i32::MAX);
    }

    #[test]
    fn rejects_compressed_formats() {
        let mut format = WaveFormat::pcm(44100, 2, 4);
        format.format_tag = crate::models::format::WAVE_FORMAT_ADPCM;
        assert!(matches!(SampleEncoding::of(&format), Err(AudioError::UnsupportedFormat(_))));
    }
}
