use crate::models::error::AudioError;
use crate::models::format::WaveFormat;
use crate::storage::wav_reader::WavData;

use super::sample_codec::{SampleReader, SampleWriter};
use super::sample_queue::{RenderBuffer, SampleQueue, SampleSource};

/// Channels carried from a source frame into the device frame.
pub const MAX_CHANNELS: usize = 8;

/// Pre-renders an in-memory wave into device-format chunks.
///
/// The source is upsampled by the integer ratio `device_rate / source_rate`
/// (each frame repeated) and split into chunks of one device period. The
/// last chunk holds whatever remains, so the queue carries exactly
/// `source_frames * ratio` frames.
#[derive(Debug, Default)]
pub struct WaveSampleGenerator {
    queue: SampleQueue,
}

impl WaveSampleGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue with `wave` rendered for `device`.
    pub fn generate_sample_buffer(
        &mut self,
        wave: &[u8],
        source: &WaveFormat,
        frames_per_period: u32,
        device: &WaveFormat,
    ) -> Result<(), AudioError> {
        if frames_per_period == 0 {
            return Err(AudioError::InvalidArgument("frames per period must be positive".into()));
        }
        if source.samples_per_sec == 0 {
            return Err(AudioError::UnsupportedFormat("source sample rate is zero".into()));
        }
        let ratio = (device.samples_per_sec / source.samples_per_sec) as usize;
        if ratio == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "device rate {} is below source rate {}",
                device.samples_per_sec, source.samples_per_sec
            )));
        }
        if device.samples_per_sec % source.samples_per_sec != 0 {
            log::warn!(
                "resample ratio {}/{} is not integral, repeating each frame {} times",
                device.samples_per_sec,
                source.samples_per_sec,
                ratio
            );
        }

        let mut reader = SampleReader::new(wave, source)?;
        let total_frames = reader.frames_remaining() * ratio;
        let mut rendered = vec![0u8; total_frames * device.frame_bytes()];
        {
            let mut writer = SampleWriter::new(&mut rendered, device)?;
            let mut frame = [0.0f32; MAX_CHANNELS];
            while !reader.is_eof() {
                reader.read_frame(&mut frame);
                for _ in 0..ratio {
                    writer.write_frame(&frame);
                }
            }
        }

        self.queue.flush();
        let chunk_bytes = frames_per_period as usize * device.frame_bytes();
        for chunk in rendered.chunks(chunk_bytes) {
            self.queue.push(RenderBuffer::new(chunk.to_vec(), chunk.len()));
        }
        log::info!(
            "queued {} frames in {} buffers ({} Hz -> {} Hz)",
            total_frames,
            self.queue.len(),
            source.samples_per_sec,
            device.samples_per_sec
        );
        Ok(())
    }

    /// Convenience wrapper over [`generate_sample_buffer`](Self::generate_sample_buffer) for a parsed file.
    pub fn from_wav(wav: &WavData, frames_per_period: u32, device: &WaveFormat) -> Result<Self, AudioError> {
        let mut generator = Self::new();
        generator.generate_sample_buffer(wav.audio(), &wav.format, frames_per_period, device)?;
        Ok(generator)
    }

    /// Number of chunks still queued.
    pub fn buffer_count(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queue.queued_bytes()
    }
}

impl SampleSource for WaveSampleGenerator {
    fn buffer_length(&self) -> usize {
        self.queue.buffer_length()
    }

    fn fill_sample_buffer(&mut self, out: &mut [u8]) -> Result<usize, AudioError> {
        self.queue.fill_sample_buffer(out)
    }

    fn is_eof(&self) -> bool {
        self.queue.is_empty()
    }

    fn flush(&mut self) {
        self.queue.flush();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn pcm16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn upsamples_by_repeating_frames() {
        let source = WaveFormat::pcm(22050, 1, 16);
        let device = WaveFormat::ieee_float(44100, 2);
        let mut generator = WaveSampleGenerator::new();
        generator
            .generate_sample_buffer(&pcm16(&[16384, -16384]), &source, 64, &device)
            .unwrap();

        let len = generator.buffer_length();
        assert_eq!(len, 4 * 8);
        let mut out = vec![0u8; len];
        generator.fill_sample_buffer(&mut out).unwrap();

        let samples = floats(&out);
        let expected = [0.5, 0.0, 0.5, 0.0, -0.5, 0.0, -0.5, 0.0];
        for (got, want) in samples.iter().zip(expected) {
            assert_relative_eq!(*got, want);
        }
        assert!(generator.is_eof());
    }

    #[test]
    fn total_frames_equal_source_frames_times_ratio() {
        let source = WaveFormat::pcm(16000, 2, 16);
        let wave = pcm16(&vec![100; 2 * 1000]);

        for (device_rate, ratio) in [(16000, 1), (32000, 2), (48000, 3)] {
            let device = WaveFormat::ieee_float(device_rate, 2);
            let mut generator = WaveSampleGenerator::new();
            generator.generate_sample_buffer(&wave, &source, 441, &device).unwrap();

            let frames = generator.queued_bytes() / device.frame_bytes();
            assert_eq!(frames, 1000 * ratio, "device rate {}", device_rate);

            // every chunk but the last holds a full period
            let full_chunks = (1000 * ratio) / 441;
            let mut drained = 0;
            let mut chunks = 0;
            while !generator.is_eof() {
                let len = generator.buffer_length();
                if chunks < full_chunks {
                    assert_eq!(len, 441 * device.frame_bytes());
                }
                let mut out = vec![0u8; len];
                drained += generator.fill_sample_buffer(&mut out).unwrap();
                chunks += 1;
            }
            assert_eq!(drained / device.frame_bytes(), 1000 * ratio);
        }
    }

    #[test]
    fn narrows_to_device_channels() {
        let source = WaveFormat::ieee_float(48000, 4);
        let device = WaveFormat::pcm(48000, 2, 16);
        let wave: Vec<u8> = [0.5f32, -0.5, 0.25, 0.25].iter().flat_map(|s| s.to_le_bytes()).collect();

        let mut generator = WaveSampleGenerator::new();
        generator.generate_sample_buffer(&wave, &source, 16, &device).unwrap();
        let mut out = vec![0u8; generator.buffer_length()];
        generator.fill_sample_buffer(&mut out).unwrap();

        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 16383);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), -16383);
    }

    #[test]
    fn rejects_downsampling_and_empty_period() {
        let source = WaveFormat::pcm(48000, 1, 16);
        let device = WaveFormat::ieee_float(44100, 2);
        let mut generator = WaveSampleGenerator::new();

        assert!(matches!(
            generator.generate_sample_buffer(&pcm16(&[0; 4]), &source, 64, &device),
            Err(AudioError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            generator.generate_sample_buffer(&pcm16(&[0; 4]), &source, 0, &WaveFormat::ieee_float(48000, 2)),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn flush_discards_queue() {
        let source = WaveFormat::pcm(48000, 1, 16);
        let device = WaveFormat::ieee_float(48000, 2);
        let mut generator = WaveSampleGenerator::new();
        generator.generate_sample_buffer(&pcm16(&[1; 256]), &source, 32, &device).unwrap();
        assert_eq!(generator.buffer_count(), 8);

        generator.flush();
        assert!(generator.is_eof());
        assert_eq!(generator.buffer_length(), 0);
    }
}
