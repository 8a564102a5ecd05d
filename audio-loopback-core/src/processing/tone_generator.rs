use std::f64::consts::PI;
use std::time::Duration;

use crate::models::error::AudioError;
use crate::models::format::WaveFormat;

use super::sample_codec::SampleWriter;
use super::sample_queue::{RenderBuffer, SampleQueue, SampleSource};

/// Pre-renders a sine tone, identical on every channel, into device-period chunks.
#[derive(Debug, Default)]
pub struct ToneSampleGenerator {
    queue: SampleQueue,
}

impl ToneSampleGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_sample_buffer(
        &mut self,
        frequency: u32,
        frames_per_period: u32,
        device: &WaveFormat,
        duration: Duration,
        amplitude: f64,
    ) -> Result<(), AudioError> {
        if frames_per_period == 0 {
            return Err(AudioError::InvalidArgument("frames per period must be positive".into()));
        }
        if device.samples_per_sec == 0 {
            return Err(AudioError::UnsupportedFormat("device sample rate is zero".into()));
        }

        let total_frames = (device.samples_per_sec as u128 * duration.as_nanos() / 1_000_000_000) as usize;
        let increment = 2.0 * PI * frequency as f64 / device.samples_per_sec as f64;
        let chunk_bytes = frames_per_period as usize * device.frame_bytes();
        let channels = device.channels as usize;

        self.queue.flush();
        let mut theta = 0.0f64;
        let mut remaining = total_frames;
        let mut frame = vec![0.0f32; channels];
        while remaining > 0 {
            let frames = remaining.min(frames_per_period as usize);
            let mut data = vec![0u8; chunk_bytes];
            let mut writer = SampleWriter::new(&mut data, device)?;
            for _ in 0..frames {
                frame.fill((theta.sin() * amplitude) as f32);
                writer.write_frame(&frame);
                theta += increment;
                if theta >= 2.0 * PI {
                    theta -= 2.0 * PI;
                }
            }
            let filled = writer.position();
            self.queue.push(RenderBuffer::new(data, filled));
            remaining -= frames;
        }
        log::info!("queued {} Hz tone, {} frames in {} buffers", frequency, total_frames, self.queue.len());
        Ok(())
    }

    pub fn queued_bytes(&self) -> usize {
        self.queue.queued_bytes()
    }
}

impl SampleSource for ToneSampleGenerator {
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

    #[test]
    fn tone_length_matches_duration() {
        let device = WaveFormat::ieee_float(48000, 2);
        let mut tone = ToneSampleGenerator::new();
        tone.generate_sample_buffer(440, 480, &device, Duration::from_millis(105), 0.5)
            .unwrap();
        // 5040 frames = 10 full periods + 240
        assert_eq!(tone.queued_bytes(), 5040 * 8);
        assert_eq!(tone.buffer_length(), 480 * 8);
    }

    #[test]
    fn all_channels_carry_the_same_sine() {
        let device = WaveFormat::ieee_float(8000, 2);
        let mut tone = ToneSampleGenerator::new();
        tone.generate_sample_buffer(1000, 8, &device, Duration::from_millis(1), 0.5)
            .unwrap();

        let mut out = vec![0u8; tone.buffer_length()];
        tone.fill_sample_buffer(&mut out).unwrap();
        let samples: Vec<f32> = out
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        for (i, frame) in samples.chunks_exact(2).enumerate() {
            let expected = ((2.0 * PI * 1000.0 * i as f64 / 8000.0).sin() * 0.5) as f32;
            assert_relative_eq!(frame[0], expected, epsilon = 1e-5);
            assert_eq!(frame[0], frame[1]);
            assert!(frame[0].abs() <= 0.5);
        }
    }

    #[test]
    fn pcm16_tone() {
        let device = WaveFormat::pcm(8000, 1, 16);
        let mut tone = ToneSampleGenerator::new();
        tone.generate_sample_buffer(2000, 4, &device, Duration::from_millis(1), 1.0)
            .unwrap();

        let mut out = vec![0u8; tone.buffer_length()];
        tone.fill_sample_buffer(&mut out).unwrap();
        // quarter-rate tone: 0, +max, 0, -max
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), i16::MAX);
    }
}
