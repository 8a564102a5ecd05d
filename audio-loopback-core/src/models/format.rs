use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_ADPCM: u16 = 0x0002;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_WMAUDIO2: u16 = 0x0161;
pub const WAVE_FORMAT_WMAUDIO3: u16 = 0x0162;
pub const WAVE_FORMAT_XMA2: u16 = 0x0166;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Size in bytes of the extension that follows a `WAVEFORMATEX` for
/// `WAVE_FORMAT_EXTENSIBLE`.
pub const EXTENSIBLE_CB_SIZE: u16 = 22;

/// Extra fields carried by a `WAVE_FORMAT_EXTENSIBLE` format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensibleFormat {
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    /// First field of the sub-format GUID, i.e. the plain format tag.
    pub sub_format: u16,
}

/// Interleaved audio stream format, equivalent to `WAVEFORMATEX(TENSIBLE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extensible: Option<ExtensibleFormat>,
}

impl WaveFormat {
    pub fn pcm(samples_per_sec: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self::plain(WAVE_FORMAT_PCM, samples_per_sec, channels, bits_per_sample)
    }

    pub fn ieee_float(samples_per_sec: u32, channels: u16) -> Self {
        Self::plain(WAVE_FORMAT_IEEE_FLOAT, samples_per_sec, channels, 32)
    }

    /// 32-bit float wrapped in `WAVE_FORMAT_EXTENSIBLE`, the usual shared-mode mix format.
    pub fn extensible_float(samples_per_sec: u32, channels: u16) -> Self {
        let mut format = Self::ieee_float(samples_per_sec, channels);
        format.format_tag = WAVE_FORMAT_EXTENSIBLE;
        format.extensible = Some(ExtensibleFormat {
            valid_bits_per_sample: 32,
            channel_mask: default_channel_mask(channels),
            sub_format: WAVE_FORMAT_IEEE_FLOAT,
        });
        format
    }

    fn plain(format_tag: u16, samples_per_sec: u32, channels: u16, bits_per_sample: u16) -> Self {
        let block_align = channels * bits_per_sample / 8;
        Self {
            format_tag,
            channels,
            samples_per_sec,
            avg_bytes_per_sec: samples_per_sec * block_align as u32,
            block_align,
            bits_per_sample,
            extensible: None,
        }
    }

    /// The effective format tag, resolving `WAVE_FORMAT_EXTENSIBLE` to its sub-format.
    pub fn tag(&self) -> u16 {
        match self.extensible {
            Some(ext) if self.format_tag == WAVE_FORMAT_EXTENSIBLE => ext.sub_format,
            _ => self.format_tag,
        }
    }

    pub fn is_float(&self) -> bool {
        self.tag() == WAVE_FORMAT_IEEE_FLOAT
    }

    pub fn is_pcm(&self) -> bool {
        self.tag() == WAVE_FORMAT_PCM
    }

    /// Bytes of one interleaved frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.block_align as usize
    }

    /// Bytes of a single channel sample.
    pub fn sample_bytes(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Size of the extension bytes following the base `WAVEFORMATEX`.
    pub fn cb_size(&self) -> u16 {
        if self.extensible.is_some() {
            EXTENSIBLE_CB_SIZE
        } else {
            0
        }
    }

    /// Same encoding with a different channel count; derived fields are recomputed.
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self.block_align = channels * self.bits_per_sample / 8;
        self.avg_bytes_per_sec = self.samples_per_sec * self.block_align as u32;
        if let Some(ext) = self.extensible.as_mut() {
            ext.channel_mask = default_channel_mask(channels);
        }
        self
    }

    /// Number of whole frames held in `bytes`.
    pub fn frames_in(&self, bytes: usize) -> usize {
        match self.frame_bytes() {
            0 => 0,
            frame => bytes / frame,
        }
    }

    /// Playback time of `frames` frames at this rate.
    pub fn duration_of_frames(&self, frames: u64) -> Duration {
        if self.samples_per_sec == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / self.samples_per_sec as f64)
    }

    /// Frames in one device period, rounded to nearest.
    pub fn frames_per_period(&self, period: Duration) -> u32 {
        (self.samples_per_sec as f64 * period.as_secs_f64() + 0.5) as u32
    }
}

/// Speaker mask used when a channel count is forced onto an extensible format.
pub fn default_channel_mask(channels: u16) -> u32 {
    match channels {
        0 => 0,
        1 => 0x4,
        2 => 0x3,
        n if n >= 32 => u32::MAX,
        n => (1u32 << n) - 1,
    }
}
