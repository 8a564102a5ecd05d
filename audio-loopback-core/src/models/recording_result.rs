use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::format::WaveFormat;

/// Result produced when a capture session closes its recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration: Duration,
    pub data_bytes: u64,
    pub format: WaveFormat,
    pub checksum: String,
    pub metadata: RecordingMetadata,
}

/// Metadata stored alongside a recording.
///
/// Serializable for the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_secs: f64,
    pub file_path: String,
    pub checksum: String,
    pub created_at: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub format_tag: u16,
    pub data_bytes: u64,
    pub loopback: bool,
}

impl RecordingResult {
    pub fn new(file_path: PathBuf, format: WaveFormat, data_bytes: u64, checksum: String, loopback: bool) -> Self {
        let frames = format.frames_in(data_bytes as usize) as u64;
        let duration = format.duration_of_frames(frames);
        let metadata = RecordingMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            duration_secs: duration.as_secs_f64(),
            file_path: file_path.display().to_string(),
            checksum: checksum.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            sample_rate: format.samples_per_sec,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
            format_tag: format.tag(),
            data_bytes,
            loopback,
        };
        Self {
            file_path,
            duration,
            data_bytes,
            format,
            checksum,
            metadata,
        }
    }
}
