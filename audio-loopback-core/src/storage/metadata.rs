use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::AudioError;
use crate::models::recording_result::RecordingMetadata;

/// Path of the JSON sidecar for `recording_path`.
pub fn metadata_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("metadata.json")
}

/// Write recording metadata as a JSON sidecar file.
///
/// Creates `{recording}.metadata.json` alongside the recording.
pub fn write_metadata(metadata: &RecordingMetadata, recording_path: &Path) -> Result<PathBuf, AudioError> {
    let path = metadata_path(recording_path);
    let json = serde_json::to_string_pretty(metadata).map_err(|e| AudioError::storage("failed to serialize metadata", e))?;
    fs::write(&path, json).map_err(|e| AudioError::storage("failed to write metadata", e))?;
    Ok(path)
}

/// Read recording metadata from a JSON sidecar file.
pub fn read_metadata(recording_path: &Path) -> Result<RecordingMetadata, AudioError> {
    let json = fs::read_to_string(metadata_path(recording_path))
        .map_err(|e| AudioError::storage("failed to read metadata", e))?;
    serde_json::from_str(&json).map_err(|e| AudioError::storage("failed to parse metadata", e))
}
