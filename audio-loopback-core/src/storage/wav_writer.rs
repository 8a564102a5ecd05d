use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::AudioError;
use crate::models::format::WaveFormat;

use super::wav_header;

/// Streaming WAV file writer.
///
/// The header is written on open with zero sizes, samples are appended
/// as they arrive and [`commit`](Self::commit) rewrites the header in
/// place so the file is valid at any point.
///
/// ## File Format
/// ```text
/// [RIFF/WAVE header, fmt chunk sized for the format]
/// [raw interleaved samples...]
/// ```
pub struct WaveFileWriter {
    file_path: PathBuf,
    file: Option<File>,
    format: WaveFormat,
    data_bytes: u64,
}

impl WaveFileWriter {
    /// Create (or truncate) `path` and write the initial header.
    pub fn open(path: &Path, format: &WaveFormat) -> Result<Self, AudioError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AudioError::storage("failed to create directory", e))?;
        }
        let file = File::create(path).map_err(|e| AudioError::storage("failed to create file", e))?;

        let mut writer = Self {
            file_path: path.to_path_buf(),
            file: Some(file),
            format: *format,
            data_bytes: 0,
        };
        writer.commit()?;
        log::debug!("opened recording {}", path.display());
        Ok(writer)
    }

    /// Append raw sample bytes. Returns the number of bytes written.
    pub fn write_sample(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        let limit = u32::MAX as u64 - wav_header::header_size(&self.format) as u64;
        if self.data_bytes + data.len() as u64 > limit {
            return Err(AudioError::StorageError("recording exceeds the 4 GiB RIFF limit".into()));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AudioError::StorageError("file is not open".into()))?;
        file.write_all(data).map_err(|e| AudioError::storage("write failed", e))?;
        self.data_bytes += data.len() as u64;
        Ok(data.len())
    }

    /// Rewrite the header with the current sizes and return to the end of the file.
    pub fn commit(&mut self) -> Result<(), AudioError> {
        let header = wav_header::generate_wav_header(&self.format, self.data_bytes as u32);
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AudioError::StorageError("file is not open".into()))?;

        file.seek(SeekFrom::Start(0))
            .map_err(|e| AudioError::storage("seek failed", e))?;
        file.write_all(&header)
            .map_err(|e| AudioError::storage("header write failed", e))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| AudioError::storage("seek failed", e))?;
        file.flush().map_err(|e| AudioError::storage("flush failed", e))?;
        Ok(())
    }

    /// Commit, close the file and return its SHA-256 hex digest.
    pub fn close(&mut self) -> Result<String, AudioError> {
        if self.file.is_none() {
            return Err(AudioError::StorageError("file is not open".into()));
        }
        self.commit()?;
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| AudioError::storage("sync failed", e))?;
        }
        log::debug!("closed recording {} ({} data bytes)", self.file_path.display(), self.data_bytes);
        sha256_file(&self.file_path)
    }

    /// Sample bytes written so far (header excluded).
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    pub fn format(&self) -> &WaveFormat {
        &self.format
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for WaveFileWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.commit() {
                log::error!("failed to finalize {}: {}", self.file_path.display(), e);
            }
        }
    }
}

/// Compute SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, AudioError> {
    let data = fs::read(path).map_err(|e| AudioError::storage("failed to read file for checksum", e))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wav_reader::WavData;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("wav_writer_test_{}_{}.wav", std::process::id(), name))
    }

    #[test]
    fn written_file_reads_back() {
        let path = temp_path("round_trip");
        let format = WaveFormat::ieee_float(48000, 2);
        let samples: Vec<u8> = [0.1f32, -0.1, 0.2, -0.2].iter().flat_map(|s| s.to_le_bytes()).collect();

        let mut writer = WaveFileWriter::open(&path, &format).unwrap();
        assert_eq!(writer.write_sample(&samples).unwrap(), 16);
        writer.close().unwrap();

        let wav = WavData::from_file(&path).unwrap();
        assert_eq!(wav.format, format);
        assert_eq!(wav.audio(), samples.as_slice());
        assert_eq!(wav.sample_duration(), 2);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn commit_makes_sizes_visible_mid_stream() {
        let path = temp_path("commit");
        let format = WaveFormat::pcm(8000, 1, 16);

        let mut writer = WaveFileWriter::open(&path, &format).unwrap();
        writer.write_sample(&[0u8; 100]).unwrap();
        writer.commit().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 144);
        assert_eq!(wav_header::read_u32(&bytes, 40), 100);
        assert_eq!(wav_header::read_u32(&bytes, 4), 136);

        // appending after a commit continues at the end
        writer.write_sample(&[1u8; 10]).unwrap();
        writer.close().unwrap();
        let wav = WavData::from_file(&path).unwrap();
        assert_eq!(wav.audio_bytes(), 110);
        assert_eq!(&wav.audio()[100..], &[1u8; 10]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn checksum_matches_file_contents() {
        let path = temp_path("checksum");
        let mut writer = WaveFileWriter::open(&path, &WaveFormat::pcm(8000, 1, 16)).unwrap();
        writer.write_sample(&[5u8; 64]).unwrap();
        let checksum = writer.close().unwrap();

        let expected = hex_encode(&Sha256::digest(fs::read(&path).unwrap()));
        assert_eq!(checksum, expected);
        assert_eq!(checksum.len(), 64);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn write_after_close_fails() {
        let path = temp_path("closed");
        let mut writer = WaveFileWriter::open(&path, &WaveFormat::pcm(8000, 1, 16)).unwrap();
        writer.close().unwrap();

        assert!(!writer.is_open());
        assert!(matches!(writer.write_sample(&[0u8; 2]), Err(AudioError::StorageError(_))));
        assert!(writer.close().is_err());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn drop_finalizes_header() {
        let path = temp_path("drop");
        {
            let mut writer = WaveFileWriter::open(&path, &WaveFormat::pcm(8000, 2, 16)).unwrap();
            writer.write_sample(&[0u8; 40]).unwrap();
        }
        let wav = WavData::from_file(&path).unwrap();
        assert_eq!(wav.audio_bytes(), 40);

        let _ = fs::remove_file(&path);
    }
}
