//! Decodes sound files into the interleaved PCM buffers `mixer-core` expects,
//! and validates asset paths before they reach the filesystem.
//!
//! Format dispatch is left entirely to `symphonia`'s own probe rather than
//! keyed off the file extension, so a mislabeled or misrouted `.flac` file
//! still lands on the FLAC reader instead of silently being fed to the WAV
//! decoder. See `SPEC_FULL.md` §6 and §9.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetIoError {
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unrecognized or unsupported audio format in {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("no playable audio track in {}", .0.display())]
    NoTrack(PathBuf),
    #[error("decode error in {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("asset path rejected: {0}")]
    InvalidPath(String),
}

/// PCM decoded from a sound file: interleaved samples plus the format info
/// `mixer_core::PcmAsset::from_interleaved` needs.
#[derive(Debug, Clone)]
pub struct DecodedPcm {
    pub frequency: u32,
    pub channels: u8,
    pub interleaved: Vec<f32>,
}

/// Rejects any path that is absolute or that escapes its base directory via
/// `..`, the same shape of check `tools/pkg-validator` applies to package
/// entries before they are written to disk.
pub fn validate_path(path: &Path) -> Result<(), AssetIoError> {
    if path.is_absolute() {
        return Err(AssetIoError::InvalidPath(format!("{} is an absolute path", path.display())));
    }
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(AssetIoError::InvalidPath(format!("{} escapes its base directory", path.display())));
    }
    Ok(())
}

/// Decodes a sound file into interleaved `f32` PCM. The container/codec is
/// determined by probing the file's contents, with the extension passed only
/// as a probe hint so a `.flac` file is never forced through the WAV reader.
pub fn decode_file(path: &Path) -> Result<DecodedPcm, AssetIoError> {
    let file = File::open(path).map_err(|source| AssetIoError::Io { path: path.to_path_buf(), source })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|_| AssetIoError::UnsupportedFormat(path.to_path_buf()))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| AssetIoError::NoTrack(path.to_path_buf()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AssetIoError::Decode { path: path.to_path_buf(), reason: e.to_string() })?;

    let mut frequency = 0u32;
    let mut channels = 0u8;
    let mut interleaved = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(_)) => break,
            Err(e) => return Err(AssetIoError::Decode { path: path.to_path_buf(), reason: e.to_string() }),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf: AudioBufferRef = match decoder.decode(&packet) {
            Ok(buf) => buf,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(AssetIoError::Decode { path: path.to_path_buf(), reason: e.to_string() }),
        };

        let spec = *audio_buf.spec();
        if frequency == 0 {
            frequency = spec.rate;
            channels = spec.channels.count() as u8;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    if frequency == 0 {
        return Err(AssetIoError::NoTrack(path.to_path_buf()));
    }

    Ok(DecodedPcm { frequency, channels, interleaved })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) {
        let mut file = File::create(path).unwrap();
        let data_len = (samples.len() * 2) as u32;
        let riff_len = 36 + data_len;
        file.write_all(b"RIFF").unwrap();
        file.write_all(&riff_len.to_le_bytes()).unwrap();
        file.write_all(b"WAVE").unwrap();
        file.write_all(b"fmt ").unwrap();
        file.write_all(&16u32.to_le_bytes()).unwrap();
        file.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
        file.write_all(&1u16.to_le_bytes()).unwrap(); // mono
        file.write_all(&sample_rate.to_le_bytes()).unwrap();
        let byte_rate = sample_rate * 2;
        file.write_all(&byte_rate.to_le_bytes()).unwrap();
        file.write_all(&2u16.to_le_bytes()).unwrap(); // block align
        file.write_all(&16u16.to_le_bytes()).unwrap(); // bits per sample
        file.write_all(b"data").unwrap();
        file.write_all(&data_len.to_le_bytes()).unwrap();
        for s in samples {
            file.write_all(&s.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn decodes_a_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..1000).map(|i| ((i % 100) * 100) as i16).collect();
        write_wav(&path, &samples, 44_100);

        let decoded = decode_file(&path).unwrap();
        assert_eq!(decoded.frequency, 44_100);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.interleaved.len(), samples.len());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = decode_file(Path::new("/nonexistent/path/does-not-exist.wav"));
        assert!(matches!(result, Err(AssetIoError::Io { .. })));
    }

    #[test]
    fn garbage_file_is_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"not actually a wav file").unwrap();
        let result = decode_file(&path);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(validate_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_path(Path::new("../secrets.wav")).is_err());
    }

    #[test]
    fn accepts_relative_paths_within_base() {
        assert!(validate_path(Path::new("sounds/explosion.wav")).is_ok());
    }
}
