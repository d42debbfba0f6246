//! Result persistence.
//!
//! Generated audio is written as 16-bit mono WAV under a `musicgen/`
//! subdirectory of the caller's output directory, with a timestamp-based
//! unique name. The absolute path of the written file is returned.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::info;

/// Subdirectory created under the caller's output directory.
pub const OUTPUT_SUBDIR: &str = "musicgen";

/// Errors while persisting generated audio.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Encode { path: PathBuf, source: hound::Error },

    #[error("failed to resolve output path {path}: {source}")]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Map a float sample in [-1, 1] to i16 with saturation.
fn to_i16(sample: f32) -> i16 {
    let v = (sample.clamp(-1.0, 1.0) * 32_768.0).round() as i32;
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Timestamp-based file name. A process-local sequence number keeps names
/// distinct when two requests land in the same millisecond.
fn unique_name() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("musicgen_{millis}_{seq}.wav")
}

/// Write `samples` at `sample_rate` under `<output_dir>/musicgen/` and
/// return the absolute path of the new file.
pub fn write_wav(
    samples: &[f32],
    sample_rate: u32,
    output_dir: &Path,
) -> Result<PathBuf, WriteError> {
    let dir = output_dir.join(OUTPUT_SUBDIR);
    std::fs::create_dir_all(&dir).map_err(|source| WriteError::CreateDir {
        path: dir.clone(),
        source,
    })?;

    let path = dir.join(unique_name());
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let encode_err = |source: hound::Error| WriteError::Encode {
        path: path.clone(),
        source,
    };

    let mut writer = hound::WavWriter::create(&path, spec).map_err(|e| encode_err(e))?;
    for &sample in samples {
        writer.write_sample(to_i16(sample)).map_err(|e| encode_err(e))?;
    }
    writer.finalize().map_err(|e| encode_err(e))?;

    let absolute = std::fs::canonicalize(&path).map_err(|source| WriteError::Resolve {
        path: path.clone(),
        source,
    })?;

    info!(
        path = %absolute.display(),
        samples = samples.len(),
        sample_rate,
        duration_secs = samples.len() as f32 / sample_rate as f32,
        "wrote generated audio"
    );

    Ok(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_i16_extremes() {
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(1.0), i16::MAX);
        assert_eq!(to_i16(-1.0), i16::MIN);
        // saturates beyond the valid range
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), i16::MIN);
    }

    #[test]
    fn test_write_wav_creates_subdir_and_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![0.0, 0.5, -0.5, 1.0];

        let path = write_wav(&samples, 16_000, dir.path()).unwrap();
        assert!(path.is_absolute());
        assert_eq!(
            path.parent().unwrap().file_name().unwrap(),
            OUTPUT_SUBDIR
        );

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), samples.len());
        assert_eq!(decoded[0], 0);
        assert_eq!(decoded[3], i16::MAX);
    }

    #[test]
    fn test_write_wav_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_wav(&[0.1], 8_000, dir.path()).unwrap();
        let b = write_wav(&[0.1], 8_000, dir.path()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_write_wav_fails_on_unwritable_dir() {
        let dir = tempfile::tempdir().unwrap();
        // a file where the output directory should be
        let blocker = dir.path().join("out");
        std::fs::write(&blocker, b"x").unwrap();

        let err = write_wav(&[0.1], 8_000, &blocker).unwrap_err();
        assert!(matches!(err, WriteError::CreateDir { .. }));
    }
}
