//! Conditioning-clip preprocessing.
//!
//! A caller may point a request at a reference audio file; melody-capable
//! models steer generation with it. This module turns that file into the
//! canonical representation the engine boundary accepts: mono f32 samples in
//! [-1, 1] at an explicit rate, truncated to a hard cap so an over-long clip
//! cannot blow up device memory downstream.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::models::ModelSpec;

/// Default cap on conditioning-clip length, in seconds.
pub const DEFAULT_MAX_CLIP_SECS: u32 = 30;

/// File-level problems with a conditioning clip.
#[derive(Error, Debug)]
pub enum ClipError {
    #[error("conditioning clip not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to decode conditioning clip {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("conditioning clip has invalid sample rate {0}")]
    InvalidSampleRate(u32),

    #[error("conditioning clip is empty")]
    Empty,

    #[error("conditioning clip has {channels} channels; only mono input is supported")]
    UnsupportedChannels { channels: u16 },
}

/// Capability-level problems with a conditioning request.
#[derive(Error, Debug)]
pub enum ConditioningError {
    #[error("model '{0}' does not accept a conditioning clip")]
    Unsupported(String),

    #[error("model '{0}' requires a conditioning clip but none was supplied")]
    Missing(String),

    #[error(transparent)]
    Clip(#[from] ClipError),
}

/// A normalized reference clip. Lives for one generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditioningClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl ConditioningClip {
    /// Build a clip from raw mono samples, applying the canonical
    /// normalization: clip amplitudes to [-1, 1] when the peak exceeds 1.0,
    /// then truncate to `max_secs`.
    ///
    /// Normalization is idempotent: feeding the samples of a returned clip
    /// back in yields the same clip.
    pub fn from_samples(
        mut samples: Vec<f32>,
        sample_rate: u32,
        max_secs: u32,
    ) -> Result<Self, ClipError> {
        if sample_rate == 0 {
            return Err(ClipError::InvalidSampleRate(sample_rate));
        }
        if samples.is_empty() {
            return Err(ClipError::Empty);
        }

        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak > 1.0 {
            for s in samples.iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }
        }

        let cap = sample_rate as usize * max_secs as usize;
        if samples.len() > cap {
            warn!(
                clip_secs = samples.len() as f32 / sample_rate as f32,
                cap_secs = max_secs,
                "conditioning clip too long, truncating"
            );
            samples.truncate(cap);
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Decode and normalize a WAV file.
    pub fn load(path: &Path, max_secs: u32) -> Result<Self, ClipError> {
        if !path.exists() {
            return Err(ClipError::NotFound(path.to_path_buf()));
        }

        let reader = hound::WavReader::open(path).map_err(|e| ClipError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(ClipError::UnsupportedChannels {
                channels: spec.channels,
            });
        }
        if spec.sample_rate == 0 {
            return Err(ClipError::InvalidSampleRate(spec.sample_rate));
        }

        let samples = decode_samples(reader, &spec, path)?;
        Self::from_samples(samples, spec.sample_rate, max_secs)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Convert whatever sample encoding the file uses into f32.
///
/// Float input is copied through unchanged. Integer widths divide by the
/// format's maximum magnitude (128 for 8-bit, 32768 for 16-bit, and so on),
/// mapping the full signed range into [-1, 1).
fn decode_samples(
    reader: hound::WavReader<std::io::BufReader<std::fs::File>>,
    spec: &hound::WavSpec,
    path: &Path,
) -> Result<Vec<f32>, ClipError> {
    let decode_err = |e: hound::Error| ClipError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map_err(|e| decode_err(e)))
            .collect(),
        hound::SampleFormat::Int => {
            let magnitude = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map_err(|e| decode_err(e)).map(|v| v as f32 / magnitude))
                .collect()
        }
    }
}

/// Apply the conditioning rules for a request.
///
/// Returns the normalized clip for a melody-capable model, `Missing` when
/// such a model gets no clip, and `Unsupported` when a clip was supplied to
/// a model that cannot use it (the orchestrator logs and ignores that case).
pub fn prepare(
    path: Option<&Path>,
    model: &ModelSpec,
    max_secs: u32,
) -> Result<Option<ConditioningClip>, ConditioningError> {
    match (path, model.conditioning) {
        (None, true) => Err(ConditioningError::Missing(model.id.clone())),
        (Some(_), false) => Err(ConditioningError::Unsupported(model.id.clone())),
        (Some(p), true) => Ok(Some(ConditioningClip::load(p, max_secs)?)),
        (None, false) => Ok(None),
    }
}
