//! The inference-engine boundary.
//!
//! The orchestration core never talks to a concrete runtime. It drives the
//! traits in this module and branches only on [`FailureClass`]. Everything
//! fragile about a specific engine (diagnostic-text sniffing, the shape of
//! its generation result) is normalized here so it cannot leak inward.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::conditioning::ConditioningClip;
use crate::device_detection::DeviceChoice;
use crate::models::ModelSpec;

/// Weight serialization formats a pipeline can be built from.
///
/// SafeTensors is tried first; PyTorch checkpoints are the legacy fallback
/// when a model repository only ships the old format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    SafeTensors,
    PyTorch,
}

impl WeightFormat {
    pub const PRIMARY: WeightFormat = WeightFormat::SafeTensors;
    pub const LEGACY: WeightFormat = WeightFormat::PyTorch;

    pub fn as_str(&self) -> &'static str {
        match self {
            WeightFormat::SafeTensors => "safetensors",
            WeightFormat::PyTorch => "pytorch",
        }
    }
}

impl fmt::Display for WeightFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by an engine implementation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The requested weight format is not present for this model. The
    /// pipeline cache retries construction with the legacy format on this
    /// variant only.
    #[error("{format} weights unavailable: {reason}")]
    FormatUnavailable {
        format: WeightFormat,
        reason: String,
    },

    /// Pipeline construction failed for a non-format reason.
    #[error("pipeline construction failed: {0}")]
    Build(String),

    /// A generation run failed; the payload is the engine's diagnostic text.
    #[error("generation failed: {0}")]
    Runtime(String),

    /// The engine or one of its native dependencies is absent from the
    /// environment.
    #[error("missing capability: {0}")]
    MissingCapability(String),
}

/// Three-way classification of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Device memory was exhausted; retrying with a smaller budget may
    /// succeed.
    MemoryPressure,
    /// The device itself cannot run this workload; a CPU run may succeed.
    DeviceIncompatibility,
    /// Anything else. Not retried.
    Other,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::MemoryPressure => "memory-pressure",
            FailureClass::DeviceIncompatibility => "device-incompatibility",
            FailureClass::Other => "other",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic substrings indicating exhausted or corrupted device memory.
pub const MEMORY_PRESSURE_MARKERS: &[&str] = &[
    "out of memory",
    "out_of_memory",
    "cuda_error_out_of_memory",
    "allocation failed",
    "failed to allocate",
    "illegal memory access",
    "cudnn_status_alloc_failed",
];

/// Diagnostic substrings indicating the device cannot run this model at all.
pub const DEVICE_FAULT_MARKERS: &[&str] = &[
    "no kernel image",
    "invalid device function",
    "unspecified launch failure",
    "launch failed",
    "device-side assert",
    "expected all tensors to be on the same device",
    "device mismatch",
    "unsupported dtype",
];

/// Classify an opaque diagnostic string from an engine.
///
/// Memory markers are checked first: an exhausted allocator can also take a
/// kernel launch down with it, and shrinking the budget is the cheaper
/// reaction.
pub fn classify_diagnostic(text: &str) -> FailureClass {
    let lower = text.to_lowercase();
    if MEMORY_PRESSURE_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::MemoryPressure;
    }
    if DEVICE_FAULT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::DeviceIncompatibility;
    }
    FailureClass::Other
}

/// Parameters for a single generation attempt.
#[derive(Debug)]
pub struct EngineRequest<'a> {
    pub prompt: &'a str,
    pub max_tokens: usize,
    pub temperature: f32,
    pub conditioning: Option<&'a ConditioningClip>,
}

/// One generated sequence as the engine reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// The shapes a generation result may come back in.
///
/// Engine adapters wrap third-party runtimes with inconsistent return
/// conventions; [`EngineOutput::normalize`] collapses them before anything
/// downstream sees them.
#[derive(Debug, Clone)]
pub enum EngineOutput {
    /// A single result record.
    Single(GeneratedAudio),
    /// A bare (samples, rate) field pair.
    Raw { samples: Vec<f32>, sample_rate: u32 },
    /// A batch of result records; the first entry is the result.
    Batch(Vec<GeneratedAudio>),
}

impl EngineOutput {
    /// Collapse to the canonical (samples, rate) pair. `None` means the
    /// shape was unrecognizable (an empty batch).
    pub fn normalize(self) -> Option<GeneratedAudio> {
        match self {
            EngineOutput::Single(audio) => Some(audio),
            EngineOutput::Raw {
                samples,
                sample_rate,
            } => Some(GeneratedAudio {
                samples,
                sample_rate,
            }),
            EngineOutput::Batch(mut batch) => {
                if batch.is_empty() {
                    None
                } else {
                    Some(batch.swap_remove(0))
                }
            }
        }
    }
}

/// Conditioning adapter resolved per model identity and shared across the
/// devices that model runs on.
pub trait Conditioner: Send + Sync {
    /// Canonical id of the model this adapter was resolved for.
    fn model_id(&self) -> &str;
}

/// A built pipeline for one (model, device) pair.
///
/// Handles are owned by the pipeline cache; callers borrow them for the
/// duration of a generation call. `run` blocks for the whole inference.
pub trait PipelineHandle: Send + Sync {
    /// Maximum generation length, when the model exposes one.
    fn max_tokens(&self) -> Option<usize>;

    /// Run one blocking generation attempt.
    fn run(&self, request: &EngineRequest<'_>) -> Result<EngineOutput, EngineError>;
}

/// Factory and failure-classification interface an engine adapter
/// implements.
pub trait InferenceEngine: Send + Sync {
    /// Construct a pipeline for `model` on `device` from weights in
    /// `format`. A conditioning adapter is supplied for melody-capable
    /// models.
    fn build(
        &self,
        model: &ModelSpec,
        device: DeviceChoice,
        format: WeightFormat,
        conditioner: Option<Arc<dyn Conditioner>>,
    ) -> Result<Box<dyn PipelineHandle>, EngineError>;

    /// Resolve the conditioning adapter for a melody-capable model.
    fn build_conditioner(&self, model: &ModelSpec) -> Result<Arc<dyn Conditioner>, EngineError>;

    /// Classify an opaque runtime failure. The default implementation
    /// sniffs the diagnostic text; adapters with structured error types
    /// should override it.
    fn classify(&self, error: &EngineError) -> FailureClass {
        match error {
            EngineError::Runtime(message) => classify_diagnostic(message),
            _ => FailureClass::Other,
        }
    }
}
