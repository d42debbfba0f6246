//! crescendo: orchestration layer for MusicGen-style audio generation.
//!
//! Sits between a client request ("N seconds of audio from this prompt,
//! optionally steered by a melody clip") and an opaque inference engine.
//! Owns pipeline caching per (model, device), token budgeting, conditioning
//! preprocessing, memory-pressure backoff, accelerated-to-CPU fallback and
//! result persistence. Engine internals stay behind the traits in
//! [`engine`].

pub mod budget;
pub mod conditioning;
pub mod config;
pub mod device_detection;
pub mod engine;
pub mod generate;
pub mod models;
pub mod pipeline;
pub mod status;
pub mod writer;

pub use budget::{TokenBudget, DEFAULT_TOKENS_PER_SECOND};
pub use conditioning::{ClipError, ConditioningClip, ConditioningError, DEFAULT_MAX_CLIP_SECS};
pub use config::{init_tracing, BackoffPolicy, OrchestratorConfig};
pub use device_detection::{
    accelerator_available, choose, select_device, DeviceChoice, DeviceKind, DevicePreference,
    Precision, FORCE_ACCEL_ENV,
};
pub use engine::{
    classify_diagnostic, Conditioner, EngineError, EngineOutput, EngineRequest, FailureClass,
    GeneratedAudio, InferenceEngine, PipelineHandle, WeightFormat,
};
pub use generate::{
    GenerateError, GenerateRequest, GenerationOutcome, Orchestrator, OrchestratorBuilder,
};
pub use models::{
    catalog, known_aliases, resolve_model, KnownModel, ModelSpec, UnknownModelError,
    PASSTHROUGH_PREFIX,
};
pub use pipeline::{Pipeline, PipelineBuildError, PipelineCache, PipelineKey};
pub use status::{LastStatus, StatusEvent, StatusSink};
pub use writer::{write_wav, WriteError, OUTPUT_SUBDIR};
