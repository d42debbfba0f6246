//! Request orchestration: model resolution, conditioning, device selection,
//! the memory-backoff attempt loop and the one-shot CPU fallback.
//!
//! `Orchestrator::generate` is the crate's entry point. Everything retryable
//! is handled inside; the caller sees either a written file or one
//! descriptive error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::budget::TokenBudget;
use crate::conditioning::{self, ConditioningClip, ConditioningError};
use crate::config::OrchestratorConfig;
use crate::device_detection::{
    select_device, DeviceChoice, DeviceKind, DevicePreference, Precision,
};
use crate::engine::{EngineError, EngineRequest, FailureClass, GeneratedAudio, InferenceEngine};
use crate::models::{resolve_model, ModelSpec, UnknownModelError};
use crate::pipeline::{Pipeline, PipelineBuildError, PipelineCache};
use crate::status::{LastStatus, StatusEvent, StatusSink};
use crate::writer::{self, WriteError};

/// Terminal errors of a generation request.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    UnknownModel(#[from] UnknownModelError),

    #[error(transparent)]
    Conditioning(#[from] ConditioningError),

    #[error(transparent)]
    Build(#[from] PipelineBuildError),

    /// A runtime failure that survived the backoff/fallback rules.
    #[error("generation failed ({class}) for {model} on {device} at {tokens} tokens: {source}")]
    Runtime {
        class: FailureClass,
        model: String,
        device: DeviceKind,
        tokens: usize,
        #[source]
        source: EngineError,
    },

    #[error("engine returned an unrecognized result shape")]
    UnrecognizedResultShape,

    #[error(transparent)]
    Write(#[from] WriteError),

    /// The engine or a native dependency is absent from the environment.
    #[error("missing capability: {0}")]
    MissingCapability(String),
}

/// A generation request.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    /// Text description of the music to generate.
    pub prompt: String,
    /// Requested duration in seconds.
    pub duration_secs: f64,
    /// Model alias or full identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Directory the result is written under.
    pub output_dir: PathBuf,
    /// Optional melody reference clip.
    pub conditioning_path: Option<PathBuf>,
    /// Device preference for this request.
    pub device: DevicePreference,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            duration_secs: 10.0,
            model: "small".to_string(),
            temperature: 1.0,
            output_dir: output_dir.into(),
            conditioning_path: None,
            device: DevicePreference::default(),
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_conditioning(mut self, path: impl Into<PathBuf>) -> Self {
        self.conditioning_path = Some(path.into());
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }
}

/// Per-request result record. This, not any global cell, is the source of
/// truth for what happened to a request.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Absolute path of the written audio file.
    pub path: PathBuf,
    /// Canonical model id.
    pub model: String,
    /// Device the successful attempt ran on.
    pub device: DeviceKind,
    pub precision: Precision,
    /// Whether a CPU fallback occurred.
    pub fallback: bool,
    /// Token budget of the successful attempt.
    pub tokens: usize,
    /// What the duration alone asked for.
    pub requested_tokens: usize,
    /// Whether the request was clamped by the model limit.
    pub truncated: bool,
    /// Total attempts across both devices.
    pub attempts: u32,
    /// Sample rate reported by the engine.
    pub sample_rate: u32,
    /// Duration of the written audio.
    pub duration_secs: f32,
    /// Wall time of the whole request.
    pub elapsed_ms: u64,
}

struct RunStats {
    audio: GeneratedAudio,
    device: DeviceChoice,
    fallback: bool,
    tokens: usize,
    attempts: u32,
}

/// The orchestration layer over an opaque inference engine.
pub struct Orchestrator {
    engine: Arc<dyn InferenceEngine>,
    cache: PipelineCache,
    config: OrchestratorConfig,
    last: LastStatus,
    sink: Option<Arc<dyn StatusSink>>,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    engine: Arc<dyn InferenceEngine>,
    config: OrchestratorConfig,
    sink: Option<Arc<dyn StatusSink>>,
}

impl OrchestratorBuilder {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            engine,
            config: OrchestratorConfig::default(),
            sink: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            cache: PipelineCache::new(self.engine.clone()),
            engine: self.engine,
            config: self.config,
            last: LastStatus::new(),
            sink: self.sink,
        }
    }
}

impl Orchestrator {
    /// Create an orchestrator with default configuration.
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        OrchestratorBuilder::new(engine).build()
    }

    pub fn builder(engine: Arc<dyn InferenceEngine>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(engine)
    }

    /// The most recent status event observed process-wide. Last-writer-wins
    /// under concurrency; see [`LastStatus`].
    pub fn last_status(&self) -> Option<StatusEvent> {
        self.last.snapshot()
    }

    fn report(&self, event: StatusEvent) {
        self.last.report(&event);
        if let Some(sink) = &self.sink {
            sink.report(&event);
        }
    }

    /// Generate audio for `request` and return the written file's path plus
    /// the per-request outcome record.
    #[instrument(skip(self, request), fields(model = %request.model, prompt_len = request.prompt.len()))]
    pub async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerationOutcome, GenerateError> {
        let started = Instant::now();
        let model = resolve_model(&request.model)?;

        let clip = match conditioning::prepare(
            request.conditioning_path.as_deref(),
            &model,
            self.config.max_clip_secs,
        ) {
            Ok(clip) => clip,
            Err(ConditioningError::Unsupported(id)) => {
                warn!(
                    model = %id,
                    "model does not accept conditioning; ignoring the supplied clip"
                );
                None
            }
            Err(err) => return Err(err.into()),
        };

        let device = select_device(request.device, self.config.precision);
        self.report(StatusEvent {
            model: model.id.clone(),
            device: device.kind,
            precision: device.precision,
            fallback: false,
            reason: None,
        });

        let pipeline = self.cache.acquire(&model, device).await?;
        let budget = TokenBudget::for_duration(
            request.duration_secs,
            self.config.tokens_per_second,
            pipeline.handle.max_tokens(),
        );
        if budget.truncated {
            warn!(
                model = %model.id,
                requested = budget.requested,
                clamped = budget.tokens,
                "requested duration exceeds the model's sequence limit, truncating"
            );
        }

        let run = self
            .execute(
                &model,
                pipeline,
                device,
                &request.prompt,
                request.temperature,
                clip.as_ref(),
                budget,
            )
            .await?;

        let path = writer::write_wav(&run.audio.samples, run.audio.sample_rate, &request.output_dir)?;

        let outcome = GenerationOutcome {
            path,
            model: model.id,
            device: run.device.kind,
            precision: run.device.precision,
            fallback: run.fallback,
            tokens: run.tokens,
            requested_tokens: budget.requested,
            truncated: budget.truncated,
            attempts: run.attempts,
            sample_rate: run.audio.sample_rate,
            duration_secs: run.audio.samples.len() as f32 / run.audio.sample_rate as f32,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            path = %outcome.path.display(),
            device = %outcome.device,
            attempts = outcome.attempts,
            fallback = outcome.fallback,
            elapsed_ms = outcome.elapsed_ms,
            "generation complete"
        );

        Ok(outcome)
    }

    /// The attempt loop: memory-pressure failures shrink the budget (up to
    /// `max_attempts` per device, never below the threshold), a
    /// device-class failure on the accelerated path triggers exactly one
    /// CPU fallback with the original budget, anything else is terminal.
    async fn execute(
        &self,
        model: &ModelSpec,
        initial: Arc<Pipeline>,
        initial_device: DeviceChoice,
        prompt: &str,
        temperature: f32,
        clip: Option<&ConditioningClip>,
        budget: TokenBudget,
    ) -> Result<RunStats, GenerateError> {
        let mut pipeline = initial;
        let mut device = initial_device;
        let mut fallback = false;
        let mut tokens = budget.tokens;
        let mut attempts_on_device: u32 = 0;
        let mut total_attempts: u32 = 0;

        loop {
            attempts_on_device += 1;
            total_attempts += 1;

            let attempt = EngineRequest {
                prompt,
                max_tokens: tokens,
                temperature,
                conditioning: clip,
            };

            let err = match pipeline.handle.run(&attempt) {
                Ok(output) => {
                    let audio = output
                        .normalize()
                        .ok_or(GenerateError::UnrecognizedResultShape)?;
                    return Ok(RunStats {
                        audio,
                        device,
                        fallback,
                        tokens,
                        attempts: total_attempts,
                    });
                }
                Err(err) => err,
            };

            let class = self.engine.classify(&err);

            if class == FailureClass::MemoryPressure
                && self.config.backoff.can_shrink(tokens)
                && attempts_on_device < self.config.backoff.max_attempts
            {
                let next = self.config.backoff.shrink(tokens);
                warn!(
                    model = %model.id,
                    device = %device,
                    from = tokens,
                    to = next,
                    attempt = attempts_on_device,
                    "memory pressure, shrinking token budget and retrying"
                );
                tokens = next;
                continue;
            }

            if class == FailureClass::DeviceIncompatibility
                && device.kind == DeviceKind::Accelerated
                && !fallback
            {
                warn!(
                    model = %model.id,
                    error = %err,
                    "device failure on the accelerated path, falling back to cpu"
                );
                fallback = true;
                device = DeviceChoice::cpu();
                self.report(StatusEvent {
                    model: model.id.clone(),
                    device: device.kind,
                    precision: device.precision,
                    fallback: true,
                    reason: Some(err.to_string()),
                });
                pipeline = self.cache.acquire(model, device).await?;
                tokens = budget.tokens;
                attempts_on_device = 0;
                continue;
            }

            self.report(StatusEvent {
                model: model.id.clone(),
                device: device.kind,
                precision: device.precision,
                fallback,
                reason: Some(err.to_string()),
            });

            if let EngineError::MissingCapability(what) = err {
                return Err(GenerateError::MissingCapability(what));
            }

            return Err(GenerateError::Runtime {
                class,
                model: model.id.clone(),
                device: device.kind,
                tokens,
                source: err,
            });
        }
    }
}
