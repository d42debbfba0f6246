//! Shared helpers for the orchestration integration tests.
//!
//! The inference engine is an external collaborator, so these tests drive
//! the orchestrator with a scripted stub: each entry in the script decides
//! what the next `run` attempt does, and counters/logs record what the
//! orchestrator actually asked for.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crescendo::{
    Conditioner, DeviceChoice, DeviceKind, EngineError, EngineOutput, EngineRequest,
    GeneratedAudio, InferenceEngine, ModelSpec, PipelineHandle, WeightFormat,
};

/// What a scripted generation attempt should do.
#[derive(Clone, Copy, Debug)]
pub enum Attempt {
    Succeed,
    MemoryPressure,
    DeviceFault,
    OtherFailure,
    MissingCapability,
}

/// Observable stub state, shared between the test and the engine.
#[derive(Default)]
pub struct StubState {
    pub builds: AtomicUsize,
    pub conditioner_builds: AtomicUsize,
    pub runs: AtomicUsize,
    pub conditioned_runs: AtomicUsize,
    pub script: Mutex<VecDeque<Attempt>>,
    pub token_log: Mutex<Vec<usize>>,
    pub device_log: Mutex<Vec<DeviceKind>>,
}

pub struct StubEngine {
    pub state: Arc<StubState>,
    pub max_tokens: Option<usize>,
    pub sample_rate: u32,
}

impl StubEngine {
    pub fn new(max_tokens: Option<usize>, sample_rate: u32) -> Self {
        Self {
            state: Arc::new(StubState::default()),
            max_tokens,
            sample_rate,
        }
    }

    /// Queue outcomes for upcoming attempts; an empty queue succeeds.
    pub fn script(&self, attempts: &[Attempt]) {
        let mut script = self.state.script.lock().unwrap();
        script.extend(attempts.iter().copied());
    }
}

struct StubConditioner {
    model_id: String,
}

impl Conditioner for StubConditioner {
    fn model_id(&self) -> &str {
        &self.model_id
    }
}

struct StubHandle {
    state: Arc<StubState>,
    device: DeviceKind,
    max_tokens: Option<usize>,
    sample_rate: u32,
}

impl PipelineHandle for StubHandle {
    fn max_tokens(&self) -> Option<usize> {
        self.max_tokens
    }

    fn run(&self, request: &EngineRequest<'_>) -> Result<EngineOutput, EngineError> {
        let attempt_idx = self.state.runs.fetch_add(1, Ordering::SeqCst);
        self.state
            .token_log
            .lock()
            .unwrap()
            .push(request.max_tokens);
        self.state.device_log.lock().unwrap().push(self.device);
        if request.conditioning.is_some() {
            self.state.conditioned_runs.fetch_add(1, Ordering::SeqCst);
        }

        let action = self
            .state
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Succeed);

        match action {
            Attempt::Succeed => {
                let audio = GeneratedAudio {
                    samples: (0..request.max_tokens * 64)
                        .map(|i| (i as f32 * 0.05).sin() * 0.5)
                        .collect(),
                    sample_rate: self.sample_rate,
                };
                // Rotate through the result shapes real runtimes return.
                Ok(match attempt_idx % 3 {
                    0 => EngineOutput::Single(audio),
                    1 => EngineOutput::Raw {
                        sample_rate: audio.sample_rate,
                        samples: audio.samples,
                    },
                    _ => EngineOutput::Batch(vec![audio]),
                })
            }
            Attempt::MemoryPressure => Err(EngineError::Runtime(
                "CUDA error: out of memory".to_string(),
            )),
            Attempt::DeviceFault => Err(EngineError::Runtime(
                "no kernel image is available for execution on the device".to_string(),
            )),
            Attempt::OtherFailure => {
                Err(EngineError::Runtime("shape mismatch at dim 2".to_string()))
            }
            Attempt::MissingCapability => Err(EngineError::MissingCapability(
                "audio codec runtime not installed".to_string(),
            )),
        }
    }
}

impl InferenceEngine for StubEngine {
    fn build(
        &self,
        _model: &ModelSpec,
        device: DeviceChoice,
        _format: WeightFormat,
        _conditioner: Option<Arc<dyn Conditioner>>,
    ) -> Result<Box<dyn PipelineHandle>, EngineError> {
        self.state.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubHandle {
            state: self.state.clone(),
            device: device.kind,
            max_tokens: self.max_tokens,
            sample_rate: self.sample_rate,
        }))
    }

    fn build_conditioner(&self, model: &ModelSpec) -> Result<Arc<dyn Conditioner>, EngineError> {
        self.state.conditioner_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubConditioner {
            model_id: model.id.clone(),
        }))
    }
}

/// Write a small mono 16-bit WAV fixture.
pub fn write_fixture_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}
