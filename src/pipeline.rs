//! Pipeline construction and reuse.
//!
//! Pipelines are expensive to build (weights load into device memory), so
//! the cache builds each (model, device) pair once and keeps it warm for the
//! process lifetime. There is no eviction: the key space is a small fixed
//! model set.
//!
//! Concurrency discipline: the map lock covers lookup/insert only. The
//! build itself runs inside a per-key cell, so racers on the same uncached
//! key await the single winning builder while other keys proceed
//! independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::device_detection::DeviceChoice;
use crate::engine::{Conditioner, EngineError, InferenceEngine, PipelineHandle, WeightFormat};
use crate::models::ModelSpec;

/// Cache key: one entry per model per device decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub model: String,
    pub device: DeviceChoice,
}

/// A cached inference pipeline: the opaque engine handle plus, for
/// melody-capable models, the conditioning adapter it was built with.
pub struct Pipeline {
    pub key: PipelineKey,
    pub handle: Box<dyn PipelineHandle>,
    pub conditioner: Option<Arc<dyn Conditioner>>,
    /// Which weight format construction ultimately succeeded with.
    pub weight_format: WeightFormat,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("key", &self.key)
            .field("has_conditioner", &self.conditioner.is_some())
            .field("weight_format", &self.weight_format)
            .finish()
    }
}

/// Raised when construction fails for a key; fatal for the request.
#[derive(Error, Debug)]
#[error("failed to build pipeline for {model} on {device}: {source}")]
pub struct PipelineBuildError {
    pub model: String,
    pub device: DeviceChoice,
    #[source]
    pub source: EngineError,
}

type PipelineCell = Arc<OnceCell<Arc<Pipeline>>>;
type ConditionerCell = Arc<OnceCell<Arc<dyn Conditioner>>>;

/// Warm cache of built pipelines, shared by all requests.
pub struct PipelineCache {
    engine: Arc<dyn InferenceEngine>,
    pipelines: Mutex<HashMap<PipelineKey, PipelineCell>>,
    conditioners: Mutex<HashMap<String, ConditionerCell>>,
}

impl PipelineCache {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            engine,
            pipelines: Mutex::new(HashMap::new()),
            conditioners: Mutex::new(HashMap::new()),
        }
    }

    /// Return the pipeline for `(model, device)`, building it on first use.
    ///
    /// Idempotent and safe under concurrent callers: racers for the same
    /// uncached key block until the first build completes; a failed build
    /// leaves the slot empty so a later request can try again.
    pub async fn acquire(
        &self,
        model: &ModelSpec,
        device: DeviceChoice,
    ) -> Result<Arc<Pipeline>, PipelineBuildError> {
        let key = PipelineKey {
            model: model.id.clone(),
            device,
        };

        let cell: PipelineCell = {
            let mut map = self
                .pipelines
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| async {
            self.build(model, key.clone()).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    async fn build(
        &self,
        model: &ModelSpec,
        key: PipelineKey,
    ) -> Result<Pipeline, PipelineBuildError> {
        let conditioner = if model.conditioning {
            Some(self.conditioner_for(model).await?)
        } else {
            None
        };

        info!(model = %key.model, device = %key.device, "building pipeline");

        let (handle, weight_format) = match self.engine.build(
            model,
            key.device,
            WeightFormat::PRIMARY,
            conditioner.clone(),
        ) {
            Ok(handle) => (handle, WeightFormat::PRIMARY),
            Err(EngineError::FormatUnavailable { format, reason }) => {
                warn!(
                    model = %key.model,
                    %format,
                    reason = %reason,
                    "primary weight format unavailable, retrying with legacy checkpoint"
                );
                let handle = self
                    .engine
                    .build(model, key.device, WeightFormat::LEGACY, conditioner.clone())
                    .map_err(|source| PipelineBuildError {
                        model: key.model.clone(),
                        device: key.device,
                        source,
                    })?;
                (handle, WeightFormat::LEGACY)
            }
            Err(source) => {
                return Err(PipelineBuildError {
                    model: key.model.clone(),
                    device: key.device,
                    source,
                });
            }
        };

        info!(model = %key.model, device = %key.device, format = %weight_format, "pipeline ready");

        Ok(Pipeline {
            key,
            handle,
            conditioner,
            weight_format,
        })
    }

    /// Conditioning adapters are cached per model identity, independent of
    /// device, so the CPU fallback pipeline reuses the adapter the
    /// accelerated pipeline was built with.
    async fn conditioner_for(
        &self,
        model: &ModelSpec,
    ) -> Result<Arc<dyn Conditioner>, PipelineBuildError> {
        let cell: ConditionerCell = {
            let mut map = self
                .conditioners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            map.entry(model.id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| async {
            self.engine
                .build_conditioner(model)
                .map_err(|source| PipelineBuildError {
                    model: model.id.clone(),
                    device: DeviceChoice::cpu(),
                    source,
                })
        })
        .await
        .cloned()
    }

    /// Number of pipelines currently built. Diagnostic only.
    pub fn built_count(&self) -> usize {
        self.pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}
