//! Generation status observability.
//!
//! The authoritative record of a request is the `GenerationOutcome` returned
//! to its caller. Sinks exist for dashboards and health endpoints: they
//! receive fire-and-forget events at request start, on device fallback and
//! on terminal failure.

use std::sync::{PoisonError, RwLock};

use crate::device_detection::{DeviceKind, Precision};

/// A point-in-time status report for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Canonical model id.
    pub model: String,
    /// Device the request is (now) running on.
    pub device: DeviceKind,
    pub precision: Precision,
    /// Whether a CPU fallback has occurred for this request.
    pub fallback: bool,
    /// Diagnostic for a fallback or terminal failure, when there is one.
    pub reason: Option<String>,
}

/// Fire-and-forget observability hook.
pub trait StatusSink: Send + Sync {
    fn report(&self, event: &StatusEvent);
}

/// Keeps only the most recent event.
///
/// Last-writer-wins across concurrent requests: the snapshot is only
/// meaningful for a single in-flight request observed synchronously by its
/// own caller. Multi-tenant deployments should attach their own sink and
/// correlate events themselves.
#[derive(Debug, Default)]
pub struct LastStatus {
    inner: RwLock<Option<StatusEvent>>,
}

impl LastStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently reported event, if any request has run.
    pub fn snapshot(&self) -> Option<StatusEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatusSink for LastStatus {
    fn report(&self, event: &StatusEvent) {
        *self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(event.clone());
    }
}
