//! Compute device selection.
//!
//! Decision priority:
//! 1. explicit per-request preference,
//! 2. the `CRESCENDO_FORCE_GPU` environment flag,
//! 3. the hardware availability probe.
//!
//! The probe covers CUDA and Metal; either counts as the accelerated path.

use std::fmt;

use tracing::debug;

/// Environment flag that forces the accelerated path regardless of what the
/// availability probe reports.
pub const FORCE_ACCEL_ENV: &str = "CRESCENDO_FORCE_GPU";

/// The two execution paths the orchestrator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Accelerated,
    Cpu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Accelerated => "accelerated",
            DeviceKind::Cpu => "cpu",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric precision mode. `Reduced` is only meaningful on the accelerated
/// path; CPU pipelines always run `Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    Full,
    Reduced,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Full => "f32",
            Precision::Reduced => "f16",
        }
    }
}

/// A device decision. Chosen once per pipeline-cache entry and never mutated
/// after the handle is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceChoice {
    pub kind: DeviceKind,
    pub precision: Precision,
}

impl DeviceChoice {
    pub fn accelerated(precision: Precision) -> Self {
        Self {
            kind: DeviceKind::Accelerated,
            precision,
        }
    }

    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            precision: Precision::Full,
        }
    }
}

impl fmt::Display for DeviceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.precision.as_str())
    }
}

/// Per-request device preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Probe the hardware (subject to the forced-accelerator flag).
    #[default]
    Auto,
    /// Use the accelerated path even if the probe reports it unavailable.
    Accelerated,
    /// Stay on CPU.
    Cpu,
}

/// Check whether an accelerator backend is available.
pub fn accelerator_available() -> bool {
    candle_core::utils::cuda_is_available() || candle_core::utils::metal_is_available()
}

/// Check the forced-accelerator environment flag.
pub fn force_accel_requested() -> bool {
    matches!(
        std::env::var(FORCE_ACCEL_ENV).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

/// Pure device decision from the three inputs, in priority order.
pub fn choose(
    preference: DevicePreference,
    forced: bool,
    available: bool,
    precision: Precision,
) -> DeviceChoice {
    match preference {
        DevicePreference::Cpu => DeviceChoice::cpu(),
        DevicePreference::Accelerated => DeviceChoice::accelerated(precision),
        DevicePreference::Auto => {
            if forced || available {
                DeviceChoice::accelerated(precision)
            } else {
                DeviceChoice::cpu()
            }
        }
    }
}

/// Decide the device for a request, consulting the environment flag and the
/// hardware probe.
pub fn select_device(preference: DevicePreference, precision: Precision) -> DeviceChoice {
    let forced = force_accel_requested();
    let available = accelerator_available();
    let choice = choose(preference, forced, available, precision);
    debug!(
        preference = ?preference,
        forced,
        available,
        device = %choice,
        "selected compute device"
    );
    choice
}
