//! Configuration for the crescendo orchestrator.

use crate::budget::DEFAULT_TOKENS_PER_SECOND;
use crate::conditioning::DEFAULT_MAX_CLIP_SECS;
use crate::device_detection::Precision;

/// Retry policy for memory-pressure failures during generation.
///
/// The threshold and shrink factor mirror the behavior of the engines this
/// crate was tuned against; they are plain fields rather than constants so a
/// deployment can adjust them per engine.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Total attempts per device before the last error is propagated.
    pub max_attempts: u32,
    /// Budgets at or below this many tokens are not shrunk further; the next
    /// memory failure is terminal.
    pub shrink_threshold: usize,
    /// Multiplier applied to the token budget after a memory failure.
    pub shrink_factor: f64,
    /// Smallest budget the backoff will ever request.
    pub floor_tokens: usize,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            shrink_threshold: 120,
            shrink_factor: 0.6,
            floor_tokens: 100,
        }
    }
}

impl BackoffPolicy {
    /// Next budget after a memory-pressure failure at `tokens`.
    pub fn shrink(&self, tokens: usize) -> usize {
        let next = (tokens as f64 * self.shrink_factor).floor() as usize;
        next.max(self.floor_tokens)
    }

    /// Whether a budget of `tokens` is still worth shrinking.
    pub fn can_shrink(&self, tokens: usize) -> bool {
        tokens > self.shrink_threshold
    }
}

/// Orchestrator-wide settings.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Generation length consumed per second of requested audio.
    pub tokens_per_second: u32,
    /// Conditioning clips are truncated to this many seconds.
    pub max_clip_secs: u32,
    /// Numeric precision used on accelerated devices. CPU always runs full
    /// precision.
    pub precision: Precision,
    /// Memory-pressure retry policy.
    pub backoff: BackoffPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tokens_per_second: DEFAULT_TOKENS_PER_SECOND,
            max_clip_secs: DEFAULT_MAX_CLIP_SECS,
            precision: Precision::Reduced,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Initialize tracing with the given default log level.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_policy_default() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.shrink_threshold, 120);
        assert_eq!(policy.shrink_factor, 0.6);
        assert_eq!(policy.floor_tokens, 100);
    }

    #[test]
    fn test_backoff_shrink_applies_floor() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.shrink(200), 120);
        assert_eq!(policy.shrink(1000), 600);
        // 150 * 0.6 = 90, floored up to 100
        assert_eq!(policy.shrink(150), 100);
    }

    #[test]
    fn test_backoff_can_shrink_threshold() {
        let policy = BackoffPolicy::default();
        assert!(policy.can_shrink(121));
        assert!(!policy.can_shrink(120));
        assert!(!policy.can_shrink(1));
    }

    #[test]
    fn test_orchestrator_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.tokens_per_second, 50);
        assert_eq!(config.max_clip_secs, 30);
        assert_eq!(config.precision, Precision::Reduced);
    }
}
