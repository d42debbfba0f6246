//! Known model identities for the MusicGen family.
//!
//! Callers normally pass a short alias ("small", "melody", ...). Full
//! `facebook/musicgen-*` identifiers are accepted verbatim so new checkpoints
//! in the family work without a code change. Anything else is rejected before
//! a pipeline build is attempted.

use thiserror::Error;

/// Identifiers starting with this prefix are accepted without an alias entry.
pub const PASSTHROUGH_PREFIX: &str = "facebook/musicgen-";

/// Returned when a model name is neither a known alias nor a passthrough id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown model '{given}'; valid short names are: {valid}")]
pub struct UnknownModelError {
    pub given: String,
    pub valid: String,
}

/// A resolved model identity plus its orchestration-relevant capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Canonical identifier, e.g. "facebook/musicgen-small".
    pub id: String,
    /// Whether this model consumes a melody conditioning clip.
    pub conditioning: bool,
}

/// Catalog entry for a known model.
#[derive(Debug, Clone)]
pub struct KnownModel {
    pub alias: &'static str,
    pub canonical: &'static str,
    pub conditioning: bool,
    pub description: &'static str,
}

const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        alias: "small",
        canonical: "facebook/musicgen-small",
        conditioning: false,
        description: "MusicGen small (300M), text-to-music",
    },
    KnownModel {
        alias: "medium",
        canonical: "facebook/musicgen-medium",
        conditioning: false,
        description: "MusicGen medium (1.5B), text-to-music",
    },
    KnownModel {
        alias: "large",
        canonical: "facebook/musicgen-large",
        conditioning: false,
        description: "MusicGen large (3.3B), text-to-music",
    },
    KnownModel {
        alias: "melody",
        canonical: "facebook/musicgen-melody",
        conditioning: true,
        description: "MusicGen melody (1.5B), text-to-music with melody conditioning",
    },
    KnownModel {
        alias: "melody-large",
        canonical: "facebook/musicgen-melody-large",
        conditioning: true,
        description: "MusicGen melody large (3.3B), text-to-music with melody conditioning",
    },
];

/// List the known models with their descriptions.
pub fn catalog() -> &'static [KnownModel] {
    KNOWN_MODELS
}

/// Short names accepted by [`resolve_model`].
pub fn known_aliases() -> Vec<&'static str> {
    KNOWN_MODELS.iter().map(|m| m.alias).collect()
}

/// Resolve a caller-supplied model name into a [`ModelSpec`].
///
/// Aliases map through the table above; full ids under
/// [`PASSTHROUGH_PREFIX`] pass through verbatim, with the conditioning
/// capability inferred from the `melody` marker in the id.
pub fn resolve_model(name: &str) -> Result<ModelSpec, UnknownModelError> {
    if let Some(known) = KNOWN_MODELS.iter().find(|m| m.alias == name) {
        return Ok(ModelSpec {
            id: known.canonical.to_string(),
            conditioning: known.conditioning,
        });
    }

    if name.starts_with(PASSTHROUGH_PREFIX) {
        return Ok(ModelSpec {
            id: name.to_string(),
            conditioning: name.contains("melody"),
        });
    }

    Err(UnknownModelError {
        given: name.to_string(),
        valid: known_aliases().join(", "),
    })
}
