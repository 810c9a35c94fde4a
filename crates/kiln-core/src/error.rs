//! Error taxonomy for the generation core.
//!
//! Errors are split into two disjoint families so callers can always tell
//! "fix your request" apart from "the service is broken":
//!
//! * user-caused: [`ValidationError`], [`MediaError`] — surfaced verbatim,
//!   never retried, produced before any resource is touched.
//! * internal / operational: [`RouteError`], [`ResidencyError`],
//!   [`ProviderError`], [`InferenceError`] — logged as defects or retryable
//!   conditions depending on the variant.
//!
//! [`GenerationError`] is the umbrella returned by the engine facade.

use thiserror::Error;

use crate::registry::{Mode, Provider};
use crate::request::ModelId;

/// A request was rejected by the declarative validation rules.
///
/// One variant per rule, each with a distinct human-readable reason.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("a mask was provided without a primary image")]
    MaskWithoutImage,

    #[error("a mask requires a primary image, not a video input")]
    MaskWithVideo,

    #[error("model '{model}' belongs to the '{expected}' family, request asked for '{requested}'")]
    WrongFamily {
        model: ModelId,
        expected: crate::request::Family,
        requested: crate::request::Family,
    },

    #[error("model '{model}' does not support the '{mode}' mode (supported: {supported})")]
    UnsupportedMode {
        model: ModelId,
        mode: &'static str,
        supported: String,
    },

    #[error("model '{model}' does not accept reference images")]
    ReferencesNotAccepted { model: ModelId },

    #[error("model '{model}' accepts at most {max} reference images, got {got}")]
    TooManyReferences {
        model: ModelId,
        max: usize,
        got: usize,
    },

    #[error("'{field}' out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("target precision must be 4, 8 or 16, got {got}")]
    InvalidPrecision { got: u8 },
}

/// A declared binary payload could not be turned into usable media.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to decode '{field}' payload")]
    Decode {
        field: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("mode '{mode}' requires a primary {kind} but none was usable after decode")]
    EmptyInput { mode: Mode, kind: &'static str },

    #[error("failed to encode output artifact {index}")]
    Encode {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Registry / dispatch-table inconsistency.
///
/// These should be unreachable for a request that passed validation; they are
/// logged as system defects, never as user errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouteError {
    #[error("no capability descriptor registered for model '{model}'")]
    UnknownModel { model: ModelId },

    #[error("no implementation routable for model '{model}' in mode '{mode}'")]
    Unroutable { model: ModelId, mode: Mode },

    #[error("model '{model}' registered twice")]
    DuplicateModel { model: ModelId },

    #[error("model '{model}' declares no supported modes")]
    NoModes { model: ModelId },

    #[error("registration table is empty")]
    EmptyTable,
}

/// Accelerator residency failures.
#[derive(Debug, Error)]
pub enum ResidencyError {
    /// The candidate pipeline cannot fit even after a full eviction.
    /// Retryable-later: the budget is a hard process limit, not a transient
    /// glitch, but a smaller request or a later retry may succeed.
    #[error("pipeline '{key}' needs {needed:.1} GiB, budget is {budget:.1} GiB even after full eviction")]
    ResourceExhausted {
        key: String,
        needed: f32,
        budget: f32,
    },

    #[error("failed to load pipeline '{key}'")]
    LoadFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// External provider failures, always carrying provider identity and the
/// provider-side job id where one was allocated.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("submission to {provider} for '{model}' failed after retry")]
    Submit {
        provider: Provider,
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{provider} job {task_id} failed: {message}")]
    Job {
        provider: Provider,
        task_id: String,
        message: String,
    },

    #[error("{provider} job {task_id} did not reach a terminal state within {timeout_secs}s")]
    Timeout {
        provider: Provider,
        task_id: String,
        timeout_secs: u64,
    },

    /// Polling transport failure after the job was accepted. Not retried:
    /// resubmitting risks a duplicate billable generation.
    #[error("polling {provider} job {task_id} failed")]
    Poll {
        provider: Provider,
        task_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("fetching artifact from {provider} failed: {url}")]
    Fetch {
        provider: Provider,
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{provider} job {task_id} returned no artifacts")]
    EmptyResult { provider: Provider, task_id: String },

    #[error("request cancelled while waiting on {provider} job {task_id}")]
    Cancelled { provider: Provider, task_id: String },
}

/// A local pipeline raised during inference, wrapped with the model and mode
/// that were executing so operators can attribute the failure.
#[derive(Debug, Error)]
#[error("inference failed for model '{model}' in mode '{mode}'")]
pub struct InferenceError {
    pub model: ModelId,
    pub mode: Mode,
    #[source]
    pub source: anyhow::Error,
}

/// Umbrella error returned by [`Engine::execute`].
///
/// [`Engine::execute`]: crate::engine::Engine::execute
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Residency(#[from] ResidencyError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("request cancelled before execution")]
    Cancelled,
}

impl GenerationError {
    /// `true` when the caller can fix the failure by changing the request.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            GenerationError::Validation(_) | GenerationError::Media(_)
        )
    }

    /// `true` when retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Residency(ResidencyError::ResourceExhausted { .. })
                | GenerationError::Provider(ProviderError::Timeout { .. })
        )
    }
}
