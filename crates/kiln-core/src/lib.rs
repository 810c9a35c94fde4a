pub mod artifact;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod request;
pub mod residency;
pub mod router;
pub mod validate;

#[cfg(test)]
mod tests;

pub use artifact::{ArtifactData, MediaKind, OutputArtifact};
pub use config::Config;
pub use engine::{Engine, EngineBuilder, GenerationOutcome};
pub use error::GenerationError;
pub use request::{Family, GenerationRequest, ModelId};
