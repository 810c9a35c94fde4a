//! Engine facade: the one entry point a request passes through.
//!
//! `execute` runs the full lifecycle — validate, build context, route,
//! invoke, collect — and returns either the staged artifacts or one
//! [`GenerationError`]. The builder checks at startup that the capability
//! table and the dispatch table describe exactly the same model set, so a
//! validated request can never be unroutable at runtime.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::artifact::OutputArtifact;
use crate::config::Config;
use crate::context::WorkingContext;
use crate::error::{GenerationError, RouteError};
use crate::models::{self, LocalExecutor};
use crate::pipeline::LoaderSet;
use crate::provider::{ExternalProviderAdapter, ProviderTransport};
use crate::registry::{CapabilityDescriptor, CapabilityRegistry};
use crate::request::GenerationRequest;
use crate::residency::PipelineCache;
use crate::router::{ModelImplementation, ModelRouter};
use crate::validate;

/// Assembles an [`Engine`] and refuses inconsistent registrations.
#[derive(Default)]
pub struct EngineBuilder {
    registry: CapabilityRegistry,
    router: ModelRouter,
    cache: Option<Arc<PipelineCache>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one model: its capability descriptor and its implementation,
    /// always together.
    ///
    /// # Errors
    ///
    /// [`RouteError::DuplicateModel`] when the identifier was already
    /// registered in either table.
    pub fn model(
        mut self,
        descriptor: CapabilityDescriptor,
        imp: Arc<dyn ModelImplementation>,
    ) -> Result<Self, RouteError> {
        let model = descriptor.model;
        self.registry.insert(descriptor)?;
        self.router.insert(model, imp)?;
        Ok(self)
    }

    /// Attach the pipeline cache so the engine can expose flush and stats.
    pub fn pipeline_cache(mut self, cache: Arc<PipelineCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Finish assembly, verifying the 1:1 descriptor/implementation
    /// correspondence.
    ///
    /// # Errors
    ///
    /// [`RouteError::EmptyTable`] for an empty build, and the specific
    /// mismatch otherwise. A failed build means a deployment defect; the
    /// process should not start.
    pub fn build(self) -> Result<Engine, RouteError> {
        if self.registry.is_empty() {
            return Err(RouteError::EmptyTable);
        }
        for model in self.registry.models() {
            let descriptor = self.registry.describe(model)?;
            let mode = *descriptor
                .modes
                .first()
                .ok_or(RouteError::NoModes { model })?;
            if self.router.resolve(model, mode).is_err() {
                return Err(RouteError::Unroutable { model, mode });
            }
        }
        for model in self.router.models() {
            self.registry.describe(model)?;
        }
        info!(models = self.registry.len(), "engine assembled");
        Ok(Engine {
            registry: self.registry,
            router: self.router,
            cache: self.cache,
        })
    }
}

/// The result handed to the persistence layer: the staged artifacts in index
/// order, plus the original request echoed back for audit logging.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub request: GenerationRequest,
    pub artifacts: Vec<OutputArtifact>,
}

pub struct Engine {
    registry: CapabilityRegistry,
    router: ModelRouter,
    cache: Option<Arc<PipelineCache>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Assemble an engine with the builtin model table: local pipelines
    /// behind the residency cache, external models behind the given
    /// transport.
    pub fn with_default_models(
        config: &Config,
        loaders: LoaderSet,
        transport: Arc<dyn ProviderTransport>,
    ) -> Result<Self, RouteError> {
        let cache = Arc::new(PipelineCache::new(
            config.memory_budget_gib,
            config.max_cached_models,
        ));
        let executor = Arc::new(LocalExecutor::new(Arc::clone(&cache), loaders));
        let adapter = Arc::new(ExternalProviderAdapter::new(transport, config.poll_policy()));

        let registry = models::builtin_registry()?;
        let mut router = ModelRouter::new();
        models::install(&mut router, &executor, &adapter)?;

        // The builtin table goes through the same consistency check as
        // caller-assembled engines.
        EngineBuilder {
            registry,
            router,
            cache: Some(cache),
        }
        .build()
    }

    /// Run one request to completion.
    ///
    /// # Errors
    ///
    /// The umbrella [`GenerationError`]; use
    /// [`GenerationError::is_user_error`] to pick the response class.
    pub async fn execute(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.execute_cancellable(request, None).await
    }

    /// Like [`execute`], with a cooperative cancellation flag the caller can
    /// flip at any point.
    ///
    /// [`execute`]: Engine::execute
    pub async fn execute_cancellable(
        &self,
        request: GenerationRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let model = request.model;
        // An identifier the registry cannot describe is a deployment defect,
        // not a malformed request; it surfaces as a routing error.
        let descriptor = self.registry.describe(model).map_err(|e| {
            error!(%model, error = %e, "request for unregistered model");
            e
        })?;
        let expected_arity = descriptor.output_arity;
        let validated = validate::validate(descriptor, request).map_err(|e| {
            info!(%model, error = %e, "request rejected");
            e
        })?;
        let mode = validated.mode;

        let mut ctx = WorkingContext::build(validated)?;
        ctx.cancel_rx = cancel;
        if ctx.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let imp = self.router.resolve(model, mode).map_err(|e| {
            // Unreachable when assembled through the builder; log loudly.
            error!(%model, %mode, "validated request was unroutable");
            e
        })?;

        imp.invoke(&mut ctx).await.map_err(|e| {
            if e.is_user_error() {
                info!(%model, %mode, error = %e, "generation rejected");
            } else {
                error!(%model, %mode, error = %e, "generation failed");
            }
            e
        })?;

        if ctx.artifact_count() != expected_arity {
            warn!(
                %model,
                %mode,
                expected = expected_arity,
                produced = ctx.artifact_count(),
                "unexpected artifact count"
            );
        }
        info!(%model, %mode, artifacts = ctx.artifact_count(), "generation complete");
        let request = ctx.request.clone();
        Ok(GenerationOutcome {
            request,
            artifacts: ctx.into_artifacts(),
        })
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Drop every cached pipeline (shutdown and tests).
    pub fn flush_pipelines(&self) {
        if let Some(cache) = &self.cache {
            cache.flush();
        }
    }

    pub fn pipeline_cache(&self) -> Option<&Arc<PipelineCache>> {
        self.cache.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::registry::{Locality, Mode};
    use crate::request::{Family, ModelId};

    struct Noop;

    #[async_trait]
    impl ModelImplementation for Noop {
        async fn invoke(&self, _ctx: &mut WorkingContext) -> Result<(), GenerationError> {
            Ok(())
        }
    }

    fn descriptor(model: ModelId, modes: &'static [Mode]) -> CapabilityDescriptor {
        CapabilityDescriptor {
            model,
            family: Family::Image,
            modes,
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 1.0 },
            output_arity: 1,
        }
    }

    #[test]
    fn build_rejects_descriptor_without_modes() {
        let err = Engine::builder()
            .model(descriptor(ModelId::SdXl, &[]), Arc::new(Noop))
            .expect("registration")
            .build()
            .err()
            .unwrap();
        assert_eq!(err, RouteError::NoModes { model: ModelId::SdXl });
    }

    #[tokio::test]
    async fn unregistered_model_is_a_routing_error_not_a_user_error() {
        let engine = Engine::builder()
            .model(descriptor(ModelId::SdXl, &[Mode::TextToImage]), Arc::new(Noop))
            .expect("registration")
            .build()
            .expect("consistent table");
        let request = GenerationRequest::new(Family::Image, ModelId::Flux1, "a red fox");
        let err = engine.execute(request).await.err().unwrap();
        match &err {
            GenerationError::Route(RouteError::UnknownModel { model }) => {
                assert_eq!(*model, ModelId::Flux1);
            }
            other => panic!("expected UnknownModel, got {other:?}"),
        }
        assert!(!err.is_user_error());
    }
}
