//! Request routing: model identifier to implementation dispatch.
//!
//! The router owns a flat dispatch table assembled once at startup. It never
//! inspects request contents beyond the identifier; capability questions were
//! settled by validation before a request reaches it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::WorkingContext;
use crate::error::{GenerationError, RouteError};
use crate::registry::Mode;
use crate::request::ModelId;

/// One routable model implementation.
///
/// Implementations are mode-complete: a wrapper handles every mode its
/// capability descriptor declares by branching on `ctx.mode` internally.
/// Results are staged on the context; the engine collects them afterwards.
#[async_trait]
pub trait ModelImplementation: Send + Sync {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError>;
}

/// Startup-assembled dispatch table from model identifier to implementation.
#[derive(Default)]
pub struct ModelRouter {
    table: HashMap<ModelId, Arc<dyn ModelImplementation>>,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation, failing on duplicates.
    pub fn insert(
        &mut self,
        model: ModelId,
        imp: Arc<dyn ModelImplementation>,
    ) -> Result<(), RouteError> {
        if self.table.insert(model, imp).is_some() {
            return Err(RouteError::DuplicateModel { model });
        }
        Ok(())
    }

    /// Resolve the implementation for `model`.
    ///
    /// # Errors
    ///
    /// [`RouteError::Unroutable`] when no implementation is registered. For a
    /// validated request this means the descriptor table and the dispatch
    /// table diverged, which the engine's startup check exists to prevent.
    pub fn resolve(
        &self,
        model: ModelId,
        mode: Mode,
    ) -> Result<Arc<dyn ModelImplementation>, RouteError> {
        let imp = self
            .table
            .get(&model)
            .cloned()
            .ok_or(RouteError::Unroutable { model, mode })?;
        debug!(%model, %mode, "request routed");
        Ok(imp)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn models(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.table.keys().copied()
    }
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("models", &self.table.keys().collect::<Vec<_>>())
            .finish()
    }
}
