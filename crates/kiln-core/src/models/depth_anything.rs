//! Depth Anything wrapper: monocular depth estimation.

use std::sync::Arc;

use async_trait::async_trait;

use super::{base_job, stage_outputs, LocalExecutor};
use crate::context::WorkingContext;
use crate::error::GenerationError;
use crate::request::ModelId;
use crate::router::ModelImplementation;

pub struct DepthAnything {
    executor: Arc<LocalExecutor>,
}

impl DepthAnything {
    pub fn new(executor: &Arc<LocalExecutor>) -> Self {
        Self { executor: Arc::clone(executor) }
    }
}

#[async_trait]
impl ModelImplementation for DepthAnything {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        // Pure image-in/image-out; prompt and sampler fields are inert here.
        let job = base_job(ctx);
        let outputs = self
            .executor
            .run(ModelId::DepthAnything2, ctx.request.target_precision, job)
            .await?;
        stage_outputs(ctx, outputs)?;
        Ok(())
    }
}
