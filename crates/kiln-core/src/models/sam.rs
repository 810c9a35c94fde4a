//! Segment Anything wrapper: whole-image segmentation.

use std::sync::Arc;

use async_trait::async_trait;

use super::{base_job, stage_outputs, LocalExecutor};
use crate::context::WorkingContext;
use crate::error::GenerationError;
use crate::request::ModelId;
use crate::router::ModelImplementation;

pub struct Sam {
    executor: Arc<LocalExecutor>,
}

impl Sam {
    pub fn new(executor: &Arc<LocalExecutor>) -> Self {
        Self { executor: Arc::clone(executor) }
    }
}

#[async_trait]
impl ModelImplementation for Sam {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let job = base_job(ctx);
        let outputs = self
            .executor
            .run(ModelId::Sam2, ctx.request.target_precision, job)
            .await?;
        stage_outputs(ctx, outputs)?;
        Ok(())
    }
}
