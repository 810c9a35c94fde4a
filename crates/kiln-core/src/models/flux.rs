//! Flux wrapper, shared by both generations of the model.
//!
//! Flux is guidance-distilled and takes no negative prompt; the wrapper
//! clears it rather than letting the pipeline silently ignore it.

use std::sync::Arc;

use async_trait::async_trait;

use super::{base_job, stage_outputs, LocalExecutor};
use crate::context::WorkingContext;
use crate::error::GenerationError;
use crate::request::ModelId;
use crate::router::ModelImplementation;

const DIM_DIVISOR: u32 = 16;

pub struct Flux {
    executor: Arc<LocalExecutor>,
    model: ModelId,
}

impl Flux {
    pub fn new(executor: &Arc<LocalExecutor>, model: ModelId) -> Self {
        Self {
            executor: Arc::clone(executor),
            model,
        }
    }
}

#[async_trait]
impl ModelImplementation for Flux {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        ctx.ensure_divisible(DIM_DIVISOR);
        let mut job = base_job(ctx);
        job.negative_prompt.clear();
        let outputs = self
            .executor
            .run(self.model, ctx.request.target_precision, job)
            .await?;
        stage_outputs(ctx, outputs)?;
        Ok(())
    }
}
