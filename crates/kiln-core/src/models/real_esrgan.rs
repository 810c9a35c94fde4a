//! Real-ESRGAN wrapper: 4x single-image super-resolution.

use std::sync::Arc;

use async_trait::async_trait;

use super::{base_job, stage_outputs, LocalExecutor};
use crate::context::WorkingContext;
use crate::error::GenerationError;
use crate::request::ModelId;
use crate::router::ModelImplementation;

pub struct RealEsrgan {
    executor: Arc<LocalExecutor>,
}

impl RealEsrgan {
    pub fn new(executor: &Arc<LocalExecutor>) -> Self {
        Self { executor: Arc::clone(executor) }
    }
}

#[async_trait]
impl ModelImplementation for RealEsrgan {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let job = base_job(ctx);
        let outputs = self
            .executor
            .run(ModelId::RealEsrganX4, ctx.request.target_precision, job)
            .await?;
        stage_outputs(ctx, outputs)?;
        Ok(())
    }
}
