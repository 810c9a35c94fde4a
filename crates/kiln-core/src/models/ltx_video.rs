//! LTX-Video wrapper: text-to-video and image-to-video.

use std::sync::Arc;

use async_trait::async_trait;

use super::{base_job, stage_outputs, LocalExecutor};
use crate::context::WorkingContext;
use crate::error::GenerationError;
use crate::request::ModelId;
use crate::router::ModelImplementation;

/// LTX latents are 32x32 pixel patches and 8-frame temporal blocks; frame
/// counts must be `8k + 1`.
const DIM_DIVISOR: u32 = 32;
const FRAME_DIVISOR: u32 = 8;

pub struct LtxVideo {
    executor: Arc<LocalExecutor>,
}

impl LtxVideo {
    pub fn new(executor: &Arc<LocalExecutor>) -> Self {
        Self { executor: Arc::clone(executor) }
    }
}

#[async_trait]
impl ModelImplementation for LtxVideo {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        ctx.ensure_divisible(DIM_DIVISOR);
        let frames = ctx.ensure_frames_divisible(ctx.request.num_frames, FRAME_DIVISOR);
        let mut job = base_job(ctx);
        job.frames = Some(frames);
        let outputs = self
            .executor
            .run(ModelId::LtxVideo2, ctx.request.target_precision, job)
            .await?;
        stage_outputs(ctx, outputs)?;
        Ok(())
    }
}
