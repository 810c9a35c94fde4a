//! Wan wrapper: text-to-video and image-to-video.
//!
//! The scheduler flow shift is raised for 720p only; every other resolution
//! class, 1080p included, uses the default shift.

use std::sync::Arc;

use async_trait::async_trait;

use super::{base_job, stage_outputs, LocalExecutor};
use crate::context::{ResolutionClass, WorkingContext};
use crate::error::GenerationError;
use crate::request::ModelId;
use crate::router::ModelImplementation;

const DIM_DIVISOR: u32 = 16;
/// Frame counts must be `4k + 1` for the temporal VAE.
const FRAME_DIVISOR: u32 = 4;

const FLOW_SHIFT_DEFAULT: f32 = 3.0;
const FLOW_SHIFT_HD720: f32 = 5.0;

fn flow_shift(class: ResolutionClass) -> f32 {
    match class {
        ResolutionClass::Hd720 => FLOW_SHIFT_HD720,
        _ => FLOW_SHIFT_DEFAULT,
    }
}

pub struct Wan {
    executor: Arc<LocalExecutor>,
}

impl Wan {
    pub fn new(executor: &Arc<LocalExecutor>) -> Self {
        Self { executor: Arc::clone(executor) }
    }
}

#[async_trait]
impl ModelImplementation for Wan {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        ctx.ensure_divisible(DIM_DIVISOR);
        let frames = ctx.ensure_frames_divisible(ctx.request.num_frames, FRAME_DIVISOR);
        let mut job = base_job(ctx);
        job.frames = Some(frames);
        job.flow_shift = Some(flow_shift(ctx.resolution_class()));
        let outputs = self
            .executor
            .run(ModelId::Wan2, ctx.request.target_precision, job)
            .await?;
        stage_outputs(ctx, outputs)?;
        Ok(())
    }
}
