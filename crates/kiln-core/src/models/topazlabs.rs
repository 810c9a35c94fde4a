//! Topaz Labs image upscale wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{encode_image_b64, stage_provider_artifacts};
use crate::artifact::MediaKind;
use crate::context::WorkingContext;
use crate::error::GenerationError;
use crate::provider::ExternalProviderAdapter;
use crate::registry::Provider;
use crate::router::ModelImplementation;

const UPSCALE_FACTOR: u32 = 4;

pub struct TopazUpscale {
    adapter: Arc<ExternalProviderAdapter>,
}

impl TopazUpscale {
    pub fn new(adapter: &Arc<ExternalProviderAdapter>) -> Self {
        Self { adapter: Arc::clone(adapter) }
    }
}

#[async_trait]
impl ModelImplementation for TopazUpscale {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let image = match &ctx.image {
            Some(image) => encode_image_b64(image)?,
            None => String::new(),
        };
        let payload = json!({
            "image": image,
            "upscale_factor": UPSCALE_FACTOR,
        });
        let outputs = self
            .adapter
            .generate(Provider::Topazlabs, "upscale", payload, ctx.cancel_rx.clone())
            .await?;
        stage_provider_artifacts(ctx, MediaKind::Image, outputs);
        Ok(())
    }
}
