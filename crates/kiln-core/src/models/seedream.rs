//! Seedream wrapper, reached through the replicate-style gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{encode_image_b64, stage_provider_artifacts};
use crate::artifact::MediaKind;
use crate::context::WorkingContext;
use crate::error::GenerationError;
use crate::provider::ExternalProviderAdapter;
use crate::registry::{Mode, Provider};
use crate::router::ModelImplementation;

pub struct Seedream {
    adapter: Arc<ExternalProviderAdapter>,
}

impl Seedream {
    pub fn new(adapter: &Arc<ExternalProviderAdapter>) -> Self {
        Self { adapter: Arc::clone(adapter) }
    }
}

#[async_trait]
impl ModelImplementation for Seedream {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let mut payload = json!({
            "prompt": ctx.request.prompt,
            "aspect_ratio": ctx.aspect_ratio_class().to_string(),
            "seed": ctx.request.seed,
        });
        if ctx.mode == Mode::ImageToImage {
            if let Some(image) = &ctx.image {
                payload["image"] = json!(encode_image_b64(image)?);
            }
        }
        let outputs = self
            .adapter
            .generate(Provider::Replicate, "seedream-4", payload, ctx.cancel_rx.clone())
            .await?;
        stage_provider_artifacts(ctx, MediaKind::Image, outputs);
        Ok(())
    }
}
