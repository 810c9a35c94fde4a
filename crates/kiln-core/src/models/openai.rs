//! GPT image wrapper.
//!
//! The provider takes fixed size buckets rather than a free geometry, and
//! returns artifacts inline as base64 rather than by URL.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{encode_image_b64, stage_provider_artifacts};
use crate::artifact::MediaKind;
use crate::context::{AspectRatioClass, WorkingContext};
use crate::error::GenerationError;
use crate::provider::ExternalProviderAdapter;
use crate::registry::{Mode, Provider};
use crate::router::ModelImplementation;

pub struct GptImage {
    adapter: Arc<ExternalProviderAdapter>,
}

impl GptImage {
    pub fn new(adapter: &Arc<ExternalProviderAdapter>) -> Self {
        Self { adapter: Arc::clone(adapter) }
    }

    fn size_bucket(ctx: &WorkingContext) -> &'static str {
        match ctx.aspect_ratio_class() {
            AspectRatioClass::Square => "1024x1024",
            AspectRatioClass::Wide => "1536x1024",
            AspectRatioClass::Tall => "1024x1536",
        }
    }
}

#[async_trait]
impl ModelImplementation for GptImage {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let mut payload = json!({
            "prompt": ctx.request.prompt,
            "size": Self::size_bucket(ctx),
        });
        if ctx.mode == Mode::ImageToImage {
            if let Some(image) = &ctx.image {
                payload["image"] = json!(encode_image_b64(image)?);
            }
        }
        let outputs = self
            .adapter
            .generate(Provider::OpenAi, "gpt-image-1", payload, ctx.cancel_rx.clone())
            .await?;
        stage_provider_artifacts(ctx, MediaKind::Image, outputs);
        Ok(())
    }
}
