//! Gemini image wrapper, reached through the replicate-style gateway.

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

pub struct GoogleGemini {
    adapter: Arc<ExternalProviderAdapter>,
}

impl GoogleGemini {
    pub fn new(adapter: &Arc<ExternalProviderAdapter>) -> Self {
        Self { adapter: Arc::clone(adapter) }
    }
}

#[async_trait]
impl ModelImplementation for GoogleGemini {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let mut payload = json!({
            "prompt": ctx.request.prompt,
            "aspect_ratio": ctx.aspect_ratio_class().to_string(),
        });

        // Primary image first, then references, as one ordered list. The
        // provider takes references through the same slot in every mode, so
        // a text-to-image request with references still sends them.
        let mut image_input = Vec::new();
        if let Some(image) = &ctx.image {
            image_input.push(encode_image_b64(image)?);
        }
        for reference in &ctx.references {
            image_input.push(encode_image_b64(&reference.image)?);
        }
        if !image_input.is_empty() {
            payload["image_input"] = json!(image_input);
        }

        let outputs = self
            .adapter
            .generate(
                Provider::Replicate,
                "google-gemini-2",
                payload,
                ctx.cancel_rx.clone(),
            )
            .await?;
        stage_provider_artifacts(ctx, MediaKind::Image, outputs);
        Ok(())
    }
}
