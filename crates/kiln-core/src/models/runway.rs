//! Runway wrappers: Gen-4 image, Gen-4 video, and video upscale.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{encode_image_b64, encode_video_b64, stage_provider_artifacts};
use crate::artifact::MediaKind;
use crate::context::WorkingContext;
use crate::error::GenerationError;
use crate::provider::{ExternalProviderAdapter, ProviderArtifact};
use crate::registry::{Mode, Provider};
use crate::router::ModelImplementation;

/// Gen-4 clips are billed in 5s or 10s blocks; anything in between rounds up.
const SHORT_CLIP_SECS: u32 = 5;
const LONG_CLIP_SECS: u32 = 10;
const CLIP_FPS: u32 = 24;

pub struct RunwayImage {
    adapter: Arc<ExternalProviderAdapter>,
}

impl RunwayImage {
    pub fn new(adapter: &Arc<ExternalProviderAdapter>) -> Self {
        Self { adapter: Arc::clone(adapter) }
    }
}

#[async_trait]
impl ModelImplementation for RunwayImage {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let mut payload = json!({
            "promptText": ctx.request.prompt,
            "ratio": ctx.aspect_ratio_class().to_string(),
            "seed": ctx.request.seed,
        });

        let mut reference_images = Vec::new();
        if ctx.mode == Mode::ImageToImage {
            if let Some(image) = &ctx.image {
                reference_images.push(json!({ "image": encode_image_b64(image)? }));
            }
        }
        for reference in &ctx.references {
            reference_images.push(json!({
                "image": encode_image_b64(&reference.image)?,
                "tag": reference.mode.to_string(),
            }));
        }
        if !reference_images.is_empty() {
            payload["referenceImages"] = json!(reference_images);
        }

        let outputs = self
            .adapter
            .generate(Provider::Runway, "gen-4", payload, ctx.cancel_rx.clone())
            .await?;
        stage_provider_artifacts(ctx, MediaKind::Image, outputs);
        Ok(())
    }
}

pub struct RunwayVideo {
    adapter: Arc<ExternalProviderAdapter>,
}

impl RunwayVideo {
    pub fn new(adapter: &Arc<ExternalProviderAdapter>) -> Self {
        Self { adapter: Arc::clone(adapter) }
    }

    fn clip_seconds(ctx: &WorkingContext) -> u32 {
        if ctx.duration_seconds(CLIP_FPS) <= SHORT_CLIP_SECS {
            SHORT_CLIP_SECS
        } else {
            LONG_CLIP_SECS
        }
    }
}

#[async_trait]
impl ModelImplementation for RunwayVideo {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let image = match &ctx.image {
            Some(image) => encode_image_b64(image)?,
            // Validation guarantees image-to-video shape; unreachable in
            // practice but the wrapper stays total.
            None => String::new(),
        };
        let payload = json!({
            "promptText": ctx.request.prompt,
            "promptImage": image,
            "ratio": ctx.aspect_ratio_class().to_string(),
            "seed": ctx.request.seed,
            "duration": Self::clip_seconds(ctx),
        });
        let outputs = self
            .adapter
            .generate(Provider::Runway, "gen-4-video", payload, ctx.cancel_rx.clone())
            .await?;
        stage_provider_artifacts(ctx, MediaKind::Video, outputs);
        Ok(())
    }
}

pub struct RunwayVideoUpscale {
    adapter: Arc<ExternalProviderAdapter>,
}

impl RunwayVideoUpscale {
    pub fn new(adapter: &Arc<ExternalProviderAdapter>) -> Self {
        Self { adapter: Arc::clone(adapter) }
    }
}

#[async_trait]
impl ModelImplementation for RunwayVideoUpscale {
    async fn invoke(&self, ctx: &mut WorkingContext) -> Result<(), GenerationError> {
        let video = match &ctx.video {
            Some(video) => encode_video_b64(video),
            None => String::new(),
        };
        let payload = json!({ "video": video });
        let outputs = self
            .adapter
            .generate(Provider::Runway, "video-upscale", payload, ctx.cancel_rx.clone())
            .await?;

        // Upscaled clips are large and their URLs short-lived; fetch the
        // bytes now instead of staging a reference.
        for artifact in outputs {
            match artifact {
                ProviderArtifact::Url(url) => {
                    let bytes = self.adapter.fetch(Provider::Runway, &url).await?;
                    ctx.save_bytes(MediaKind::Video, bytes);
                }
                ProviderArtifact::Inline(bytes) => {
                    ctx.save_bytes(MediaKind::Video, bytes);
                }
            }
        }
        Ok(())
    }
}
