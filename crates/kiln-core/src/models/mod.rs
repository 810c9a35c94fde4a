//! Model wrappers: one leaf module per model family, plus the fixed
//! capability table they are registered from.
//!
//! Local wrappers translate the working context into a [`PipelineJob`],
//! execute it through the residency cache, and stage native outputs.
//! External wrappers build a normalized provider payload and drive it
//! through the provider gateway. Neither path leaks its mechanics to the
//! other; both only ever touch the context's staging surface.

mod depth_anything;
mod flux;
mod google_gemini;
mod ltx_video;
mod openai;
mod real_esrgan;
mod runway;
mod sam;
mod sd_xl;
mod seedream;
mod topazlabs;
mod wan;

use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use image::DynamicImage;
use tracing::info;

use crate::artifact::MediaKind;
use crate::context::WorkingContext;
use crate::error::{GenerationError, InferenceError, MediaError, ResidencyError, RouteError};
use crate::pipeline::{LoaderSet, PipelineJob, PipelineKey, PipelineOutput};
use crate::provider::{ExternalProviderAdapter, ProviderArtifact};
use crate::registry::{CapabilityDescriptor, CapabilityRegistry, Locality, Mode, Provider};
use crate::request::{Family, ModelId};
use crate::residency::{PipelineCache, ResidencyRunError};
use crate::router::ModelRouter;

/// The fixed capability table: one descriptor per routable model.
pub fn descriptors() -> Vec<CapabilityDescriptor> {
    use Mode::*;
    vec![
        // Local image pipelines
        CapabilityDescriptor {
            model: ModelId::SdXl,
            family: Family::Image,
            modes: &[TextToImage, ImageToImage, Inpainting],
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 11.0 },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::Flux1,
            family: Family::Image,
            modes: &[TextToImage, ImageToImage],
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 17.0 },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::Flux2,
            family: Family::Image,
            modes: &[TextToImage, ImageToImage],
            accepts_references: true,
            max_references: 4,
            locality: Locality::Local { footprint_gib: 21.0 },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::DepthAnything2,
            family: Family::Image,
            modes: &[Depth],
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 2.5 },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::Sam2,
            family: Family::Image,
            modes: &[Segmentation],
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 3.0 },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::RealEsrganX4,
            family: Family::Image,
            modes: &[Upscale],
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 1.5 },
            output_arity: 1,
        },
        // Local video pipelines
        CapabilityDescriptor {
            model: ModelId::LtxVideo2,
            family: Family::Video,
            modes: &[TextToVideo, ImageToVideo],
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 19.0 },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::Wan2,
            family: Family::Video,
            modes: &[TextToVideo, ImageToVideo],
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 22.0 },
            output_arity: 1,
        },
        // External image providers
        CapabilityDescriptor {
            model: ModelId::GptImage1,
            family: Family::Image,
            modes: &[TextToImage, ImageToImage],
            accepts_references: false,
            max_references: 0,
            locality: Locality::External { provider: Provider::OpenAi },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::GoogleGemini2,
            family: Family::Image,
            modes: &[TextToImage, ImageToImage],
            accepts_references: true,
            max_references: 6,
            locality: Locality::External { provider: Provider::Replicate },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::RunwayGen4,
            family: Family::Image,
            modes: &[TextToImage, ImageToImage],
            accepts_references: true,
            max_references: 3,
            locality: Locality::External { provider: Provider::Runway },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::TopazlabsUpscale,
            family: Family::Image,
            modes: &[Upscale],
            accepts_references: false,
            max_references: 0,
            locality: Locality::External { provider: Provider::Topazlabs },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::Seedream4,
            family: Family::Image,
            modes: &[TextToImage, ImageToImage],
            accepts_references: false,
            max_references: 0,
            locality: Locality::External { provider: Provider::Replicate },
            output_arity: 1,
        },
        // External video providers
        CapabilityDescriptor {
            model: ModelId::RunwayGen4Video,
            family: Family::Video,
            modes: &[ImageToVideo],
            accepts_references: false,
            max_references: 0,
            locality: Locality::External { provider: Provider::Runway },
            output_arity: 1,
        },
        CapabilityDescriptor {
            model: ModelId::RunwayUpscale,
            family: Family::Video,
            modes: &[VideoUpscale],
            accepts_references: false,
            max_references: 0,
            locality: Locality::External { provider: Provider::Runway },
            output_arity: 1,
        },
    ]
}

/// Assemble the capability registry from the fixed descriptor table.
pub fn builtin_registry() -> Result<CapabilityRegistry, RouteError> {
    let mut registry = CapabilityRegistry::new();
    for descriptor in descriptors() {
        registry.insert(descriptor)?;
    }
    Ok(registry)
}

/// Register the builtin implementation for every table entry.
pub fn install(
    router: &mut ModelRouter,
    executor: &Arc<LocalExecutor>,
    adapter: &Arc<ExternalProviderAdapter>,
) -> Result<(), RouteError> {
    router.insert(ModelId::SdXl, Arc::new(sd_xl::SdXl::new(executor)))?;
    router.insert(ModelId::Flux1, Arc::new(flux::Flux::new(executor, ModelId::Flux1)))?;
    router.insert(ModelId::Flux2, Arc::new(flux::Flux::new(executor, ModelId::Flux2)))?;
    router.insert(
        ModelId::DepthAnything2,
        Arc::new(depth_anything::DepthAnything::new(executor)),
    )?;
    router.insert(ModelId::Sam2, Arc::new(sam::Sam::new(executor)))?;
    router.insert(
        ModelId::RealEsrganX4,
        Arc::new(real_esrgan::RealEsrgan::new(executor)),
    )?;
    router.insert(ModelId::LtxVideo2, Arc::new(ltx_video::LtxVideo::new(executor)))?;
    router.insert(ModelId::Wan2, Arc::new(wan::Wan::new(executor)))?;
    router.insert(ModelId::GptImage1, Arc::new(openai::GptImage::new(adapter)))?;
    router.insert(
        ModelId::GoogleGemini2,
        Arc::new(google_gemini::GoogleGemini::new(adapter)),
    )?;
    router.insert(ModelId::RunwayGen4, Arc::new(runway::RunwayImage::new(adapter)))?;
    router.insert(
        ModelId::TopazlabsUpscale,
        Arc::new(topazlabs::TopazUpscale::new(adapter)),
    )?;
    router.insert(ModelId::Seedream4, Arc::new(seedream::Seedream::new(adapter)))?;
    router.insert(
        ModelId::RunwayGen4Video,
        Arc::new(runway::RunwayVideo::new(adapter)),
    )?;
    router.insert(
        ModelId::RunwayUpscale,
        Arc::new(runway::RunwayVideoUpscale::new(adapter)),
    )?;
    Ok(())
}

// ── Local execution ──────────────────────────────────────────────────────────

/// Shared execution path for local wrappers: resolve the loader, run the job
/// on a blocking thread under the residency cache, attribute failures.
pub struct LocalExecutor {
    cache: Arc<PipelineCache>,
    loaders: LoaderSet,
}

impl LocalExecutor {
    pub fn new(cache: Arc<PipelineCache>, loaders: LoaderSet) -> Self {
        Self { cache, loaders }
    }

    pub fn cache(&self) -> &Arc<PipelineCache> {
        &self.cache
    }

    /// Execute `job` on the pipeline for `model`, releasing accelerator
    /// memory on every exit path.
    pub async fn run(
        &self,
        model: ModelId,
        precision: u8,
        job: PipelineJob,
    ) -> Result<Vec<PipelineOutput>, GenerationError> {
        let key = PipelineKey { model, precision };
        let loader = self.loaders.get(model).ok_or(ResidencyError::LoadFailed {
            key: key.to_string(),
            source: anyhow::anyhow!("no loader registered for '{model}'"),
        })?;

        let mode = job.mode;
        let cache = Arc::clone(&self.cache);
        info!(%key, %mode, "running local pipeline");
        let outputs = tokio::task::spawn_blocking(move || {
            cache.run_resident(&key, &loader, |pipeline| pipeline.run(&job))
        })
        .await
        .map_err(|join| InferenceError {
            model,
            mode,
            source: anyhow::anyhow!("pipeline task panicked: {join}"),
        })?
        .map_err(|e| match e {
            ResidencyRunError::Residency(r) => GenerationError::from(r),
            ResidencyRunError::Pipeline(source) => {
                GenerationError::from(InferenceError { model, mode, source })
            }
        })?;
        Ok(outputs)
    }
}

/// Build a pipeline job from the context's current state; wrappers then
/// override the model-specific parameters.
pub(crate) fn base_job(ctx: &WorkingContext) -> PipelineJob {
    PipelineJob {
        mode: ctx.mode,
        prompt: ctx.request.prompt.clone(),
        negative_prompt: ctx.request.negative_prompt.clone(),
        width: ctx.width,
        height: ctx.height,
        steps: ctx.request.num_inference_steps,
        guidance: ctx.request.guidance_scale,
        strength: ctx.request.strength,
        seed: ctx.request.seed,
        frames: None,
        flow_shift: None,
        image: ctx.image.clone(),
        mask: ctx.mask.clone(),
        video: ctx.video.clone(),
        references: ctx.references.iter().map(|r| r.image.clone()).collect(),
    }
}

/// Stage native pipeline outputs on the context in production order.
pub(crate) fn stage_outputs(
    ctx: &mut WorkingContext,
    outputs: Vec<PipelineOutput>,
) -> Result<(), MediaError> {
    for output in outputs {
        match output {
            PipelineOutput::Image(image) => {
                ctx.save_image(&image)?;
            }
            PipelineOutput::Video(bytes) => {
                ctx.save_bytes(MediaKind::Video, bytes);
            }
        }
    }
    Ok(())
}

// ── External helpers ─────────────────────────────────────────────────────────

/// Stage provider artifacts: URLs stay fetchable references, inline payloads
/// become bytes.
pub(crate) fn stage_provider_artifacts(
    ctx: &mut WorkingContext,
    kind: MediaKind,
    artifacts: Vec<ProviderArtifact>,
) {
    for artifact in artifacts {
        match artifact {
            ProviderArtifact::Url(url) => {
                ctx.save_reference(kind, url);
            }
            ProviderArtifact::Inline(bytes) => {
                ctx.save_bytes(kind, bytes);
            }
        }
    }
}

/// PNG-encode a decoded image back to base64 for a provider payload.
pub(crate) fn encode_image_b64(image: &DynamicImage) -> Result<String, MediaError> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| MediaError::Encode { index: 0, source: e.into() })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
}

/// Base64 video payload for a provider payload.
pub(crate) fn encode_video_b64(video: &Bytes) -> String {
    base64::engine::general_purpose::STANDARD.encode(video)
}
