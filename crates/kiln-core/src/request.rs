//! Inbound request types.
//!
//! A [`GenerationRequest`] arrives from the (out-of-scope) API layer already
//! authenticated and rate-limited; this module only defines its shape and
//! defaults. All binary payloads are base64 strings until the context builder
//! decodes them.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Operation family of a request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Family {
    Image,
    Video,
}

/// Every routable model identifier.
///
/// The serialized names match the queue task names of the deployment; adding
/// a variant here without registering a descriptor + implementation pair
/// fails the engine's startup consistency check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum ModelId {
    // Local image pipelines
    #[strum(serialize = "sd-xl")]
    #[serde(rename = "sd-xl")]
    SdXl,
    #[strum(serialize = "flux-1")]
    #[serde(rename = "flux-1")]
    Flux1,
    #[strum(serialize = "flux-2")]
    #[serde(rename = "flux-2")]
    Flux2,
    #[strum(serialize = "depth-anything-2")]
    #[serde(rename = "depth-anything-2")]
    DepthAnything2,
    #[strum(serialize = "sam-2")]
    #[serde(rename = "sam-2")]
    Sam2,
    #[strum(serialize = "real-esrgan-x4")]
    #[serde(rename = "real-esrgan-x4")]
    RealEsrganX4,
    // Local video pipelines
    #[strum(serialize = "ltx-video-2")]
    #[serde(rename = "ltx-video-2")]
    LtxVideo2,
    #[strum(serialize = "wan-2")]
    #[serde(rename = "wan-2")]
    Wan2,
    // External image providers
    #[strum(serialize = "gpt-image-1")]
    #[serde(rename = "gpt-image-1")]
    GptImage1,
    #[strum(serialize = "google-gemini-2")]
    #[serde(rename = "google-gemini-2")]
    GoogleGemini2,
    #[strum(serialize = "runway-gen-4")]
    #[serde(rename = "runway-gen-4")]
    RunwayGen4,
    #[strum(serialize = "topazlabs-upscale")]
    #[serde(rename = "topazlabs-upscale")]
    TopazlabsUpscale,
    #[strum(serialize = "seedream-4")]
    #[serde(rename = "seedream-4")]
    Seedream4,
    // External video providers
    #[strum(serialize = "runway-gen-4-video")]
    #[serde(rename = "runway-gen-4-video")]
    RunwayGen4Video,
    #[strum(serialize = "runway-upscale")]
    #[serde(rename = "runway-upscale")]
    RunwayUpscale,
}

/// How an auxiliary reference image conditions the generation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReferenceMode {
    Style,
    StylePlus,
    Face,
    Canny,
    Depth,
    Pose,
}

/// One auxiliary reference input: a base64 image tagged with its mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub mode: ReferenceMode,
    /// Base64 image payload.
    pub image: String,
    #[serde(default = "default_reference_scale")]
    pub scale: f32,
}

fn default_reference_scale() -> f32 {
    0.5
}

/// A validated-at-the-boundary generation request.
///
/// Binary payloads (`image`, `mask`, `video`) are transport-encoded base64
/// strings; geometry defaults mirror the deployment's schema defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub family: Family,
    pub model: ModelId,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,
    /// Optional base64 primary image.
    #[serde(default)]
    pub image: Option<String>,
    /// Optional base64 mask; only meaningful paired with `image`.
    #[serde(default)]
    pub mask: Option<String>,
    /// Optional base64 video payload.
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default = "default_steps")]
    pub num_inference_steps: u32,
    #[serde(default = "default_guidance")]
    pub guidance_scale: f32,
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_num_frames")]
    pub num_frames: u32,
    #[serde(default = "default_max_dim")]
    pub max_width: u32,
    #[serde(default = "default_max_dim")]
    pub max_height: u32,
    /// Global quantization target; applied selectively per pipeline.
    #[serde(default = "default_precision")]
    pub target_precision: u8,
}

fn default_prompt() -> String {
    "Detailed, 8k, photorealistic".to_owned()
}

fn default_negative_prompt() -> String {
    "worst quality, inconsistent motion, blurry, jittery, distorted".to_owned()
}

fn default_steps() -> u32 {
    25
}

fn default_guidance() -> f32 {
    5.0
}

fn default_strength() -> f32 {
    0.5
}

fn default_seed() -> u64 {
    42
}

fn default_num_frames() -> u32 {
    81
}

fn default_max_dim() -> u32 {
    2048
}

fn default_precision() -> u8 {
    8
}

impl GenerationRequest {
    /// Minimal request for `model` with every optional field at its default.
    pub fn new(family: Family, model: ModelId, prompt: impl Into<String>) -> Self {
        Self {
            family,
            model,
            prompt: prompt.into(),
            negative_prompt: default_negative_prompt(),
            image: None,
            mask: None,
            video: None,
            references: Vec::new(),
            num_inference_steps: default_steps(),
            guidance_scale: default_guidance(),
            strength: default_strength(),
            seed: default_seed(),
            num_frames: default_num_frames(),
            max_width: default_max_dim(),
            max_height: default_max_dim(),
            target_precision: default_precision(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_with_defaults() {
        let req: GenerationRequest = serde_json::from_str(
            r#"{ "family": "image", "model": "sd-xl", "prompt": "a red fox" }"#,
        )
        .expect("minimal request should parse");
        assert_eq!(req.model, ModelId::SdXl);
        assert_eq!(req.num_inference_steps, 25);
        assert_eq!(req.seed, 42);
        assert!(req.image.is_none());
        assert!(req.references.is_empty());
    }

    #[test]
    fn unknown_model_is_rejected_at_parse_time() {
        let err = serde_json::from_str::<GenerationRequest>(
            r#"{ "family": "image", "model": "not-a-model" }"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn model_id_roundtrips_through_display() {
        use std::str::FromStr;
        let id = ModelId::DepthAnything2;
        assert_eq!(id.to_string(), "depth-anything-2");
        assert_eq!(ModelId::from_str("depth-anything-2").unwrap(), id);
    }
}
