//! Working context: the uniform in-memory object one request executes with.
//!
//! Built from a validated request by decoding transport-encoded media,
//! computing the derived geometry several model wrappers use to pick sizing
//! parameters, and exposing the append-only output-staging surface. A context
//! is owned by exactly one request's execution and is consumed via
//! [`WorkingContext::into_artifacts`] when it completes.

use base64::Engine as _;
use bytes::Bytes;
use image::{DynamicImage, GrayImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use strum::Display;
use tokio::sync::watch;
use tracing::info;

use crate::artifact::{ArtifactData, MediaKind, OutputArtifact};
use crate::error::MediaError;
use crate::registry::{DerivedInputs, Mode};
use crate::request::{GenerationRequest, ReferenceMode};
use crate::validate::ValidatedRequest;

/// Landscape/portrait/square classification of the working geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DimensionClass {
    Landscape,
    Portrait,
    Square,
}

/// Normalized aspect ratio vocabulary for the provider boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AspectRatioClass {
    #[strum(serialize = "1:1")]
    Square,
    #[strum(serialize = "16:9")]
    Wide,
    #[strum(serialize = "9:16")]
    Tall,
}

/// Coarse resolution classification used for model-specific tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum ResolutionClass {
    #[strum(serialize = "480p")]
    Sd480,
    #[strum(serialize = "720p")]
    Hd720,
    #[strum(serialize = "1080p")]
    Fhd1080,
}

/// One decoded auxiliary reference.
#[derive(Debug, Clone)]
pub struct DecodedReference {
    pub mode: ReferenceMode,
    pub image: DynamicImage,
    pub scale: f32,
}

#[derive(Debug)]
pub struct WorkingContext {
    pub request: GenerationRequest,
    pub mode: Mode,
    pub width: u32,
    pub height: u32,
    pub image: Option<DynamicImage>,
    pub mask: Option<GrayImage>,
    /// Opaque video payload; frame decoding is an external collaborator.
    pub video: Option<Bytes>,
    pub references: Vec<DecodedReference>,
    /// Set by the engine when the caller wants cooperative cancellation.
    pub cancel_rx: Option<watch::Receiver<bool>>,
    outputs: Vec<OutputArtifact>,
}

impl WorkingContext {
    /// Build a context from a validated request.
    ///
    /// # Errors
    ///
    /// [`MediaError::Decode`] when a declared payload cannot be decoded, and
    /// [`MediaError::EmptyInput`] when the selected mode requires a primary
    /// input that is unusable after decode.
    pub fn build(validated: ValidatedRequest) -> Result<Self, MediaError> {
        let ValidatedRequest { request, mode } = validated;

        let mut width = request.max_width;
        let mut height = request.max_height;

        let image = match request.image.as_deref() {
            Some(payload) => Some(decode_image("image", payload)?),
            None => None,
        };
        let image = image.map(|img| clamp_to_max(img, request.max_width, request.max_height));
        if let Some(img) = &image {
            width = img.width();
            height = img.height();
        }

        let mask = match request.mask.as_deref() {
            Some(payload) => {
                let decoded = decode_image("mask", payload)?;
                let luma = decoded.to_luma8();
                Some(resize_gray(&luma, width, height))
            }
            None => None,
        };

        let video = match request.video.as_deref() {
            Some(payload) => Some(Bytes::from(decode_base64("video", payload)?)),
            None => None,
        };

        let mut references = Vec::with_capacity(request.references.len());
        for reference in &request.references {
            references.push(DecodedReference {
                mode: reference.mode,
                image: decode_image("reference", &reference.image)?,
                scale: reference.scale,
            });
        }

        let ctx = Self {
            request,
            mode,
            width,
            height,
            image,
            mask,
            video,
            references,
            cancel_rx: None,
            outputs: Vec::new(),
        };
        ctx.check_required_inputs()?;

        info!(
            model = %ctx.request.model,
            mode = %ctx.mode,
            width = ctx.width,
            height = ctx.height,
            "context created"
        );
        Ok(ctx)
    }

    fn check_required_inputs(&self) -> Result<(), MediaError> {
        match self.mode.required_inputs() {
            DerivedInputs::TextOnly => Ok(()),
            DerivedInputs::ImageOnly => self
                .image
                .as_ref()
                .map(|_| ())
                .ok_or(MediaError::EmptyInput { mode: self.mode, kind: "image" }),
            DerivedInputs::ImageAndMask => {
                if self.image.is_none() {
                    return Err(MediaError::EmptyInput { mode: self.mode, kind: "image" });
                }
                self.mask
                    .as_ref()
                    .map(|_| ())
                    .ok_or(MediaError::EmptyInput { mode: self.mode, kind: "mask" })
            }
            DerivedInputs::Video => match &self.video {
                Some(bytes) if !bytes.is_empty() => Ok(()),
                _ => Err(MediaError::EmptyInput { mode: self.mode, kind: "video" }),
            },
        }
    }

    /// Round the working geometry down to a multiple of `divisor`, cropping
    /// the decoded image and mask to match.
    pub fn ensure_divisible(&mut self, divisor: u32) {
        debug_assert!(divisor > 0);
        let width = (self.width / divisor) * divisor;
        let height = (self.height / divisor) * divisor;
        if width == self.width && height == self.height {
            return;
        }
        self.width = width.max(divisor);
        self.height = height.max(divisor);
        if let Some(img) = self.image.take() {
            self.image = Some(img.crop_imm(0, 0, self.width, self.height));
        }
        if let Some(mask) = self.mask.take() {
            self.mask = Some(resize_gray(&mask, self.width, self.height));
        }
    }

    /// Round a frame count down to `divisor * k + 1` (video transformers
    /// require this frame layout).
    pub fn ensure_frames_divisible(&self, frames: u32, divisor: u32) -> u32 {
        ((frames.saturating_sub(1)) / divisor) * divisor + 1
    }

    pub fn dimension_class(&self) -> DimensionClass {
        if self.width > self.height {
            DimensionClass::Landscape
        } else if self.width < self.height {
            DimensionClass::Portrait
        } else {
            DimensionClass::Square
        }
    }

    /// Aspect-ratio vocabulary used at the provider boundary.
    pub fn aspect_ratio_class(&self) -> AspectRatioClass {
        match self.dimension_class() {
            DimensionClass::Landscape => AspectRatioClass::Wide,
            DimensionClass::Portrait => AspectRatioClass::Tall,
            DimensionClass::Square => AspectRatioClass::Square,
        }
    }

    pub fn megapixels(&self) -> f32 {
        (self.width as f32 * self.height as f32) / 1_000_000.0
    }

    /// Whole-second duration of the requested clip, never less than one.
    pub fn duration_seconds(&self, fps: u32) -> u32 {
        (self.request.num_frames / fps.max(1)).max(1)
    }

    pub fn resolution_class(&self) -> ResolutionClass {
        // Slight tolerance so a crop landing a few pixels under a threshold
        // still counts as the class above it.
        const OFFSET: u32 = 100;
        let pixels = self.width * self.height;
        if pixels + OFFSET >= 1920 * 1080 {
            ResolutionClass::Fhd1080
        } else if pixels + OFFSET >= 1280 * 720 {
            ResolutionClass::Hd720
        } else {
            ResolutionClass::Sd480
        }
    }

    /// Deterministic generator constructed from the seed field alone, so
    /// repeated calls with the same seed are reproducible.
    pub fn generator(&self) -> StdRng {
        StdRng::seed_from_u64(self.request.seed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_rx
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    // ── Output staging ───────────────────────────────────────────────────────

    /// Stage a produced image, returning its stable index.
    pub fn save_image(&mut self, image: &DynamicImage) -> Result<usize, MediaError> {
        let index = self.outputs.len();
        let mut buf = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| MediaError::Encode { index, source: e.into() })?;
        self.outputs.push(OutputArtifact {
            index,
            kind: MediaKind::Image,
            data: ArtifactData::Bytes(Bytes::from(buf.into_inner())),
        });
        info!(index, "image artifact staged");
        Ok(index)
    }

    /// Stage pre-encoded artifact bytes (e.g. fetched from a provider URL).
    pub fn save_bytes(&mut self, kind: MediaKind, bytes: Bytes) -> usize {
        let index = self.outputs.len();
        self.outputs.push(OutputArtifact {
            index,
            kind,
            data: ArtifactData::Bytes(bytes),
        });
        info!(index, %kind, "artifact staged");
        index
    }

    /// Stage a fetchable reference without retrieving it.
    pub fn save_reference(&mut self, kind: MediaKind, url: String) -> usize {
        let index = self.outputs.len();
        self.outputs.push(OutputArtifact {
            index,
            kind,
            data: ArtifactData::Reference(url),
        });
        info!(index, %kind, "artifact reference staged");
        index
    }

    pub fn artifact_count(&self) -> usize {
        self.outputs.len()
    }

    /// Consume the context, yielding the staged artifacts in index order.
    pub fn into_artifacts(self) -> Vec<OutputArtifact> {
        self.outputs
    }
}

// ── Decode helpers ───────────────────────────────────────────────────────────

fn decode_base64(field: &'static str, payload: &str) -> Result<Vec<u8>, MediaError> {
    // Providers and clients wrap base64 payloads; strip whitespace first.
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| MediaError::Decode { field, source: e.into() })
}

fn decode_image(field: &'static str, payload: &str) -> Result<DynamicImage, MediaError> {
    let bytes = decode_base64(field, payload)?;
    image::load_from_memory(&bytes).map_err(|e| MediaError::Decode { field, source: e.into() })
}

/// Scale an image down (preserving aspect ratio) so it fits the maximums.
fn clamp_to_max(image: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if image.width() <= max_width && image.height() <= max_height {
        return image;
    }
    image.resize(max_width, max_height, image::imageops::FilterType::Lanczos3)
}

fn resize_gray(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.width() == width && mask.height() == height {
        return mask.clone();
    }
    image::imageops::resize(mask, width, height, image::imageops::FilterType::Triangle)
}
