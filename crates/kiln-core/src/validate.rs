//! Declarative request validation.
//!
//! `validate` is a pure, side-effect-free gate: it runs before any pipeline
//! is loaded or any network call is made, so a rejected request never costs
//! accelerator memory or a billable provider job. Rules are applied in a
//! fixed order and each produces its own human-readable reason.

use tracing::debug;

use crate::error::ValidationError;
use crate::registry::{CapabilityDescriptor, DerivedInputs, Mode};
use crate::request::GenerationRequest;

/// Global sane bounds for numeric controls, independent of model.
pub mod bounds {
    pub const STEPS: (u32, u32) = (1, 150);
    pub const GUIDANCE: (f32, f32) = (0.0, 30.0);
    pub const STRENGTH: (f32, f32) = (0.0, 1.0);
    pub const FRAMES: (u32, u32) = (1, 481);
    pub const DIM: (u32, u32) = (64, 4096);
}

/// A request that passed every rule, paired with the capability mode the
/// registry selected for it.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub request: GenerationRequest,
    pub mode: Mode,
}

/// Derive the input shape from which optional fields are populated.
///
/// Total over every combination of {image, mask, video} presence: each maps
/// to exactly one shape or one defined invalid combination. The model
/// identifier plays no part in this.
pub fn derive_inputs(
    has_image: bool,
    has_mask: bool,
    has_video: bool,
) -> Result<DerivedInputs, ValidationError> {
    if has_mask && !has_image {
        if has_video {
            return Err(ValidationError::MaskWithVideo);
        }
        return Err(ValidationError::MaskWithoutImage);
    }
    if has_video {
        // A video input dominates; an accompanying image is first-frame
        // conditioning, handled by the model wrapper.
        return Ok(DerivedInputs::Video);
    }
    if has_image {
        if has_mask {
            return Ok(DerivedInputs::ImageAndMask);
        }
        return Ok(DerivedInputs::ImageOnly);
    }
    Ok(DerivedInputs::TextOnly)
}

/// Validate `request` against its model's capability descriptor.
///
/// The caller looks the descriptor up first; an identifier missing from the
/// registry is a routing defect and stays a [`crate::error::RouteError`]
/// rather than being dressed up as a user-facing rejection.
///
/// # Errors
///
/// [`ValidationError`] with a rule-specific reason.
pub fn validate(
    descriptor: &CapabilityDescriptor,
    request: GenerationRequest,
) -> Result<ValidatedRequest, ValidationError> {
    // Rule 1 + 2: mask pairing, then total input-shape derivation.
    let derived = derive_inputs(
        request.image.is_some(),
        request.mask.is_some(),
        request.video.is_some(),
    )?;

    if descriptor.family != request.family {
        return Err(ValidationError::WrongFamily {
            model: request.model,
            expected: descriptor.family,
            requested: request.family,
        });
    }

    // Rule 3: the derived shape must match exactly one supported mode.
    let mode = descriptor
        .modes
        .iter()
        .copied()
        .find(|m| m.required_inputs() == derived)
        .ok_or_else(|| ValidationError::UnsupportedMode {
            model: request.model,
            mode: derived_name(derived),
            supported: descriptor.supported_modes(),
        })?;

    // Rule 4: auxiliary references.
    if !request.references.is_empty() {
        if !descriptor.accepts_references {
            return Err(ValidationError::ReferencesNotAccepted {
                model: request.model,
            });
        }
        if request.references.len() > descriptor.max_references {
            return Err(ValidationError::TooManyReferences {
                model: request.model,
                max: descriptor.max_references,
                got: request.references.len(),
            });
        }
    }

    // Rule 5: global numeric bounds.
    check_range_u32("num_inference_steps", request.num_inference_steps, bounds::STEPS)?;
    check_range_f32("guidance_scale", request.guidance_scale, bounds::GUIDANCE)?;
    check_range_f32("strength", request.strength, bounds::STRENGTH)?;
    check_range_u32("num_frames", request.num_frames, bounds::FRAMES)?;
    check_range_u32("max_width", request.max_width, bounds::DIM)?;
    check_range_u32("max_height", request.max_height, bounds::DIM)?;
    if !matches!(request.target_precision, 4 | 8 | 16) {
        return Err(ValidationError::InvalidPrecision {
            got: request.target_precision,
        });
    }

    debug!(model = %request.model, %mode, "request validated");
    Ok(ValidatedRequest { request, mode })
}

fn derived_name(derived: DerivedInputs) -> &'static str {
    match derived {
        DerivedInputs::TextOnly => "text-only",
        DerivedInputs::ImageOnly => "image",
        DerivedInputs::ImageAndMask => "inpainting",
        DerivedInputs::Video => "video",
    }
}

fn check_range_u32(
    field: &'static str,
    value: u32,
    (min, max): (u32, u32),
) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    Ok(())
}

fn check_range_f32(
    field: &'static str,
    value: f32,
    (min, max): (f32, f32),
) -> Result<(), ValidationError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;
    use crate::registry::CapabilityRegistry;
    use crate::request::{Family, GenerationRequest, ModelId, Reference, ReferenceMode};

    fn registry() -> CapabilityRegistry {
        models::builtin_registry().expect("builtin table is consistent")
    }

    /// Validate against the builtin descriptor for the request's model.
    fn check(req: GenerationRequest) -> Result<ValidatedRequest, ValidationError> {
        let registry = registry();
        let descriptor = registry.describe(req.model).expect("model registered").clone();
        validate(&descriptor, req)
    }

    fn png_b64() -> String {
        // Validation only checks presence, not decodability.
        "aGVsbG8=".to_owned()
    }

    #[test]
    fn mask_without_image_is_rejected_first() {
        let mut req = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        req.mask = Some(png_b64());
        let err = check(req).unwrap_err();
        assert_eq!(err, ValidationError::MaskWithoutImage);
    }

    #[test]
    fn derivation_is_total() {
        use DerivedInputs::*;
        assert_eq!(derive_inputs(false, false, false).unwrap(), TextOnly);
        assert_eq!(derive_inputs(true, false, false).unwrap(), ImageOnly);
        assert_eq!(derive_inputs(true, true, false).unwrap(), ImageAndMask);
        assert_eq!(derive_inputs(false, false, true).unwrap(), Video);
        assert_eq!(derive_inputs(true, false, true).unwrap(), Video);
        assert_eq!(derive_inputs(true, true, true).unwrap(), Video);
        assert!(derive_inputs(false, true, false).is_err());
        assert!(derive_inputs(false, true, true).is_err());
    }

    #[test]
    fn text_only_selects_text_to_image_for_sd_xl() {
        let req = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        let validated = check(req).expect("should validate");
        assert_eq!(validated.mode, Mode::TextToImage);
    }

    #[test]
    fn image_only_selects_depth_for_depth_model() {
        let mut req = GenerationRequest::new(Family::Image, ModelId::DepthAnything2, "");
        req.image = Some(png_b64());
        let validated = check(req).expect("should validate");
        assert_eq!(validated.mode, Mode::Depth);
    }

    #[test]
    fn depth_model_rejects_inpainting_shape() {
        let mut req = GenerationRequest::new(Family::Image, ModelId::DepthAnything2, "");
        req.image = Some(png_b64());
        req.mask = Some(png_b64());
        let err = check(req).unwrap_err();
        match err {
            ValidationError::UnsupportedMode { model, mode, .. } => {
                assert_eq!(model, ModelId::DepthAnything2);
                assert_eq!(mode, "inpainting");
            }
            other => panic!("expected UnsupportedMode, got {other:?}"),
        }
    }

    #[test]
    fn external_gemini_rejects_inpainting_shape() {
        let mut req = GenerationRequest::new(Family::Image, ModelId::GoogleGemini2, "edit");
        req.image = Some(png_b64());
        req.mask = Some(png_b64());
        let err = check(req).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedMode { .. }));
    }

    #[test]
    fn references_rejected_when_model_disallows_them() {
        let mut req = GenerationRequest::new(Family::Image, ModelId::RealEsrganX4, "");
        req.image = Some(png_b64());
        req.references.push(Reference {
            mode: ReferenceMode::Style,
            image: png_b64(),
            scale: 0.5,
        });
        let err = check(req).unwrap_err();
        assert!(matches!(err, ValidationError::ReferencesNotAccepted { .. }));
    }

    #[test]
    fn reference_count_is_capped() {
        let mut req = GenerationRequest::new(Family::Image, ModelId::GoogleGemini2, "style mix");
        req.image = Some(png_b64());
        for _ in 0..8 {
            req.references.push(Reference {
                mode: ReferenceMode::Style,
                image: png_b64(),
                scale: 0.5,
            });
        }
        let err = check(req).unwrap_err();
        assert!(matches!(err, ValidationError::TooManyReferences { .. }));
    }

    #[test]
    fn strength_must_be_in_unit_interval() {
        let mut req = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        req.strength = 1.2;
        let err = check(req).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange { field: "strength", .. }
        ));
    }

    #[test]
    fn family_mismatch_is_rejected() {
        let req = GenerationRequest::new(Family::Video, ModelId::SdXl, "a red fox");
        let err = check(req).unwrap_err();
        assert!(matches!(err, ValidationError::WrongFamily { .. }));
    }

    /// The validator accepts exactly the input shapes the descriptor's
    /// supported-mode set covers — no request can reach the router with an
    /// unsupported mode.
    #[test]
    fn accepted_shapes_match_descriptor_modes_for_every_model() {
        let registry = registry();
        let shapes = [
            (false, false, false),
            (true, false, false),
            (true, true, false),
            (false, false, true),
        ];
        for model in registry.models() {
            let descriptor = registry.describe(model).unwrap().clone();
            for (has_image, has_mask, has_video) in shapes {
                let mut req = GenerationRequest::new(descriptor.family, model, "p");
                req.image = has_image.then(|| png_b64());
                req.mask = has_mask.then(|| png_b64());
                req.video = has_video.then(|| png_b64());
                let derived = derive_inputs(has_image, has_mask, has_video).unwrap();
                let supported = descriptor
                    .modes
                    .iter()
                    .any(|m| m.required_inputs() == derived);
                let result = validate(&descriptor, req);
                assert_eq!(
                    result.is_ok(),
                    supported,
                    "model {model} shape {derived:?}: validator and descriptor disagree"
                );
                if let Ok(validated) = result {
                    assert!(descriptor.modes.contains(&validated.mode));
                }
            }
        }
    }
}
