//! Capability registry: static metadata per model identifier.
//!
//! The registry is assembled once at startup from the fixed descriptor table
//! and is immutable afterwards. It must stay in lock-step with the router's
//! dispatch table — every routable identifier has exactly one descriptor and
//! vice versa; [`crate::engine::EngineBuilder::build`] checks this 1:1
//! correspondence and refuses to start otherwise.

use std::collections::HashMap;

use strum::{Display, EnumString};

use crate::error::RouteError;
use crate::request::{Family, ModelId};

/// A concrete operation a model can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    TextToImage,
    ImageToImage,
    Inpainting,
    Upscale,
    Depth,
    Segmentation,
    TextToVideo,
    ImageToVideo,
    VideoToVideo,
    VideoUpscale,
}

/// The input shape a request presents, derived purely from which optional
/// fields are populated — never from the model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedInputs {
    TextOnly,
    ImageOnly,
    ImageAndMask,
    Video,
}

impl Mode {
    /// The input shape this mode consumes.
    ///
    /// Several modes are image-in/image-out specializations (upscale, depth,
    /// segmentation) and therefore share the `ImageOnly` shape with plain
    /// image-to-image; the capability descriptor decides which one a given
    /// model actually performs.
    pub fn required_inputs(self) -> DerivedInputs {
        match self {
            Mode::TextToImage | Mode::TextToVideo => DerivedInputs::TextOnly,
            Mode::ImageToImage
            | Mode::Upscale
            | Mode::Depth
            | Mode::Segmentation
            | Mode::ImageToVideo => DerivedInputs::ImageOnly,
            Mode::Inpainting => DerivedInputs::ImageAndMask,
            Mode::VideoToVideo | Mode::VideoUpscale => DerivedInputs::Video,
        }
    }

    /// The operation family this mode produces output for.
    pub fn family(self) -> Family {
        match self {
            Mode::TextToImage
            | Mode::ImageToImage
            | Mode::Inpainting
            | Mode::Upscale
            | Mode::Depth
            | Mode::Segmentation => Family::Image,
            Mode::TextToVideo | Mode::ImageToVideo | Mode::VideoToVideo | Mode::VideoUpscale => {
                Family::Video
            }
        }
    }
}

/// Third-party generation providers reachable through the provider gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    Replicate,
    Runway,
    OpenAi,
    Topazlabs,
}

/// Whether a model runs in-process on the accelerator or behind a network
/// call, plus the residency metadata local models declare up front.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Locality {
    Local {
        /// Approximate accelerator footprint class, in GiB.
        footprint_gib: f32,
    },
    External {
        provider: Provider,
    },
}

/// Static capability metadata for one model identifier.
///
/// Defined once at process start, immutable, looked up by model identifier.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub model: ModelId,
    pub family: Family,
    pub modes: &'static [Mode],
    pub accepts_references: bool,
    pub max_references: usize,
    pub locality: Locality,
    /// How many artifacts one invocation produces.
    pub output_arity: usize,
}

impl CapabilityDescriptor {
    pub fn is_local(&self) -> bool {
        matches!(self.locality, Locality::Local { .. })
    }

    /// Comma-separated supported-mode list for error messages.
    pub fn supported_modes(&self) -> String {
        self.modes
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Pure lookup table from model identifier to capability descriptor.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    table: HashMap<ModelId, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor, failing on duplicates.
    pub fn insert(&mut self, descriptor: CapabilityDescriptor) -> Result<(), RouteError> {
        let model = descriptor.model;
        if self.table.insert(model, descriptor).is_some() {
            return Err(RouteError::DuplicateModel { model });
        }
        Ok(())
    }

    /// Look up the descriptor for `model_id`.
    ///
    /// # Errors
    ///
    /// [`RouteError::UnknownModel`] when the identifier is not registered.
    /// Unknown identifiers are rejected at request-parse time, so hitting
    /// this is an internal registry inconsistency, not a user error.
    pub fn describe(&self, model_id: ModelId) -> Result<&CapabilityDescriptor, RouteError> {
        self.table
            .get(&model_id)
            .ok_or(RouteError::UnknownModel { model: model_id })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn models(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.table.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_input_shapes_are_total() {
        // Every mode maps to exactly one input shape and one family.
        for mode in [
            Mode::TextToImage,
            Mode::ImageToImage,
            Mode::Inpainting,
            Mode::Upscale,
            Mode::Depth,
            Mode::Segmentation,
            Mode::TextToVideo,
            Mode::ImageToVideo,
            Mode::VideoToVideo,
            Mode::VideoUpscale,
        ] {
            let _ = mode.required_inputs();
            let _ = mode.family();
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let descriptor = CapabilityDescriptor {
            model: ModelId::SdXl,
            family: Family::Image,
            modes: &[Mode::TextToImage],
            accepts_references: false,
            max_references: 0,
            locality: Locality::Local { footprint_gib: 11.0 },
            output_arity: 1,
        };
        let mut registry = CapabilityRegistry::new();
        registry.insert(descriptor.clone()).expect("first insert");
        let err = registry.insert(descriptor).unwrap_err();
        assert_eq!(err, RouteError::DuplicateModel { model: ModelId::SdXl });
    }

    #[test]
    fn describe_unknown_model_is_an_error() {
        let registry = CapabilityRegistry::new();
        let err = registry.describe(ModelId::Flux1).unwrap_err();
        assert_eq!(err, RouteError::UnknownModel { model: ModelId::Flux1 });
    }
}
