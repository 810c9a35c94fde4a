//! The opaque local-pipeline boundary.
//!
//! The core treats every local model as an opaque callable with a declared
//! capability profile: a loader builds a [`LoadedPipeline`] (handle plus
//! footprint metadata), the residency cache owns placement, and wrappers
//! translate the working context into a [`PipelineJob`]. Nothing here knows
//! any model's mathematics.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, GrayImage};

use crate::registry::Mode;
use crate::request::ModelId;

/// Cache key for a loaded local pipeline: model identifier plus the
/// precision/quantization variant it was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub model: ModelId,
    pub precision: u8,
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}bit", self.model, self.precision)
    }
}

/// Normalized inference parameters a wrapper hands to its pipeline.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub mode: Mode,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub strength: f32,
    pub seed: u64,
    pub frames: Option<u32>,
    /// Scheduler flow shift, used by the video transformers.
    pub flow_shift: Option<f32>,
    pub image: Option<DynamicImage>,
    pub mask: Option<GrayImage>,
    pub video: Option<Bytes>,
    pub references: Vec<DynamicImage>,
}

/// One native media object produced by a pipeline run.
pub enum PipelineOutput {
    Image(DynamicImage),
    Video(Bytes),
}

/// A loaded local model handle.
///
/// The cache never inspects the handle beyond the metadata carried here.
pub trait Pipeline: Send + Sync {
    fn run(&self, job: &PipelineJob) -> anyhow::Result<Vec<PipelineOutput>>;
}

/// A freshly constructed pipeline plus its declared residency metadata.
pub struct LoadedPipeline {
    pub handle: Arc<dyn Pipeline>,
    /// Approximate accelerator footprint, in GiB.
    pub footprint_gib: f32,
}

/// The loader contract: `(key) -> handle`, supplied per model, opaque to the
/// cache. The key carries the precision variant so loaders can quantize
/// accordingly.
pub type PipelineLoader =
    Arc<dyn Fn(&PipelineKey) -> anyhow::Result<LoadedPipeline> + Send + Sync>;

/// Caller-supplied loader table, one entry per local model.
#[derive(Default, Clone)]
pub struct LoaderSet {
    loaders: HashMap<ModelId, PipelineLoader>,
}

impl LoaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        model: ModelId,
        loader: impl Fn(&PipelineKey) -> anyhow::Result<LoadedPipeline> + Send + Sync + 'static,
    ) {
        self.loaders.insert(model, Arc::new(loader));
    }

    pub fn get(&self, model: ModelId) -> Option<PipelineLoader> {
        self.loaders.get(&model).cloned()
    }
}

impl fmt::Debug for LoaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderSet")
            .field("models", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}
