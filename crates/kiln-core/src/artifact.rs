//! Output artifacts: the uniform result unit both execution paths produce.

use bytes::Bytes;
use strum::Display;

/// Media kind of one produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Backing data of an artifact: raw bytes, or a reference the (out-of-scope)
/// persistence layer can retrieve.
#[derive(Debug, Clone)]
pub enum ArtifactData {
    Bytes(Bytes),
    Reference(String),
}

impl ArtifactData {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ArtifactData::Bytes(b) => Some(b),
            ArtifactData::Reference(_) => None,
        }
    }
}

/// One produced result unit with a stable index.
#[derive(Debug, Clone)]
pub struct OutputArtifact {
    pub index: usize,
    pub kind: MediaKind,
    pub data: ArtifactData,
}
