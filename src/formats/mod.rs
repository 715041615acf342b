//! Model format traits and concrete formats.
//!
//! A format reads its native on-disk layout into a
//! [`CanonicalModel`](crate::model::CanonicalModel) ([`ModelSource`]) and/or
//! writes one back out ([`ModelSink`]). The Keras archive is read-only; the
//! TensorFlow.js layers format implements both so converted artifacts can be
//! loaded back.

pub mod keras;
pub mod tfjs;

use std::path::{Path, PathBuf};

use crate::config::QuantizationDtype;
use crate::model::CanonicalModel;

/// Options controlling how a model is written.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Maximum bytes per weight shard file.
    pub shard_size_bytes: usize,
    /// Quantize float32 weights to this integer type.
    pub quantization: Option<QuantizationDtype>,
    /// Stored as `userDefinedMetadata`.
    pub metadata: Option<serde_json::Value>,
}

/// Describes the files produced by a successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenArtifacts {
    /// The topology/manifest file.
    pub model_json: PathBuf,
    /// Weight shard files in manifest order.
    pub shards: Vec<PathBuf>,
    /// Number of weights in the manifest.
    pub weight_count: usize,
    /// Total bytes across all shards.
    pub weight_bytes: usize,
    /// Stale shard files from an earlier run that were removed.
    pub removed: Vec<PathBuf>,
}

impl WrittenArtifacts {
    /// Every file written, `model.json` first.
    pub fn paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.model_json.clone())
            .chain(self.shards.iter().cloned())
            .collect()
    }
}

/// A format that can be read into the canonical model.
pub trait ModelSource {
    /// Human-readable name (e.g. `"Keras archive"`).
    fn name(&self) -> &str;

    /// Short slug used in logs (e.g. `"keras"`).
    fn slug(&self) -> &str;

    /// Read a model from `path` (a file or directory, format-dependent).
    fn read_model(&self, path: &Path) -> anyhow::Result<CanonicalModel>;
}

/// A format that can persist the canonical model.
pub trait ModelSink {
    fn name(&self) -> &str;

    fn slug(&self) -> &str;

    /// Write `model` into `dir`, creating it if needed.
    fn write_model(
        &self,
        model: &CanonicalModel,
        dir: &Path,
        opts: &WriteOptions,
    ) -> anyhow::Result<WrittenArtifacts>;
}
