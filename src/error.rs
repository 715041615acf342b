//! Actionable typed errors for kerasjs.
//!
//! Each variant names the file or layer involved and what to do about it.
//! Internal propagation uses `anyhow`; the public API exposes these
//! `thiserror` types so callers can `downcast_ref` to react to a category.

use std::path::PathBuf;

/// Errors that kerasjs surfaces to the user.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Input model file does not exist.
    #[error("Model file not found at {}. Check the input path.", path.display())]
    ModelNotFound { path: PathBuf },

    /// Input exists but could not be decoded (zip, JSON or HDF5 problem).
    #[error("Failed to read Keras model at {}: {detail}", path.display())]
    ModelReadError { path: PathBuf, detail: String },

    /// The topology contains a layer TensorFlow.js cannot deserialize.
    #[error(
        "Layer '{layer}' has class '{class_name}', which TensorFlow.js layers does not support."
    )]
    UnsupportedLayer { layer: String, class_name: String },

    /// A weight could not be named or represented in the TensorFlow.js format.
    #[error("Weight '{name}' cannot be converted: {detail}")]
    UnsupportedWeight { name: String, detail: String },

    /// Failed to write an artifact file to the output directory.
    #[error("Failed to write {}: {detail}", path.display())]
    ArtifactWriteError { path: PathBuf, detail: String },

    /// Converter configuration is unusable.
    #[error("Invalid converter configuration: {detail}")]
    InvalidConfig { detail: String },
}
