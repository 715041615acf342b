//! Converter configuration.
//!
//! Defaults reproduce the fixed paths the converter has always used:
//! `asl_model.keras` in, `./public/tfjs_model` out.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;

/// Default input archive.
pub const DEFAULT_INPUT: &str = "asl_model.keras";

/// Default artifact directory.
pub const DEFAULT_OUTPUT_DIR: &str = "./public/tfjs_model";

/// Default shard size used by the TensorFlow.js converter (4 MiB).
pub const DEFAULT_SHARD_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// Target integer type for affine weight quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationDtype {
    Uint8,
    Uint16,
}

impl QuantizationDtype {
    /// Name used in the weights manifest.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantizationDtype::Uint8 => "uint8",
            QuantizationDtype::Uint16 => "uint16",
        }
    }

    /// Largest representable quantized value.
    pub fn max_value(&self) -> u32 {
        match self {
            QuantizationDtype::Uint8 => u8::MAX as u32,
            QuantizationDtype::Uint16 => u16::MAX as u32,
        }
    }

    /// Bytes per quantized element.
    pub fn element_size(&self) -> usize {
        match self {
            QuantizationDtype::Uint8 => 1,
            QuantizationDtype::Uint16 => 2,
        }
    }
}

/// Everything the conversion run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct ConverterConfig {
    /// Path of the `.keras` archive to load.
    pub input: PathBuf,
    /// Directory receiving `model.json` and the weight shards.
    pub output_dir: PathBuf,
    /// Maximum size of one weight shard file.
    pub weight_shard_size_bytes: usize,
    /// Quantize float32 weights to this integer type.
    pub quantization: Option<QuantizationDtype>,
    /// Stored verbatim as `userDefinedMetadata` in `model.json`.
    pub metadata: Option<serde_json::Value>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            weight_shard_size_bytes: DEFAULT_SHARD_SIZE_BYTES,
            quantization: None,
            metadata: None,
        }
    }
}

impl ConverterConfig {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_shard_size(mut self, bytes: usize) -> Self {
        self.weight_shard_size_bytes = bytes;
        self
    }

    pub fn with_quantization(mut self, dtype: QuantizationDtype) -> Self {
        self.quantization = Some(dtype);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reject settings that cannot produce a loadable artifact.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.weight_shard_size_bytes == 0 {
            return Err(ConvertError::InvalidConfig {
                detail: "weight_shard_size_bytes must be greater than zero".to_string(),
            });
        }
        if let Some(ref metadata) = self.metadata
            && !metadata.is_object()
        {
            return Err(ConvertError::InvalidConfig {
                detail: "user metadata must be a JSON object".to_string(),
            });
        }
        Ok(())
    }
}
