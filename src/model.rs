//! Canonical model: the IR between the Keras reader and the TensorFlow.js
//! writer.
//!
//! Readers produce a [`CanonicalModel`]; writers consume one. Tensors are
//! already named the way TensorFlow.js layers look them up
//! (`<layer name>/<variable name>`), so writers never need to know which
//! source format the weights came from.

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// A format-agnostic model: architecture plus named weights.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalModel {
    /// Serialized architecture: `{"class_name": ..., "config": {...}}`.
    pub topology: serde_json::Value,
    /// Weights in layer order.
    pub weights: Vec<Tensor>,
    /// Keras version that saved the model (e.g. `"3.3.3"`), if recorded.
    pub keras_version: Option<String>,
    /// Backend name recorded alongside the model.
    pub backend: Option<String>,
}

/// A named, shaped weight array.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: TensorData,
}

/// Element storage. TensorFlow.js weights are either float32 or int32;
/// wider and narrower source types are converted when read.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
}

impl TensorData {
    /// Dtype string used in the weights manifest.
    pub fn dtype(&self) -> &'static str {
        match self {
            TensorData::Float32(_) => "float32",
            TensorData::Int32(_) => "int32",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Float32(v) => v.len(),
            TensorData::Int32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Little-endian byte image, 4 bytes per element.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            TensorData::Float32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

impl Tensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: TensorData) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }

    /// Number of elements implied by the shape (1 for scalars).
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Shape and data length agree.
    pub fn is_consistent(&self) -> bool {
        self.num_elements() == self.data.len()
    }
}

impl CanonicalModel {
    /// Class name of the top-level model (`"Sequential"`, `"Functional"`, ...).
    pub fn class_name(&self) -> Option<&str> {
        self.topology.get("class_name").and_then(|v| v.as_str())
    }

    /// Total number of weight elements.
    pub fn parameter_count(&self) -> usize {
        self.weights.iter().map(|t| t.data.len()).sum()
    }

    /// Look up a weight by its TensorFlow.js name.
    pub fn weight(&self, name: &str) -> Option<&Tensor> {
        self.weights.iter().find(|t| t.name == name)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert an IEEE 754 half-precision value to `f32`.
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) & 0x1) as u32;
    let exponent = ((bits >> 10) & 0x1f) as u32;
    let mantissa = (bits & 0x3ff) as u32;

    let out = match (exponent, mantissa) {
        (0, 0) => sign << 31,
        (0, _) => {
            // Subnormal: renormalize into an f32 exponent.
            let mut e: i32 = -14;
            let mut m = mantissa;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            m &= 0x3ff;
            (sign << 31) | (((e + 127) as u32) << 23) | (m << 13)
        }
        (0x1f, 0) => (sign << 31) | 0x7f80_0000,
        (0x1f, _) => (sign << 31) | 0x7fc0_0000 | (mantissa << 13),
        _ => (sign << 31) | ((exponent + 127 - 15) << 23) | (mantissa << 13),
    };
    f32::from_bits(out)
}
