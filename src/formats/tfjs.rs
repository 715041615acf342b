//! TensorFlow.js layers-model format: `model.json` plus binary weight shards.
//!
//! ## Directory layout
//!
//! ```text
//! <dir>/model.json              topology + weights manifest
//! <dir>/group1-shard1of2.bin    concatenated little-endian weight bytes
//! <dir>/group1-shard2of2.bin
//! ```
//!
//! All weights go into a single manifest group. The group's bytes are the
//! weights in manifest order, split into shards of at most
//! [`WriteOptions::shard_size_bytes`]. A weight may straddle two shards; the
//! loader concatenates a group's shards before slicing.
//!
//! ## Quantization
//!
//! Float32 weights can be stored as `uint8`/`uint16` with an affine mapping
//! `w ≈ q * scale + min`. The range is nudged so that 0.0 maps to an exact
//! integer whenever the weights straddle zero.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::QuantizationDtype;
use crate::error::ConvertError;
use crate::formats::{ModelSink, ModelSource, WriteOptions, WrittenArtifacts};
use crate::model::{CanonicalModel, Tensor, TensorData};
use crate::pipeline::atomic_write;
use crate::topology;

pub const MODEL_JSON: &str = "model.json";
pub const FORMAT: &str = "layers-model";

static SHARD_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^group\d+-shard\d+of\d+\.bin$").expect("static regex"));

// ---------------------------------------------------------------------------
// model.json schema
// ---------------------------------------------------------------------------

/// Top-level `model.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelJson {
    pub format: String,
    pub generated_by: String,
    pub converted_by: String,
    pub model_topology: Value,
    pub weights_manifest: Vec<ManifestGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_defined_metadata: Option<Value>,
}

/// One weights group: shard file names plus the weights they hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<QuantizationInfo>,
}

/// Affine quantization parameters recorded per weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationInfo {
    pub dtype: QuantizationDtype,
    pub min: f64,
    pub scale: f64,
    pub original_dtype: String,
}

/// Shard file name for the 0-based shard `index` of `count`.
pub fn shard_file_name(index: usize, count: usize) -> String {
    format!("group1-shard{}of{}.bin", index + 1, count)
}

// ---------------------------------------------------------------------------
// Quantization
// ---------------------------------------------------------------------------

/// Quantized values plus the parameters needed to recover them.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantized {
    pub values: Vec<u32>,
    pub min: f64,
    pub scale: f64,
}

/// Affine-quantize `values` into `[0, dtype.max_value()]`.
///
/// A constant tensor quantizes to all zeros with `scale = 1.0` and
/// `min` equal to the constant.
pub fn quantize(values: &[f32], dtype: QuantizationDtype) -> Quantized {
    let (lo, hi) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if values.is_empty() || lo == hi {
        return Quantized {
            values: vec![0; values.len()],
            min: if values.is_empty() { 0.0 } else { f64::from(lo) },
            scale: 1.0,
        };
    }

    let (lo, hi) = (f64::from(lo), f64::from(hi));
    let qmax = f64::from(dtype.max_value());
    let scale = (hi - lo) / qmax;
    let (min, max) = if lo <= 0.0 && 0.0 <= hi {
        let zero_point = (-lo / scale).round_ties_even();
        let nudged_min = -zero_point * scale;
        (nudged_min, qmax * scale + nudged_min)
    } else {
        (lo, hi)
    };

    let quantized = values
        .iter()
        .map(|&v| {
            let clipped = f64::from(v).clamp(min, max);
            ((clipped - min) / scale).round_ties_even().clamp(0.0, qmax) as u32
        })
        .collect();
    Quantized {
        values: quantized,
        min,
        scale,
    }
}

/// Recover float32 values from quantized integers.
pub fn dequantize(values: &[u32], min: f64, scale: f64) -> Vec<f32> {
    values
        .iter()
        .map(|&q| (f64::from(q) * scale + min) as f32)
        .collect()
}

fn quantized_bytes(values: &[u32], dtype: QuantizationDtype) -> Vec<u8> {
    match dtype {
        QuantizationDtype::Uint8 => values.iter().map(|&q| q as u8).collect(),
        QuantizationDtype::Uint16 => values
            .iter()
            .flat_map(|&q| (q as u16).to_le_bytes())
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// TensorFlow.js layers-model directory format.
pub struct TfjsLayers;

impl TfjsLayers {
    /// Build the manifest entries and weight bytes for `weights`.
    fn encode_weights(
        weights: &[Tensor],
        quantization: Option<QuantizationDtype>,
    ) -> Result<(Vec<WeightEntry>, Vec<u8>), ConvertError> {
        let mut entries = Vec::with_capacity(weights.len());
        let mut bytes = Vec::new();

        for tensor in weights {
            if !tensor.is_consistent() {
                return Err(ConvertError::UnsupportedWeight {
                    name: tensor.name.clone(),
                    detail: format!(
                        "shape {:?} needs {} elements but {} are stored",
                        tensor.shape,
                        tensor.num_elements(),
                        tensor.data.len()
                    ),
                });
            }
            let mut entry = WeightEntry {
                name: tensor.name.clone(),
                shape: tensor.shape.clone(),
                dtype: tensor.data.dtype().to_string(),
                quantization: None,
            };
            match (&tensor.data, quantization) {
                (TensorData::Float32(values), Some(dtype)) => {
                    let q = quantize(values, dtype);
                    bytes.extend(quantized_bytes(&q.values, dtype));
                    entry.quantization = Some(QuantizationInfo {
                        dtype,
                        min: q.min,
                        scale: q.scale,
                        original_dtype: "float32".to_string(),
                    });
                }
                (data, _) => bytes.extend(data.to_le_bytes()),
            }
            entries.push(entry);
        }
        Ok((entries, bytes))
    }

    /// Delete shard files in `dir` that the new manifest does not reference.
    fn remove_stale_shards(
        dir: &Path,
        keep: &BTreeSet<String>,
    ) -> Result<Vec<PathBuf>, ConvertError> {
        let entries = std::fs::read_dir(dir).map_err(|e| ConvertError::ArtifactWriteError {
            path: dir.to_path_buf(),
            detail: format!("failed to list output directory: {e}"),
        })?;

        let mut removed = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !SHARD_FILE.is_match(&name) || keep.contains(&name) {
                continue;
            }
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| ConvertError::ArtifactWriteError {
                path: path.clone(),
                detail: format!("failed to remove stale shard: {e}"),
            })?;
            debug!(path = %path.display(), "removed stale weight shard");
            removed.push(path);
        }
        removed.sort();
        Ok(removed)
    }
}

impl ModelSink for TfjsLayers {
    fn name(&self) -> &str {
        "TensorFlow.js layers model"
    }

    fn slug(&self) -> &str {
        "tfjs"
    }

    fn write_model(
        &self,
        model: &CanonicalModel,
        dir: &Path,
        opts: &WriteOptions,
    ) -> anyhow::Result<WrittenArtifacts> {
        if opts.shard_size_bytes == 0 {
            return Err(ConvertError::InvalidConfig {
                detail: "weight shard size must be greater than zero".to_string(),
            }
            .into());
        }

        let (entries, bytes) = Self::encode_weights(&model.weights, opts.quantization)?;
        let chunks: Vec<&[u8]> = bytes.chunks(opts.shard_size_bytes).collect();
        let shard_names: Vec<String> = (0..chunks.len())
            .map(|i| shard_file_name(i, chunks.len()))
            .collect();

        let manifest = ModelJson {
            format: FORMAT.to_string(),
            generated_by: format!(
                "keras v{}",
                model.keras_version.as_deref().unwrap_or("unknown")
            ),
            converted_by: format!("kerasjs v{}", env!("CARGO_PKG_VERSION")),
            model_topology: model.topology.clone(),
            weights_manifest: vec![ManifestGroup {
                paths: shard_names.clone(),
                weights: entries,
            }],
            user_defined_metadata: opts.metadata.clone(),
        };
        let json = serde_json::to_vec(&manifest).map_err(|e| ConvertError::ArtifactWriteError {
            path: dir.join(MODEL_JSON),
            detail: format!("failed to serialize manifest: {e}"),
        })?;

        std::fs::create_dir_all(dir).map_err(|e| ConvertError::ArtifactWriteError {
            path: dir.to_path_buf(),
            detail: format!("failed to create output directory: {e}"),
        })?;

        let mut shards = Vec::with_capacity(chunks.len());
        for (name, chunk) in shard_names.iter().zip(&chunks) {
            let outcome = atomic_write(&dir.join(name), chunk)?;
            shards.push(outcome.target_path);
        }
        let model_json = atomic_write(&dir.join(MODEL_JSON), &json)?.target_path;

        let keep: BTreeSet<String> = shard_names.into_iter().collect();
        let removed = Self::remove_stale_shards(dir, &keep)?;
        if !removed.is_empty() {
            warn!(
                count = removed.len(),
                dir = %dir.display(),
                "removed weight shards left by an earlier conversion"
            );
        }

        info!(
            dir = %dir.display(),
            shards = shards.len(),
            weights = model.weights.len(),
            bytes = bytes.len(),
            quantization = opts.quantization.map(|q| q.as_str()),
            "tfjs model written"
        );
        Ok(WrittenArtifacts {
            model_json,
            shards,
            weight_count: model.weights.len(),
            weight_bytes: bytes.len(),
            removed,
        })
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

impl ModelSource for TfjsLayers {
    fn name(&self) -> &str {
        "TensorFlow.js layers model"
    }

    fn slug(&self) -> &str {
        "tfjs"
    }

    /// `path` is the model directory or its `model.json`.
    fn read_model(&self, path: &Path) -> anyhow::Result<CanonicalModel> {
        let json_path = if path.is_dir() {
            path.join(MODEL_JSON)
        } else {
            path.to_path_buf()
        };
        let dir = json_path.parent().unwrap_or(Path::new("."));

        let bytes = match std::fs::read(&json_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConvertError::ModelNotFound { path: json_path }.into());
            }
            Err(e) => return Err(read_error(&json_path, format!("cannot read file: {e}")).into()),
        };
        let manifest: ModelJson = serde_json::from_slice(&bytes)
            .map_err(|e| read_error(&json_path, format!("invalid {MODEL_JSON}: {e}")))?;
        if manifest.format != FORMAT {
            return Err(read_error(
                &json_path,
                format!("unsupported format '{}', expected '{FORMAT}'", manifest.format),
            )
            .into());
        }

        let mut weights = Vec::new();
        for group in &manifest.weights_manifest {
            let mut buffer = Vec::new();
            for shard in &group.paths {
                let shard_path = dir.join(shard);
                let data = std::fs::read(&shard_path)
                    .map_err(|e| read_error(&shard_path, format!("cannot read shard: {e}")))?;
                buffer.extend(data);
            }

            let mut offset = 0usize;
            for entry in &group.weights {
                let tensor = decode_weight(entry, &buffer, &mut offset)
                    .map_err(|detail| read_error(&json_path, detail))?;
                weights.push(tensor);
            }
            if offset != buffer.len() {
                warn!(
                    unused = buffer.len() - offset,
                    "weight group has trailing bytes after the last weight"
                );
            }
        }

        let topology = &manifest.model_topology;
        let model = CanonicalModel {
            topology: topology::model_config(topology).clone(),
            weights,
            keras_version: topology
                .get("keras_version")
                .and_then(Value::as_str)
                .map(str::to_string),
            backend: topology
                .get("backend")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        debug!(
            path = %json_path.display(),
            weights = model.weights.len(),
            "tfjs model loaded"
        );
        Ok(model)
    }
}

fn read_error(path: &Path, detail: String) -> ConvertError {
    ConvertError::ModelReadError {
        path: path.to_path_buf(),
        detail,
    }
}

/// Slice one weight out of a group buffer, advancing `offset`.
fn decode_weight(entry: &WeightEntry, buffer: &[u8], offset: &mut usize) -> Result<Tensor, String> {
    let width = match (&entry.quantization, entry.dtype.as_str()) {
        (Some(q), _) => q.dtype.element_size(),
        (None, "float32" | "int32") => 4,
        (None, other) => return Err(format!("weight '{}' has unsupported dtype '{other}'", entry.name)),
    };
    let end = entry
        .shape
        .iter()
        .try_fold(width, |bytes, &dim| bytes.checked_mul(dim))
        .and_then(|len| offset.checked_add(len));
    let Some(raw) = end.and_then(|end| buffer.get(*offset..end)) else {
        return Err(format!(
            "weight '{}' with shape {:?} needs more bytes than the {} held by its shards",
            entry.name,
            entry.shape,
            buffer.len()
        ));
    };
    *offset += raw.len();

    let data = match &entry.quantization {
        Some(q) => {
            let values: Vec<u32> = match q.dtype {
                QuantizationDtype::Uint8 => raw.iter().map(|&b| u32::from(b)).collect(),
                QuantizationDtype::Uint16 => raw
                    .chunks_exact(2)
                    .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
                    .collect(),
            };
            TensorData::Float32(dequantize(&values, q.min, q.scale))
        }
        None if entry.dtype == "int32" => TensorData::Int32(
            raw.chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        None => TensorData::Float32(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
    };
    Ok(Tensor::new(entry.name.clone(), entry.shape.clone(), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn sample_model() -> CanonicalModel {
        CanonicalModel {
            topology: json!({"class_name": "Sequential", "config": {"name": "s", "layers": []}}),
            weights: vec![
                Tensor::new(
                    "dense/kernel",
                    vec![2, 3],
                    TensorData::Float32(vec![-1.0, -0.5, 0.0, 0.25, 0.5, 1.0]),
                ),
                Tensor::new("dense/bias", vec![3], TensorData::Float32(vec![0.1, 0.2, 0.3])),
                Tensor::new("embedding/ids", vec![2], TensorData::Int32(vec![-7, 42])),
            ],
            keras_version: Some("3.3.3".to_string()),
            backend: Some("tensorflow".to_string()),
        }
    }

    fn options(shard_size_bytes: usize) -> WriteOptions {
        WriteOptions {
            shard_size_bytes,
            quantization: None,
            metadata: None,
        }
    }

    fn with_topology(mut model: CanonicalModel) -> CanonicalModel {
        model.topology = topology::to_tfjs_topology(
            &model.topology,
            model.keras_version.as_deref(),
            model.backend.as_deref(),
        );
        model
    }

    #[test]
    fn quantize_nudges_zero_onto_the_grid() {
        let q = quantize(&[-1.0, 0.0, 3.0], QuantizationDtype::Uint8);
        let restored = dequantize(&q.values, q.min, q.scale);
        assert_eq!(restored[1], 0.0);
        assert!((restored[0] + 1.0).abs() <= q.scale as f32);
        assert!((restored[2] - 3.0).abs() <= q.scale as f32);
    }

    #[test]
    fn quantize_positive_range_uses_min_as_offset() {
        let q = quantize(&[2.0, 4.0], QuantizationDtype::Uint16);
        assert_eq!(q.min, 2.0);
        assert_eq!(q.values, vec![0, 65535]);
    }

    #[test]
    fn quantize_constant_tensor_is_all_zeros() {
        let q = quantize(&[0.7, 0.7, 0.7], QuantizationDtype::Uint8);
        assert_eq!(q.values, vec![0, 0, 0]);
        assert_eq!(q.scale, 1.0);
        assert_eq!(dequantize(&q.values, q.min, q.scale), vec![0.7f32; 3]);
    }

    #[test]
    fn shards_split_bytes_and_reload_exactly() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let model = with_topology(sample_model());

        let written = TfjsLayers
            .write_model(&model, tmp.path(), &options(16))
            .expect("write");
        // 6*4 + 3*4 + 2*4 = 44 bytes -> 16 + 16 + 12.
        assert_eq!(written.weight_bytes, 44);
        let names: Vec<String> = written
            .shards
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "group1-shard1of3.bin",
                "group1-shard2of3.bin",
                "group1-shard3of3.bin"
            ]
        );
        assert_eq!(fs::metadata(&written.shards[2]).unwrap().len(), 12);

        let loaded = TfjsLayers.read_model(tmp.path()).expect("read back");
        assert_eq!(loaded.weights, sample_model().weights);
        assert_eq!(loaded.topology, sample_model().topology);
        assert_eq!(loaded.keras_version.as_deref(), Some("3.3.3"));
    }

    #[test]
    fn model_json_carries_format_and_manifest() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let opts = WriteOptions {
            metadata: Some(json!({"labels": ["A", "B"]})),
            ..options(1024)
        };
        TfjsLayers
            .write_model(&with_topology(sample_model()), tmp.path(), &opts)
            .expect("write");

        let doc: Value =
            serde_json::from_slice(&fs::read(tmp.path().join(MODEL_JSON)).unwrap()).unwrap();
        assert_eq!(doc["format"], "layers-model");
        assert_eq!(doc["generatedBy"], "keras v3.3.3");
        assert!(doc["convertedBy"].as_str().unwrap().starts_with("kerasjs v"));
        assert_eq!(doc["modelTopology"]["model_config"]["class_name"], "Sequential");
        assert_eq!(doc["userDefinedMetadata"]["labels"][1], "B");
        assert_eq!(
            doc["weightsManifest"][0]["paths"],
            json!(["group1-shard1of1.bin"])
        );
        assert_eq!(
            doc["weightsManifest"][0]["weights"][0],
            json!({"name": "dense/kernel", "shape": [2, 3], "dtype": "float32"})
        );
        assert_eq!(doc["weightsManifest"][0]["weights"][2]["dtype"], "int32");
    }

    #[test]
    fn quantized_weights_record_parameters_and_reload_within_one_step() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let opts = WriteOptions {
            quantization: Some(QuantizationDtype::Uint8),
            ..options(1024)
        };
        let written = TfjsLayers
            .write_model(&with_topology(sample_model()), tmp.path(), &opts)
            .expect("write");
        // 6 + 3 quantized bytes, int32 weight untouched.
        assert_eq!(written.weight_bytes, 6 + 3 + 8);

        let doc: Value =
            serde_json::from_slice(&fs::read(tmp.path().join(MODEL_JSON)).unwrap()).unwrap();
        let kernel = &doc["weightsManifest"][0]["weights"][0];
        assert_eq!(kernel["quantization"]["dtype"], "uint8");
        assert_eq!(kernel["quantization"]["original_dtype"], "float32");
        assert!(doc["weightsManifest"][0]["weights"][2].get("quantization").is_none());

        let loaded = TfjsLayers.read_model(tmp.path()).expect("read back");
        for (orig, back) in sample_model().weights.iter().zip(&loaded.weights) {
            match (&orig.data, &back.data) {
                (TensorData::Float32(a), TensorData::Float32(b)) => {
                    let range = a.iter().cloned().fold(f32::MIN, f32::max)
                        - a.iter().cloned().fold(f32::MAX, f32::min);
                    let step = range / 255.0 + f32::EPSILON;
                    for (x, y) in a.iter().zip(b) {
                        assert!((x - y).abs() <= step, "{x} vs {y}");
                    }
                }
                (a, b) => assert_eq!(a, b),
            }
        }
    }

    #[test]
    fn stale_shards_are_removed() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        fs::write(tmp.path().join("group1-shard1of5.bin"), b"old").unwrap();
        fs::write(tmp.path().join("group1-shard5of5.bin"), b"old").unwrap();
        fs::write(tmp.path().join("labels.txt"), b"keep me").unwrap();

        let written = TfjsLayers
            .write_model(&with_topology(sample_model()), tmp.path(), &options(1024))
            .expect("write");
        assert_eq!(
            written.removed,
            vec![
                tmp.path().join("group1-shard1of5.bin"),
                tmp.path().join("group1-shard5of5.bin")
            ]
        );
        assert!(tmp.path().join("labels.txt").exists());
        assert!(tmp.path().join("group1-shard1of1.bin").exists());
    }

    #[test]
    fn model_without_weights_writes_no_shards() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let mut model = with_topology(sample_model());
        model.weights.clear();
        let written = TfjsLayers
            .write_model(&model, tmp.path(), &options(1024))
            .expect("write");
        assert!(written.shards.is_empty());
        let loaded = TfjsLayers.read_model(tmp.path()).expect("read back");
        assert!(loaded.weights.is_empty());
    }

    #[test]
    fn zero_shard_size_is_invalid_config() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let err = TfjsLayers
            .write_model(&sample_model(), &tmp.path().join("out"), &options(0))
            .expect_err("zero shard size");
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::InvalidConfig { .. })
        ));
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn inconsistent_tensor_is_rejected() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let mut model = sample_model();
        model.weights[1].shape = vec![4];
        let err = TfjsLayers
            .write_model(&model, tmp.path(), &options(1024))
            .expect_err("shape mismatch");
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::UnsupportedWeight { name, .. }) if name == "dense/bias"
        ));
    }

    #[test]
    fn truncated_shard_is_a_read_error() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        TfjsLayers
            .write_model(&with_topology(sample_model()), tmp.path(), &options(1024))
            .expect("write");
        fs::write(tmp.path().join("group1-shard1of1.bin"), [0u8; 10]).unwrap();
        let err = TfjsLayers.read_model(tmp.path()).expect_err("short shard");
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::ModelReadError { .. })
        ));
    }

    #[test]
    fn overflowing_shape_is_a_read_error() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        TfjsLayers
            .write_model(&with_topology(sample_model()), tmp.path(), &options(1024))
            .expect("write");
        let path = tmp.path().join(MODEL_JSON);
        let mut doc: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        doc["weightsManifest"][0]["weights"][0]["shape"] = json!([4611686018427387904u64, 8]);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let err = TfjsLayers.read_model(tmp.path()).expect_err("overflowing shape");
        match err.downcast_ref::<ConvertError>() {
            Some(ConvertError::ModelReadError { detail, .. }) => {
                assert!(detail.contains("dense/kernel"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_model_json_is_not_found() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let err = TfjsLayers.read_model(tmp.path()).expect_err("empty dir");
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::ModelNotFound { .. })
        ));
    }
}
