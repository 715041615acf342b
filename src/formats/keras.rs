//! Keras archive reader: `.keras` files written by `model.save()`.
//!
//! ## Archive layout
//!
//! A `.keras` file is a zip archive with three members:
//! - `config.json`: the serialized model (`class_name`, `config`, ...).
//! - `metadata.json`: `keras_version`, `date_saved` (optional here).
//! - `model.weights.h5`: HDF5 file holding every variable.
//!
//! ## Weight file layout
//!
//! Variables carry no names in the weight file. Each layer owns a group whose
//! `vars` subgroup holds datasets `0`, `1`, ... in variable creation order:
//! - Keras 3: `layers/<snake_case(class)>[_<n>]/vars/<i>`; the suffix counts
//!   repeated classes inside one container.
//! - tf.keras 2.13+: `_layer_checkpoint_dependencies/<layer name>/vars/<i>`.
//!
//! Sub-layers (RNN cells, wrapped layers) nest under their attribute name,
//! e.g. `layers/lstm/cell/vars/0`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, trace};

use crate::error::ConvertError;
use crate::formats::ModelSource;
use crate::h5::{Dataset, H5File};
use crate::layers::{self, ContainerKeys};
use crate::model::{CanonicalModel, Tensor};

pub const CONFIG_MEMBER: &str = "config.json";
pub const METADATA_MEMBER: &str = "metadata.json";
pub const WEIGHTS_MEMBER: &str = "model.weights.h5";

/// Keras `.keras` archive format.
pub struct KerasArchive;

impl ModelSource for KerasArchive {
    fn name(&self) -> &str {
        "Keras archive"
    }

    fn slug(&self) -> &str {
        "keras"
    }

    fn read_model(&self, path: &Path) -> anyhow::Result<CanonicalModel> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConvertError::ModelNotFound {
                    path: path.to_path_buf(),
                }
                .into());
            }
            Err(e) => return Err(read_error(path, format!("cannot open file: {e}")).into()),
        };

        let mut archive = zip::ZipArchive::new(BufReader::new(file))
            .map_err(|e| read_error(path, format!("not a Keras zip archive: {e}")))?;
        trace!(members = archive.len(), "opened keras archive");

        let config_bytes = read_member(&mut archive, CONFIG_MEMBER)
            .map_err(|detail| read_error(path, detail))?
            .ok_or_else(|| read_error(path, format!("archive has no {CONFIG_MEMBER}")))?;
        let config: Value = serde_json::from_slice(&config_bytes)
            .map_err(|e| read_error(path, format!("{CONFIG_MEMBER} is not valid JSON: {e}")))?;

        let metadata: Option<Value> = match read_member(&mut archive, METADATA_MEMBER)
            .map_err(|detail| read_error(path, detail))?
        {
            Some(bytes) => Some(serde_json::from_slice(&bytes).map_err(|e| {
                read_error(path, format!("{METADATA_MEMBER} is not valid JSON: {e}"))
            })?),
            None => None,
        };

        // Weights can only be named for layers in the registry.
        layers::check_supported(&config)?;
        if !layers::is_container(layers::class_name(&config)) {
            return Err(read_error(
                path,
                format!(
                    "{CONFIG_MEMBER} describes a '{}', not a model",
                    layers::class_name(&config)
                ),
            )
            .into());
        }

        let weights_bytes = read_member(&mut archive, WEIGHTS_MEMBER)
            .map_err(|detail| read_error(path, detail))?
            .ok_or_else(|| read_error(path, format!("archive has no {WEIGHTS_MEMBER}")))?;
        let h5 = H5File::parse(weights_bytes)
            .map_err(|e| read_error(path, format!("{WEIGHTS_MEMBER}: {e}")))?;

        let mut collector = WeightCollector {
            h5: &h5,
            archive_path: path,
            weights: Vec::new(),
        };
        collector.collect_container(Some(""), &config)?;
        let weights = collector.weights;

        let keras_version = metadata
            .as_ref()
            .and_then(|m| m.get("keras_version"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let backend = metadata
            .as_ref()
            .and_then(|m| m.get("backend"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let model = CanonicalModel {
            topology: config,
            weights,
            keras_version,
            backend,
        };
        info!(
            path = %path.display(),
            class = model.class_name().unwrap_or("?"),
            weights = model.weights.len(),
            parameters = model.parameter_count(),
            "keras archive loaded"
        );
        Ok(model)
    }
}

fn read_error(path: &Path, detail: String) -> ConvertError {
    ConvertError::ModelReadError {
        path: PathBuf::from(path),
        detail,
    }
}

/// Read a whole archive member; `Ok(None)` if it does not exist.
fn read_member<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, String> {
    let mut member = match archive.by_name(name) {
        Ok(member) => member,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(format!("cannot open {name}: {e}")),
    };
    // The header's size field is untrusted; let the buffer grow as read.
    let mut bytes = Vec::new();
    member
        .read_to_end(&mut bytes)
        .map_err(|e| format!("cannot read {name}: {e}"))?;
    Ok(Some(bytes))
}

// ---------------------------------------------------------------------------
// Weight collection
// ---------------------------------------------------------------------------

struct WeightCollector<'a> {
    h5: &'a H5File,
    archive_path: &'a Path,
    weights: Vec<Tensor>,
}

impl WeightCollector<'_> {
    fn h5_error(&self, e: crate::h5::H5Error) -> ConvertError {
        read_error(self.archive_path, format!("{WEIGHTS_MEMBER}: {e}"))
    }

    fn group_exists(&self, path: &str) -> Result<bool, ConvertError> {
        self.h5
            .group(path)
            .map(|g| g.is_some())
            .map_err(|e| self.h5_error(e))
    }

    /// Walk a model's layer list. `prefix` is the weight-file path of the
    /// container (with trailing `/`), or `None` if it stored nothing.
    fn collect_container(
        &mut self,
        prefix: Option<&str>,
        container: &Value,
    ) -> Result<(), ConvertError> {
        // Sequential hides its auto-created InputLayer from `layers`.
        let skip_input = layers::class_name(container) == "Sequential";
        let mut keys = ContainerKeys::default();

        for layer in layers::container_layers(container) {
            let class = layers::class_name(layer);
            if skip_input && class == "InputLayer" {
                continue;
            }
            let key = keys.next_key(class);
            let name = layers::layer_name(layer);

            let mut group = None;
            if let Some(prefix) = prefix {
                for candidate in [
                    format!("{prefix}layers/{key}"),
                    format!("{prefix}_layer_checkpoint_dependencies/{name}"),
                ] {
                    if self.group_exists(&candidate)? {
                        group = Some(candidate);
                        break;
                    }
                }
            }
            trace!(layer = name, class, key, group = ?group, "resolved layer group");
            self.collect_layer(group.as_deref(), layer, name)?;
        }
        Ok(())
    }

    fn collect_layer(
        &mut self,
        group: Option<&str>,
        layer: &Value,
        scope: &str,
    ) -> Result<(), ConvertError> {
        let class = layers::class_name(layer);
        if layers::is_container(class) {
            let prefix = group.map(|g| format!("{g}/"));
            return self.collect_container(prefix.as_deref(), layer);
        }

        let variables = match group {
            Some(group) => self.read_vars(&format!("{group}/vars"))?,
            None => Vec::new(),
        };
        let expected = layers::variable_names(layer);

        match expected {
            Some(names) if names.len() == variables.len() => {
                for (var, dataset) in names.iter().zip(variables) {
                    let name = format!("{scope}/{var}");
                    let data = dataset
                        .to_tensor_data()
                        .map_err(|e| ConvertError::UnsupportedWeight {
                            name: name.clone(),
                            detail: e.to_string(),
                        })?;
                    self.weights.push(Tensor::new(name, dataset.shape, data));
                }
                debug!(layer = scope, class, variables = names.len(), "collected layer weights");
            }
            Some(names) => {
                return Err(ConvertError::UnsupportedWeight {
                    name: scope.to_string(),
                    detail: format!(
                        "{class} layer should store {} variable(s) ({}), found {}",
                        names.len(),
                        names.join(", "),
                        variables.len()
                    ),
                });
            }
            None if !variables.is_empty() => {
                return Err(ConvertError::UnsupportedWeight {
                    name: scope.to_string(),
                    detail: format!(
                        "{class} layer stores {} variable(s) with no known TensorFlow.js names",
                        variables.len()
                    ),
                });
            }
            None => {}
        }

        for sub in layers::sub_layers(layer, scope) {
            let mut sub_group = None;
            if let Some(group) = group {
                let candidate = format!("{group}/{}", sub.attribute);
                if self.group_exists(&candidate)? {
                    sub_group = Some(candidate);
                }
            }
            self.collect_layer(sub_group.as_deref(), &sub.layer, &sub.scope)?;
        }
        Ok(())
    }

    /// Datasets `0`, `1`, ... of a `vars` group in numeric order.
    fn read_vars(&self, path: &str) -> Result<Vec<Dataset>, ConvertError> {
        let Some(group) = self.h5.group(path).map_err(|e| self.h5_error(e))? else {
            return Ok(Vec::new());
        };
        let mut indices: Vec<usize> = group.names().filter_map(|n| n.parse().ok()).collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .map(|i| {
                self.h5
                    .dataset(&format!("{path}/{i}"))
                    .map_err(|e| self.h5_error(e))
            })
            .collect()
    }
}
