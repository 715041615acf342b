//! Layer registry: which Keras layer classes TensorFlow.js layers can load,
//! what their variables are called, and how Keras keys them in a weight file.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::ConvertError;

/// Keras layer classes that TensorFlow.js layers can deserialize.
pub const SUPPORTED_LAYERS: &[&str] = &[
    // Containers
    "Sequential",
    "Functional",
    "Model",
    "InputLayer",
    // Core
    "Dense",
    "Dropout",
    "Flatten",
    "Activation",
    "Reshape",
    "Permute",
    "RepeatVector",
    "Embedding",
    "Masking",
    "SpatialDropout1D",
    // Activations
    "ReLU",
    "LeakyReLU",
    "PReLU",
    "ELU",
    "ThresholdedReLU",
    "Softmax",
    // Convolution
    "Conv1D",
    "Conv2D",
    "Conv3D",
    "Conv2DTranspose",
    "Conv3DTranspose",
    "SeparableConv1D",
    "SeparableConv2D",
    "DepthwiseConv2D",
    "Cropping1D",
    "Cropping2D",
    "UpSampling1D",
    "UpSampling2D",
    "ZeroPadding1D",
    "ZeroPadding2D",
    // Pooling
    "MaxPooling1D",
    "MaxPooling2D",
    "MaxPooling3D",
    "AveragePooling1D",
    "AveragePooling2D",
    "AveragePooling3D",
    "GlobalMaxPooling1D",
    "GlobalMaxPooling2D",
    "GlobalAveragePooling1D",
    "GlobalAveragePooling2D",
    // Merge
    "Add",
    "Average",
    "Concatenate",
    "Dot",
    "Maximum",
    "Minimum",
    "Multiply",
    // Normalization
    "BatchNormalization",
    "LayerNormalization",
    // Recurrent and wrappers
    "SimpleRNN",
    "GRU",
    "LSTM",
    "Bidirectional",
    "TimeDistributed",
    // Noise
    "GaussianNoise",
    "GaussianDropout",
    "AlphaDropout",
    // Preprocessing
    "Rescaling",
    "CenterCrop",
    "Resizing",
    "CategoryEncoding",
    "RandomWidth",
];

/// Classes whose `config.layers` holds nested layers.
pub const CONTAINER_LAYERS: &[&str] = &["Sequential", "Functional", "Model"];

pub fn is_supported(class_name: &str) -> bool {
    SUPPORTED_LAYERS.contains(&class_name)
}

pub fn is_container(class_name: &str) -> bool {
    CONTAINER_LAYERS.contains(&class_name)
}

// ---------------------------------------------------------------------------
// Config accessors
// ---------------------------------------------------------------------------

pub fn class_name(layer: &Value) -> &str {
    layer.get("class_name").and_then(Value::as_str).unwrap_or("")
}

/// Layer name from `config.name`, falling back to the top-level `name`.
pub fn layer_name(layer: &Value) -> &str {
    layer
        .get("config")
        .and_then(|c| c.get("name"))
        .or_else(|| layer.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Nested layer list of a container, if any.
pub fn container_layers(layer: &Value) -> &[Value] {
    layer
        .get("config")
        .and_then(|c| c.get("layers"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn config_flag(config: &Value, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Sub-layers
// ---------------------------------------------------------------------------

/// A layer owned by another layer, stored under its own weight group.
#[derive(Debug, Clone, PartialEq)]
pub struct SubLayer {
    /// Attribute name Keras saves the sub-layer under (`cell`, `layer`, ...).
    pub attribute: &'static str,
    /// Serialized config of the sub-layer.
    pub layer: Value,
    /// Scope its variables are named under in TensorFlow.js.
    pub scope: String,
}

fn cell_class(rnn_class: &str) -> Option<&'static str> {
    match rnn_class {
        "LSTM" => Some("LSTMCell"),
        "GRU" => Some("GRUCell"),
        "SimpleRNN" => Some("SimpleRNNCell"),
        _ => None,
    }
}

/// Sub-layers of recurrent layers and wrappers, in save order. `scope` is
/// the name the owning layer's variables are filed under.
pub fn sub_layers(layer: &Value, scope: &str) -> Vec<SubLayer> {
    let class = class_name(layer);
    let config = layer.get("config").cloned().unwrap_or(Value::Null);

    if let Some(cell) = cell_class(class) {
        // Cell variables belong to the recurrent layer's scope.
        return vec![SubLayer {
            attribute: "cell",
            layer: serde_json::json!({ "class_name": cell, "config": config }),
            scope: scope.to_string(),
        }];
    }

    match class {
        "TimeDistributed" => config
            .get("layer")
            .map(|inner| {
                vec![SubLayer {
                    attribute: "layer",
                    layer: inner.clone(),
                    scope: scope.to_string(),
                }]
            })
            .unwrap_or_default(),
        "Bidirectional" => {
            let Some(inner) = config.get("layer") else {
                return Vec::new();
            };
            let forward = config.get("forward_layer").unwrap_or(inner);
            let backward = config.get("backward_layer").unwrap_or(inner);
            vec![
                SubLayer {
                    attribute: "forward_layer",
                    layer: forward.clone(),
                    scope: format!("{scope}/forward_{}", layer_name(inner)),
                },
                SubLayer {
                    attribute: "backward_layer",
                    layer: backward.clone(),
                    scope: format!("{scope}/backward_{}", layer_name(inner)),
                },
            ]
        }
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Variable naming
// ---------------------------------------------------------------------------

/// Variable names of a layer class in creation order, as TensorFlow.js
/// expects them. `None` when the class owns no variables we know how to name.
pub fn variable_names(layer: &Value) -> Option<Vec<&'static str>> {
    let config = layer.get("config").unwrap_or(&Value::Null);
    let bias = config_flag(config, "use_bias", true);
    let with_bias = |mut names: Vec<&'static str>| {
        if bias {
            names.push("bias");
        }
        names
    };

    let names = match class_name(layer) {
        "Dense" | "Conv1D" | "Conv2D" | "Conv3D" | "Conv2DTranspose" | "Conv3DTranspose" => {
            with_bias(vec!["kernel"])
        }
        "DepthwiseConv2D" => with_bias(vec!["depthwise_kernel"]),
        "SeparableConv1D" | "SeparableConv2D" => {
            with_bias(vec!["depthwise_kernel", "pointwise_kernel"])
        }
        "LSTMCell" | "GRUCell" | "SimpleRNNCell" => with_bias(vec!["kernel", "recurrent_kernel"]),
        "BatchNormalization" => {
            let mut names = Vec::new();
            if config_flag(config, "scale", true) {
                names.push("gamma");
            }
            if config_flag(config, "center", true) {
                names.push("beta");
            }
            names.extend(["moving_mean", "moving_variance"]);
            names
        }
        "LayerNormalization" => {
            let mut names = Vec::new();
            if config_flag(config, "scale", true) {
                names.push("gamma");
            }
            if config_flag(config, "center", true) {
                names.push("beta");
            }
            names
        }
        "Embedding" => vec!["embeddings"],
        "PReLU" => vec!["alpha"],
        _ => return None,
    };
    Some(names)
}

// ---------------------------------------------------------------------------
// Keras weight-file keys
// ---------------------------------------------------------------------------

static PASCAL_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("static regex"));
static LOWER_UPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])([A-Z])").expect("static regex"));
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("static regex"));

/// Keras' class-name to snake_case rule (`MaxPooling2D` -> `max_pooling2d`).
pub fn to_snake_case(name: &str) -> String {
    let name = NON_WORD.replace_all(name, "");
    let name = PASCAL_WORD.replace_all(&name, "${1}_${2}");
    LOWER_UPPER.replace_all(&name, "${1}_${2}").to_lowercase()
}

/// Assigns the per-container keys Keras uses for list members: the
/// snake_case class name, suffixed `_1`, `_2`, ... on repeats.
#[derive(Debug, Default)]
pub struct ContainerKeys {
    used: std::collections::HashMap<String, usize>,
}

impl ContainerKeys {
    pub fn next_key(&mut self, class_name: &str) -> String {
        let base = to_snake_case(class_name);
        match self.used.get_mut(&base) {
            Some(count) => {
                *count += 1;
                format!("{base}_{count}")
            }
            None => {
                self.used.insert(base.clone(), 0);
                base
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Support check
// ---------------------------------------------------------------------------

/// Walk a topology and fail on the first layer TensorFlow.js cannot load.
pub fn check_supported(layer: &Value) -> Result<(), ConvertError> {
    let class = class_name(layer);
    if !is_supported(class) {
        return Err(ConvertError::UnsupportedLayer {
            layer: layer_name(layer).to_string(),
            class_name: class.to_string(),
        });
    }
    for nested in container_layers(layer) {
        check_supported(nested)?;
    }
    if matches!(class, "TimeDistributed" | "Bidirectional") {
        for sub in sub_layers(layer, layer_name(layer)) {
            check_supported(&sub.layer)?;
        }
    }
    Ok(())
}
