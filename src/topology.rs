//! Keras 3 config -> TensorFlow.js layers topology.
//!
//! Keras 3 serializes objects with bookkeeping keys (`module`,
//! `registered_name`, `build_config`), dtype policies as nested objects and
//! functional graph edges as `args`/`kwargs` call records. TensorFlow.js
//! layers reads the older Keras 2 shapes, so every rewrite here maps one
//! Keras 3 shape onto its Keras 2 counterpart. All rewrites are idempotent:
//! normalizing an already-normalized topology changes nothing.

use serde_json::{Map, Value, json};

/// Keys that only matter to the Python deserializer.
const BOOKKEEPING_KEYS: &[&str] = &[
    "module",
    "registered_name",
    "build_config",
    "compile_config",
    "shared_object_id",
];

const DTYPE_POLICY_CLASSES: &[&str] = &["DTypePolicy", "FloatDTypePolicy"];

const KERAS_TENSOR: &str = "__keras_tensor__";

/// Build the `modelTopology` object written into `model.json`.
pub fn to_tfjs_topology(
    model_config: &Value,
    keras_version: Option<&str>,
    backend: Option<&str>,
) -> Value {
    let mut config = model_config.clone();
    normalize(&mut config);
    json!({
        "keras_version": keras_version.unwrap_or("unknown"),
        "backend": backend.unwrap_or("tensorflow"),
        "model_config": config,
    })
}

/// Extract the model config from a `modelTopology` written by
/// [`to_tfjs_topology`] (or a bare `{class_name, config}` object).
pub fn model_config(topology: &Value) -> &Value {
    topology.get("model_config").unwrap_or(topology)
}

/// Rewrite a Keras config tree in place.
pub fn normalize(value: &mut Value) {
    if let Some(policy) = value.as_object().and_then(dtype_policy_name) {
        *value = Value::String(policy);
        return;
    }
    match value {
        Value::Object(map) => {
            if map.contains_key("class_name") {
                for key in BOOKKEEPING_KEYS {
                    map.remove(*key);
                }
            }
            if let Some(shape) = map.remove("batch_shape") {
                map.entry("batch_input_shape").or_insert(shape);
            }
            if let Some(nodes) = map.get_mut("inbound_nodes") {
                rewrite_inbound_nodes(nodes);
            }
            for key in ["input_layers", "output_layers"] {
                if let Some(triples) = map.get_mut(key) {
                    wrap_single_triple(triples);
                }
            }
            for child in map.values_mut() {
                normalize(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize(item);
            }
        }
        _ => {}
    }
}

fn dtype_policy_name(map: &Map<String, Value>) -> Option<String> {
    let class = map.get("class_name")?.as_str()?;
    if !DTYPE_POLICY_CLASSES.contains(&class) {
        return None;
    }
    map.get("config")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// `["input_layer", 0, 0]` -> `[["input_layer", 0, 0]]`.
fn wrap_single_triple(value: &mut Value) {
    let is_single = value
        .as_array()
        .and_then(|items| items.first())
        .is_some_and(Value::is_string);
    if is_single {
        *value = Value::Array(vec![value.take()]);
    }
}

/// Convert each Keras 3 call record into a Keras 2 node: a list of
/// `[layer, node_index, tensor_index, kwargs]` entries.
fn rewrite_inbound_nodes(nodes: &mut Value) {
    let Some(items) = nodes.as_array_mut() else {
        return;
    };
    for node in items.iter_mut() {
        let Some(record) = node.as_object() else {
            continue;
        };
        let mut histories = Vec::new();
        if let Some(args) = record.get("args") {
            collect_keras_histories(args, &mut histories);
        }
        let kwargs = match record.get("kwargs") {
            Some(kw) if kw.is_object() && !contains_keras_tensor(kw) => kw.clone(),
            _ => json!({}),
        };
        let entries = histories
            .into_iter()
            .map(|(layer, node_index, tensor_index)| {
                json!([layer, node_index, tensor_index, kwargs.clone()])
            })
            .collect();
        *node = Value::Array(entries);
    }
}

fn keras_history(value: &Value) -> Option<(String, u64, u64)> {
    if value.get("class_name")?.as_str()? != KERAS_TENSOR {
        return None;
    }
    let history = value.get("config")?.get("keras_history")?.as_array()?;
    let layer = history.first()?.as_str()?.to_string();
    let node_index = history.get(1)?.as_u64()?;
    let tensor_index = history.get(2)?.as_u64()?;
    Some((layer, node_index, tensor_index))
}

fn collect_keras_histories(value: &Value, out: &mut Vec<(String, u64, u64)>) {
    if let Some(history) = keras_history(value) {
        out.push(history);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_keras_histories(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_keras_histories(v, out)),
        _ => {}
    }
}

fn contains_keras_tensor(value: &Value) -> bool {
    let mut found = Vec::new();
    collect_keras_histories(value, &mut found);
    !found.is_empty()
}
