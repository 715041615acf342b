//! Conversion pipeline orchestrator.
//!
//! Ties reading, layer validation, topology normalization and writing into
//! a single [`convert()`] call. Formats are wired in through the
//! [`ModelSource`] / [`ModelSink`] traits.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::formats::keras::KerasArchive;
use crate::formats::tfjs::TfjsLayers;
use crate::formats::{ModelSink, ModelSource, WriteOptions, WrittenArtifacts};
use crate::layers;
use crate::topology;

/// Outcome of a successful conversion.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Directory holding the converted model.
    pub output_dir: PathBuf,
    /// Files written, `model.json` first.
    pub written: WrittenArtifacts,
    /// Keras class of the top-level model.
    pub model_class: String,
    /// Total number of weight elements.
    pub parameter_count: usize,
}

/// Load the Keras model named by `config`, convert it and write the
/// TensorFlow.js artifacts.
///
/// The output directory is only touched once the model has been loaded
/// and every layer is known to be supported.
pub fn convert(config: &ConverterConfig) -> anyhow::Result<ConversionResult> {
    convert_with(&KerasArchive, &TfjsLayers, config)
}

/// [`convert`] with explicit source and sink formats.
pub fn convert_with(
    source: &dyn ModelSource,
    sink: &dyn ModelSink,
    config: &ConverterConfig,
) -> anyhow::Result<ConversionResult> {
    config.validate()?;
    info!(
        input = %config.input.display(),
        output = %config.output_dir.display(),
        source = source.slug(),
        target = sink.slug(),
        "starting conversion"
    );
    debug!(from = source.name(), to = sink.name(), "formats selected");

    let mut model = source.read_model(&config.input)?;
    layers::check_supported(&model.topology)?;
    let model_class = model.class_name().unwrap_or("?").to_string();

    model.topology = topology::to_tfjs_topology(
        &model.topology,
        model.keras_version.as_deref(),
        model.backend.as_deref(),
    );
    debug!(class = %model_class, "topology normalized");

    let opts = WriteOptions {
        shard_size_bytes: config.weight_shard_size_bytes,
        quantization: config.quantization,
        metadata: config.metadata.clone(),
    };
    let written = sink.write_model(&model, &config.output_dir, &opts)?;

    info!(
        output = %config.output_dir.display(),
        files = written.paths().len(),
        weights = written.weight_count,
        bytes = written.weight_bytes,
        "conversion complete"
    );
    Ok(ConversionResult {
        output_dir: config.output_dir.clone(),
        parameter_count: model.parameter_count(),
        model_class,
        written,
    })
}

// ---------------------------------------------------------------------------
// Atomic file writing
// ---------------------------------------------------------------------------

/// Outcome of a successful atomic write operation.
#[derive(Debug, Clone)]
pub struct AtomicWriteOutcome {
    /// Final destination path.
    pub target_path: PathBuf,
    /// Temp file used during write (already renamed away).
    pub temp_path: PathBuf,
    /// A previous file at the target was replaced.
    pub replaced: bool,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomicWriteFailStage {
    TempFileCreate,
    WriteAll,
    Flush,
    SyncAll,
    FinalRename,
}

#[cfg(test)]
thread_local! {
    static ATOMIC_WRITE_FAIL_STAGE: std::cell::Cell<Option<AtomicWriteFailStage>> = const {
        std::cell::Cell::new(None)
    };
}

#[cfg(test)]
fn set_atomic_write_fail_stage(stage: Option<AtomicWriteFailStage>) {
    ATOMIC_WRITE_FAIL_STAGE.with(|slot| slot.set(stage));
}

#[cfg(test)]
fn maybe_inject_atomic_write_failure(stage: AtomicWriteFailStage) -> std::io::Result<()> {
    let injected = ATOMIC_WRITE_FAIL_STAGE.with(|slot| slot.get() == Some(stage));
    if injected {
        return Err(std::io::Error::other(format!(
            "injected atomic_write failure at stage {stage:?}"
        )));
    }
    Ok(())
}

/// Write `content` atomically to `target_path` using temp-then-rename.
///
/// Either the previous target remains intact, or the new target is fully
/// written and fsynced. An existing target is replaced.
pub fn atomic_write(target_path: &Path, content: &[u8]) -> Result<AtomicWriteOutcome, ConvertError> {
    use std::io::Write;

    let write_error = |detail: String| ConvertError::ArtifactWriteError {
        path: target_path.to_path_buf(),
        detail,
    };

    if let Some(parent) = target_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| write_error(format!("failed to create parent directories: {e}")))?;
    }
    let replaced = target_path.exists();

    // Temp file in the same directory so the rename stays on one filesystem.
    let temp_name = format!(".kerasjs-tmp-{}", uuid::Uuid::new_v4().as_hyphenated());
    let temp_path = target_path
        .parent()
        .unwrap_or(Path::new("."))
        .join(&temp_name);

    let write_result = (|| -> Result<(), std::io::Error> {
        #[cfg(test)]
        maybe_inject_atomic_write_failure(AtomicWriteFailStage::TempFileCreate)?;
        let mut file = std::fs::File::create(&temp_path)?;
        #[cfg(test)]
        maybe_inject_atomic_write_failure(AtomicWriteFailStage::WriteAll)?;
        file.write_all(content)?;
        #[cfg(test)]
        maybe_inject_atomic_write_failure(AtomicWriteFailStage::Flush)?;
        file.flush()?;
        #[cfg(test)]
        maybe_inject_atomic_write_failure(AtomicWriteFailStage::SyncAll)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(write_error(format!("failed to write temp file: {e}")));
    }

    let rename_result = (|| -> Result<(), std::io::Error> {
        #[cfg(test)]
        maybe_inject_atomic_write_failure(AtomicWriteFailStage::FinalRename)?;
        std::fs::rename(&temp_path, target_path)
    })();

    if let Err(e) = rename_result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(write_error(format!(
            "failed to rename temp file to target: {e}"
        )));
    }

    debug!(target = %target_path.display(), bytes = content.len(), replaced, "atomic write complete");

    Ok(AtomicWriteOutcome {
        target_path: target_path.to_path_buf(),
        temp_path,
        replaced,
    })
}
