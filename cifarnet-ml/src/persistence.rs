//! Artifact persistence: models, training histories and sweep reports are
//! written as JSON through a `.tmp` sibling and renamed into place.

use crate::error::MlError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// JSON layout for written artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStyle {
    /// Human-readable; used for histories, reports and configs.
    Pretty,
    /// Single line; used for model weights.
    Compact,
}

/// Serialize `data` and atomically replace `path` with it, creating parent
/// directories as needed.
pub fn write_artifact<T: Serialize>(path: &Path, data: &T, style: JsonStyle) -> Result<(), MlError> {
    let bytes = match style {
        JsonStyle::Pretty => serde_json::to_vec_pretty(data)?,
        JsonStyle::Compact => serde_json::to_vec(data)?,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), "wrote artifact");
    Ok(())
}

/// Read and deserialize an artifact. A missing file is a `NotFound` error.
pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, MlError> {
    if !path.exists() {
        return Err(MlError::not_found(format!("{}", path.display())));
    }
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Path of an artifact named `stem` inside `dir`, with a `.json` extension.
pub fn artifact_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.json"))
}
