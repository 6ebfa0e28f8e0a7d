// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{BuildFile, RawBuildFile};
use crate::errors::Result;

/// Load a build file from a given path and return the raw `RawBuildFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawBuildFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

/// Deserialize a build file from TOML text.
pub fn load_from_str(contents: &str) -> Result<RawBuildFile> {
    let raw: RawBuildFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Load a build file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for unknown task references, self references and a sane
///   `[build]` section.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<BuildFile> {
    let raw = load_from_path(&path)?;
    BuildFile::try_from(raw)
}

/// Build file used when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Workplan.toml")
}
