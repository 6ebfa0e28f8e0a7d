// src/config/mod.rs

//! Build file loading and validation.
//!
//! - `model.rs` defines the TOML-backed data model.
//! - `loader.rs` reads a build file from disk.
//! - `validate.rs` checks references between tasks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{BuildFile, BuildSection, IncludedBuild, RawBuildFile, TaskConfig, TaskRef};
pub use validate::validate_raw_build_file;
