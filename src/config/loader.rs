// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{Configuration, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path, validate it and resolve relative
/// paths against the directory containing the file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Configuration> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let mut config = Configuration::try_from(raw_config)?;

    let base = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    config.resolve_paths_relative_to(&base);

    Ok(config)
}
