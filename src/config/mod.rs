// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Convert and validate the raw file into a [`Configuration`] (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    Configuration, Container, ContainerName, HealthCheckConfig, ImageSource, PortMapping,
    RunAsCurrentUserConfig, SetupCommand, Task, TaskRunConfiguration, VolumeMount,
};
pub use validate::parse_duration;
