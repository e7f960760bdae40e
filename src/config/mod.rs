// src/config/mod.rs

//! Configuration loading and validation for ngbuild.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate apps, deadlines and integration references (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path};
pub use model::{AppConfig, AppSection, ConfigFile, ConfigSection, IntegrationConfig, RawConfigFile};
