// src/config/mod.rs

//! Configuration loading.
//!
//! - [`model`] mirrors the TOML layout (`[run]`, `[[proxy]]`,
//!   `[[certificate]]`).
//! - [`validate`] turns a `RawConfigFile` into a checked `ConfigFile` and
//!   converts it into run options.
//! - [`loader`] reads config, collection, variable and data files.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    default_config_path, load_and_validate, load_collection, load_data_file, load_from_path,
    load_or_default, load_variables_file,
};
pub use model::{ConfigFile, RawConfigFile};
