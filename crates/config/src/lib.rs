//! Configuration loading, validation, and env substitution.
//!
//! Config files: `courier.toml`, `courier.yaml`, `courier.yml`, or `courier.json`
//! Searched in `./` then the user config directory (`~/.config/courier/`).
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file before parsing, and `COURIER_*` overrides for the dispatch limits.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config,
        parse_config,
    },
    schema::{ALL_GROUP, ChatConfig, CourierConfig, DispatchConfig, MAX_CONCURRENCY_IN_SESSION},
    template::default_config_template,
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config, validate_str},
};
