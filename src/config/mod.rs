//! Configuration management
//!
//! Settings come from a TOML file with `LEDGER_*` environment overrides.
//! Nothing is global: `main` loads a [`Config`] and hands the pieces down.

pub mod settings;

pub use settings::{Config, DEFAULT_CONFIG_FILE};
