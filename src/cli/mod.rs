//! Command-line interface
//!
//! Argument parsing for the ledger binary; `main.rs` maps each command to a
//! ledger operation.

pub mod commands;

pub use commands::{Command, Opt};
