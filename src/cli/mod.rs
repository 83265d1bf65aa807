//! Command Line Interface for glided
// (c) 2025 The glided developers
mod args;
pub use args::{CliArgs, DEFAULT_PORT};
mod cli_main;
pub use cli_main::cli;
