//! CLI module
//!
//! Command-line interface for running a CRN-25 node.

pub mod args;
pub mod config;

pub use args::{CliArgs, Command};
pub use config::Config;
