//! HOGP bridge CLI library
//!
//! Command-line parsing, layered configuration and the glue that runs a
//! [`hogp_core::Bridge`] over the platform BLE transport with input events
//! read from stdin.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::{AppConfig, ConfigError, LoggingConfig, Overrides};
pub use error::{CliError, Result};
