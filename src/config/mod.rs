//! Configuration module for onnx-convert
//!
//! Loads config from `$ONNX_CONVERT_CONFIG`, else `$XDG_CONFIG_HOME/onnx-convert/config.toml`
//! or `~/.config/onnx-convert/config.toml`.
//! Falls back to embedded defaults if the file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use onnx_convert::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Port: {}", config.server.port);
//! println!("Exporter version: {}", config.toolchain.transformers_version);
//! ```

pub mod schema;

pub use schema::Config;
