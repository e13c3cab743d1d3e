#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod hub;
pub mod pipeline;
pub mod toolchain;
pub mod web;

pub use error::{ConvertError, Result};
pub use pipeline::{ConversionRequest, ConversionResult, Coordinator};
