//! transformers.js conversion scripts.
//!
//! The scripts live in a versioned checkout (`repo_path`) and run as
//! `python -m scripts.<name>` with that checkout as working directory.

pub mod archive;
pub mod export;

use crate::config::schema::ToolchainConfig;
use crate::error::{ConvertError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use subprocess::{Exec, Redirection};

pub use export::ScriptExporter;

/// Captured output of one script run
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Location and interpreter of the conversion scripts
#[derive(Debug, Clone)]
pub struct Toolchain {
    repo_path: PathBuf,
    python: PathBuf,
    version: String,
    archive_base_url: String,
    quantize_modes: Vec<String>,
}

impl Toolchain {
    /// Create toolchain from config, locating the Python interpreter
    pub fn from_config(config: &ToolchainConfig) -> Result<Self> {
        let python = match &config.python {
            Some(python) => python.clone(),
            None => find_python()?,
        };

        Ok(Self {
            repo_path: config.repo_path.clone(),
            python,
            version: config.transformers_version.clone(),
            archive_base_url: config.archive_base_url.trim_end_matches('/').to_string(),
            quantize_modes: config.quantize_modes.clone(),
        })
    }

    #[must_use]
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    #[must_use]
    pub fn quantize_modes(&self) -> &[String] {
        &self.quantize_modes
    }

    /// Whether the scripts checkout is present
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.repo_path.join("scripts").is_dir()
    }

    /// Download and unpack the scripts checkout if missing
    pub async fn ensure_installed(&self) -> Result<()> {
        if self.is_installed() {
            tracing::debug!("Toolchain present at {}", self.repo_path.display());
            return Ok(());
        }

        archive::install(&self.archive_base_url, &self.version, &self.repo_path).await
    }

    /// Run `python -m <module> <args>` in the checkout.
    ///
    /// Blocks until the script exits; call from `spawn_blocking`.
    pub fn run_module(
        &self,
        module: &str,
        args: &[OsString],
        env: &[(&str, OsString)],
    ) -> Result<ScriptOutput> {
        if !self.is_installed() {
            return Err(ConvertError::Toolchain(format!(
                "Conversion scripts not found at {}",
                self.repo_path.display()
            )));
        }

        let mut exec = Exec::cmd(&self.python)
            .arg("-m")
            .arg(module)
            .args(args)
            .cwd(&self.repo_path)
            .stdout(Redirection::Pipe)
            .stderr(Redirection::Pipe);
        for (key, value) in env {
            exec = exec.env(key, value);
        }

        tracing::debug!("Running {} -m {module}", self.python.display());

        let capture = exec.capture().map_err(|e| {
            ConvertError::Toolchain(format!(
                "Failed to run {} -m {module}: {e}",
                self.python.display()
            ))
        })?;

        Ok(ScriptOutput {
            success: capture.success(),
            stdout: capture.stdout_str(),
            stderr: capture.stderr_str(),
        })
    }
}

fn find_python() -> Result<PathBuf> {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|_| {
            ConvertError::Toolchain("Python interpreter not found in PATH".to_string())
        })
}
