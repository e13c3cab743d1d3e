#![allow(dead_code)]

use async_trait::async_trait;
use onnx_convert::error::{ConvertError, Result};
use onnx_convert::hub::Credential;
use onnx_convert::pipeline::{
    Coordinator, ExportOptions, ExportedModel, Exporter, FetchedModel,
    ModelFetcher, ModelId, Publisher,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const EXPORT_BYTES: u64 = 4_000;
pub const QUANTIZED_BYTES: u64 = 1_000;

/// In-memory stand-in for the hub and the exporter
#[derive(Default)]
pub struct FakeHub {
    pub models: HashSet<String>,
    pub unsupported: HashSet<String>,
    pub accounts: HashMap<String, String>,
    pub existing_repos: HashSet<String>,
    /// Simulated export duration
    pub export_delay: Option<Duration>,
    steps: Mutex<Vec<String>>,
    published: Mutex<Vec<String>>,
}

impl FakeHub {
    pub fn new() -> Self {
        let mut hub = Self::default();
        hub.models.insert("EleutherAI/pythia-14m".to_string());
        hub.models.insert("alice/tiny-bert".to_string());
        hub.models.insert("state-spaces/mamba-130m".to_string());
        hub.unsupported.insert("state-spaces/mamba-130m".to_string());
        hub.accounts.insert("hf_alice".to_string(), "alice".to_string());
        hub.accounts.insert("hf_bob".to_string(), "bob".to_string());
        hub
    }

    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    fn record(&self, step: &str) {
        self.steps.lock().unwrap().push(step.to_string());
    }
}

#[async_trait]
impl ModelFetcher for FakeHub {
    async fn fetch(&self, model_id: &ModelId, _credential: Option<&Credential>) -> Result<FetchedModel> {
        self.record("fetch");
        if !self.models.contains(&model_id.to_string()) {
            return Err(ConvertError::NotFound(format!(
                "{model_id} does not exist or is not accessible"
            )));
        }
        Ok(FetchedModel {
            model_id: model_id.clone(),
            revision: "main".to_string(),
            snapshot_dir: PathBuf::from("/cache/snapshot"),
            files: vec!["config.json".to_string(), "model.safetensors".to_string()],
            total_bytes: 16_000,
        })
    }
}

#[async_trait]
impl Exporter for FakeHub {
    async fn export(&self, model: &FetchedModel, _options: &ExportOptions) -> Result<ExportedModel> {
        self.record("export");
        if let Some(delay) = self.export_delay {
            tokio::time::sleep(delay).await;
        }
        if self.unsupported.contains(&model.model_id.to_string()) {
            return Err(ConvertError::Export(
                "Unsupported model architecture: mamba".to_string(),
            ));
        }
        Ok(ExportedModel {
            model_id: model.model_id.clone(),
            output_dir: PathBuf::from("/cache/output").join(model.model_id.to_string()),
            onnx_files: vec![PathBuf::from("onnx/model.onnx")],
            artifact_bytes: EXPORT_BYTES,
            log: "exported".to_string(),
        })
    }

    async fn quantize(&self, exported: &ExportedModel) -> Result<ExportedModel> {
        self.record("quantize");
        Ok(ExportedModel {
            onnx_files: vec![PathBuf::from("onnx/model_quantized.onnx")],
            artifact_bytes: QUANTIZED_BYTES,
            ..exported.clone()
        })
    }
}

#[async_trait]
impl Publisher for FakeHub {
    async fn whoami(&self, credential: &Credential) -> Result<String> {
        self.accounts
            .get(credential.expose())
            .cloned()
            .ok_or_else(|| ConvertError::Auth("Access token is invalid or expired".to_string()))
    }

    async fn repo_exists(&self, repo_id: &str, _credential: &Credential) -> Result<bool> {
        Ok(self.existing_repos.contains(repo_id) || self.published().iter().any(|p| p == repo_id))
    }

    async fn publish(&self, _exported: &ExportedModel, destination: &str, credential: &Credential) -> Result<()> {
        self.record("publish");
        self.whoami(credential).await?;
        self.published.lock().unwrap().push(destination.to_string());
        Ok(())
    }

    fn repo_url(&self, repo_id: &str) -> String {
        format!("https://huggingface.co/{repo_id}")
    }
}

pub fn coordinator(hub: &Arc<FakeHub>, token: Option<&str>) -> Coordinator {
    Coordinator::new(
        hub.clone(),
        hub.clone(),
        hub.clone(),
        token.and_then(Credential::new),
    )
}

