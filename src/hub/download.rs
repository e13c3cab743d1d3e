use crate::error::{ConvertError, Result};
use crate::hub::{Credential, HubClient, Sibling};
use crate::pipeline::{FetchedModel, ModelFetcher, ModelId};
use async_trait::async_trait;
use hf_hub::api::tokio::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::fs;
use std::path::PathBuf;

/// Extensions the exporter needs from a source repository
const WANTED_EXTENSIONS: &[&str] = &["json", "txt", "model", "py", "tiktoken", "safetensors"];

/// Model downloader backed by the hf-hub cache
pub struct HubFetcher {
    client: HubClient,
    cache_dir: PathBuf,
    revision: String,
    min_free_mb: u64,
}

impl HubFetcher {
    /// Create new fetcher writing into `cache_dir`
    pub fn new(
        client: HubClient,
        cache_dir: PathBuf,
        revision: String,
        min_free_mb: u64,
    ) -> Result<Self> {
        fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            client,
            cache_dir,
            revision,
            min_free_mb,
        })
    }

    /// Check if enough disk space is available
    #[allow(clippy::unnecessary_cast)]
    fn check_disk_space(&self, required_bytes: u64) -> Result<()> {
        let stats = nix::sys::statvfs::statvfs(&self.cache_dir)
            .map_err(|e| ConvertError::Other(format!("Failed to check disk space: {e}")))?;

        let available_bytes = stats.blocks_available() as u64 * stats.block_size() as u64;
        let required_with_buffer = required_bytes + self.min_free_mb * 1_024 * 1_024;

        if available_bytes < required_with_buffer {
            return Err(ConvertError::Network(format!(
                "Not enough disk space in {}: {} required, {} available",
                self.cache_dir.display(),
                format_bytes(required_with_buffer),
                format_bytes(available_bytes)
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ModelFetcher for HubFetcher {
    async fn fetch(
        &self,
        model_id: &ModelId,
        credential: Option<&Credential>,
    ) -> Result<FetchedModel> {
        let repo_id = model_id.to_string();
        let info = self.client.model_info(&repo_id, credential).await?;

        let selected = select_files(&info.siblings);
        if selected.is_empty() {
            return Err(ConvertError::Export(format!(
                "{repo_id} has no configuration or weight files to convert"
            )));
        }

        let expected_bytes: u64 = selected.iter().filter_map(|s| s.size).sum();
        self.check_disk_space(expected_bytes)?;

        tracing::info!(
            "Downloading {} files ({}) for {repo_id}",
            selected.len(),
            format_bytes(expected_bytes)
        );

        let api = ApiBuilder::new()
            .with_endpoint(self.client.endpoint().to_string())
            .with_cache_dir(self.cache_dir.clone())
            .with_token(credential.map(|c| c.expose().to_string()))
            .with_progress(false)
            .build()
            .map_err(|e| ConvertError::Network(format!("Failed to initialize hub API: {e}")))?;

        let repo = api.repo(Repo::with_revision(
            repo_id.clone(),
            RepoType::Model,
            self.revision.clone(),
        ));

        let mut snapshot_dir = None;
        let mut files = Vec::with_capacity(selected.len());
        let mut total_bytes = 0;

        for sibling in selected {
            let path = repo.get(&sibling.rfilename).await.map_err(|e| {
                ConvertError::Network(format!("Failed to download {}: {e}", sibling.rfilename))
            })?;
            tracing::debug!("Fetched {} -> {}", sibling.rfilename, path.display());

            total_bytes += fs::metadata(&path).map_or(0, |m| m.len());
            if snapshot_dir.is_none() {
                snapshot_dir = snapshot_root(&path, &sibling.rfilename);
            }
            files.push(sibling.rfilename.clone());
        }

        let snapshot_dir = snapshot_dir.ok_or_else(|| {
            ConvertError::Other(format!("Cannot locate snapshot directory for {repo_id}"))
        })?;

        tracing::info!("Downloaded {repo_id} ({})", format_bytes(total_bytes));

        Ok(FetchedModel {
            model_id: model_id.clone(),
            revision: info.sha.unwrap_or_else(|| self.revision.clone()),
            snapshot_dir,
            files,
            total_bytes,
        })
    }
}

/// Pick the files the exporter reads.
///
/// Safetensors weights are preferred; `.bin` weights are only fetched when
/// the repository has no safetensors. Other frameworks' formats and
/// existing ONNX exports are skipped.
#[must_use]
pub fn select_files(siblings: &[Sibling]) -> Vec<&Sibling> {
    let has_safetensors = siblings
        .iter()
        .any(|s| extension(&s.rfilename) == Some("safetensors"));

    siblings
        .iter()
        .filter(|s| !s.rfilename.starts_with("onnx/") && !s.rfilename.starts_with('.'))
        .filter(|s| match extension(&s.rfilename) {
            Some("bin") => !has_safetensors,
            Some(ext) => WANTED_EXTENSIONS.contains(&ext),
            None => false,
        })
        .collect()
}

fn extension(filename: &str) -> Option<&str> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
}

/// Strip the repo-relative filename off a downloaded path
fn snapshot_root(path: &std::path::Path, rfilename: &str) -> Option<PathBuf> {
    let depth = rfilename.split('/').count();
    let mut root = path;
    for _ in 0..depth {
        root = root.parent()?;
    }
    Some(root.to_path_buf())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
