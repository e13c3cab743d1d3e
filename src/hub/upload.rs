//! Folder upload through the hub commit API.
//!
//! Files are classified by the preupload endpoint. LFS files are pushed
//! through the git-lfs batch API (single PUT or multipart), then every file
//! lands in one NDJSON commit: regular files inline as base64, LFS files as
//! pointers by sha256.

use crate::error::{ConvertError, Result};
use crate::hub::{status_error, Credential, HubClient};
use crate::pipeline::naming::model_card;
use crate::pipeline::{ExportedModel, Publisher};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";
const SAMPLE_BYTES: usize = 512;
const PREUPLOAD_BATCH: usize = 256;

/// A file staged for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path_in_repo: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub sha256: String,
    sample: Vec<u8>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum UploadMode {
    Lfs,
    Regular,
}

#[derive(Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadFile {
    path: String,
    upload_mode: UploadMode,
    #[serde(default)]
    should_ignore: bool,
}

#[derive(Deserialize, Debug)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Deserialize, Debug)]
struct LfsObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsObjectError>,
}

#[derive(Deserialize, Debug)]
struct LfsActions {
    upload: Option<LfsAction>,
    verify: Option<LfsAction>,
}

#[derive(Deserialize, Debug)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: HashMap<String, String>,
}

#[derive(Deserialize, Debug)]
struct LfsObjectError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    commit_url: Option<String>,
}

/// One operation in a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOp {
    Regular { path: String, content: Vec<u8> },
    Lfs { path: String, oid: String },
}

/// Publishes export folders to the hub
#[derive(Debug, Clone)]
pub struct HubPublisher {
    client: HubClient,
    revision: String,
    private: bool,
}

impl HubPublisher {
    #[must_use]
    pub const fn new(client: HubClient, revision: String, private: bool) -> Self {
        Self {
            client,
            revision,
            private,
        }
    }

    /// Upload every file under `folder` to `repo_id` in a single commit
    pub async fn upload_folder(
        &self,
        folder: &Path,
        repo_id: &str,
        summary: &str,
        credential: &Credential,
    ) -> Result<Option<String>> {
        let root = folder.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(|e| ConvertError::Other(format!("File scan task failed: {e}")))??;

        if files.is_empty() {
            return Err(ConvertError::Upload(format!(
                "Nothing to upload in {}",
                folder.display()
            )));
        }

        let modes = self.preupload(repo_id, &files, credential).await?;

        let mut ops = Vec::with_capacity(files.len());
        let mut lfs_files = Vec::new();
        for file in &files {
            match modes.get(&file.path_in_repo) {
                None => {
                    tracing::debug!("Hub ignores {}, skipping", file.path_in_repo);
                }
                Some(UploadMode::Lfs) => {
                    lfs_files.push(file);
                    ops.push(CommitOp::Lfs {
                        path: file.path_in_repo.clone(),
                        oid: file.sha256.clone(),
                    });
                }
                Some(UploadMode::Regular) => {
                    ops.push(CommitOp::Regular {
                        path: file.path_in_repo.clone(),
                        content: tokio::fs::read(&file.local_path).await?,
                    });
                }
            }
        }

        if !lfs_files.is_empty() {
            self.upload_lfs(repo_id, &lfs_files, credential).await?;
        }

        self.commit(repo_id, summary, &ops, credential).await
    }

    async fn preupload(
        &self,
        repo_id: &str,
        files: &[LocalFile],
        credential: &Credential,
    ) -> Result<HashMap<String, UploadMode>> {
        let url = self
            .client
            .url(&format!("api/models/{repo_id}/preupload/{}", self.revision));
        let mut modes = HashMap::with_capacity(files.len());

        for batch in files.chunks(PREUPLOAD_BATCH) {
            let payload = serde_json::json!({
                "files": batch.iter().map(|f| serde_json::json!({
                    "path": f.path_in_repo,
                    "sample": BASE64.encode(&f.sample),
                    "size": f.size,
                })).collect::<Vec<_>>(),
            });

            let response = self
                .client
                .http()
                .post(&url)
                .header(reqwest::header::AUTHORIZATION, credential.bearer())
                .json(&payload)
                .send()
                .await
                .map_err(|e| ConvertError::Upload(format!("Preupload request failed: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(status_error(status, response.text().await.unwrap_or_default()));
            }

            let body: PreuploadResponse = response
                .json()
                .await
                .map_err(|e| ConvertError::Upload(format!("Invalid preupload response: {e}")))?;

            for file in body.files.into_iter().filter(|f| !f.should_ignore) {
                modes.insert(file.path, file.upload_mode);
            }
        }

        Ok(modes)
    }

    async fn upload_lfs(
        &self,
        repo_id: &str,
        files: &[&LocalFile],
        credential: &Credential,
    ) -> Result<()> {
        let response = self
            .client
            .http()
            .post(self.client.url(&format!("{repo_id}.git/info/lfs/objects/batch")))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .header(reqwest::header::ACCEPT, LFS_CONTENT_TYPE)
            .header(reqwest::header::CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(lfs_batch_request(files, &self.revision).to_string())
            .send()
            .await
            .map_err(|e| ConvertError::Upload(format!("LFS batch request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }

        let batch: LfsBatchResponse = response
            .json()
            .await
            .map_err(|e| ConvertError::Upload(format!("Invalid LFS batch response: {e}")))?;

        for object in batch.objects {
            if let Some(err) = object.error {
                return Err(ConvertError::Upload(format!(
                    "LFS rejected {} ({}): {}",
                    object.oid, err.code, err.message
                )));
            }

            let file = files
                .iter()
                .find(|f| f.sha256 == object.oid)
                .ok_or_else(|| {
                    ConvertError::Upload(format!("LFS returned unknown object {}", object.oid))
                })?;

            let Some(actions) = object.actions else {
                tracing::debug!("{} already stored, skipping", file.path_in_repo);
                continue;
            };

            if let Some(upload) = actions.upload {
                tracing::info!("Uploading {} ({} bytes)", file.path_in_repo, file.size);
                if upload.header.contains_key("chunk_size") {
                    self.upload_multipart(file, &upload).await?;
                } else {
                    self.upload_single(file, &upload).await?;
                }
            }

            if let Some(verify) = actions.verify {
                self.verify(file, &verify, credential).await?;
            }
        }

        Ok(())
    }

    async fn upload_single(&self, file: &LocalFile, action: &LfsAction) -> Result<()> {
        let body = tokio::fs::read(&file.local_path).await?;
        let mut request = self.client.http().put(&action.href).body(body);
        for (name, value) in &action.header {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConvertError::Upload(format!("Upload of {} failed: {e}", file.path_in_repo)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn upload_multipart(&self, file: &LocalFile, action: &LfsAction) -> Result<()> {
        let (chunk_size, part_urls) = multipart_plan(&action.header)?;
        let mut handle = tokio::fs::File::open(&file.local_path).await?;
        let mut parts = Vec::with_capacity(part_urls.len());

        for (part_number, url) in part_urls {
            let offset = u64::from(part_number - 1) * chunk_size;
            let len = chunk_size.min(file.size.saturating_sub(offset));
            let mut chunk = vec![0u8; usize::try_from(len).map_err(|_| {
                ConvertError::Upload(format!("Chunk too large for {}", file.path_in_repo))
            })?];
            handle.seek(std::io::SeekFrom::Start(offset)).await?;
            handle.read_exact(&mut chunk).await?;

            let response = self
                .client
                .http()
                .put(url)
                .body(chunk)
                .send()
                .await
                .map_err(|e| {
                    ConvertError::Upload(format!(
                        "Part {part_number} of {} failed: {e}",
                        file.path_in_repo
                    ))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(status_error(status, response.text().await.unwrap_or_default()));
            }

            let etag = response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    ConvertError::Upload(format!("Part {part_number} returned no ETag"))
                })?
                .to_string();

            tracing::debug!("Uploaded part {part_number} of {}", file.path_in_repo);
            parts.push(serde_json::json!({ "partNumber": part_number, "etag": etag }));
        }

        let response = self
            .client
            .http()
            .post(&action.href)
            .header(reqwest::header::ACCEPT, LFS_CONTENT_TYPE)
            .header(reqwest::header::CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(serde_json::json!({ "oid": file.sha256, "parts": parts }).to_string())
            .send()
            .await
            .map_err(|e| ConvertError::Upload(format!("Completing multipart upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn verify(&self, file: &LocalFile, action: &LfsAction, credential: &Credential) -> Result<()> {
        let mut request = self
            .client
            .http()
            .post(&action.href)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .json(&serde_json::json!({ "oid": file.sha256, "size": file.size }));
        for (name, value) in &action.header {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConvertError::Upload(format!("LFS verify failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn commit(
        &self,
        repo_id: &str,
        summary: &str,
        ops: &[CommitOp],
        credential: &Credential,
    ) -> Result<Option<String>> {
        let response = self
            .client
            .http()
            .post(
                self.client
                    .url(&format!("api/models/{repo_id}/commit/{}", self.revision)),
            )
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(commit_payload(summary, ops))
            .send()
            .await
            .map_err(|e| ConvertError::Upload(format!("Commit request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }

        let body: CommitResponse = response
            .json()
            .await
            .map_err(|e| ConvertError::Upload(format!("Invalid commit response: {e}")))?;
        Ok(body.commit_url)
    }
}

#[async_trait]
impl Publisher for HubPublisher {
    async fn whoami(&self, credential: &Credential) -> Result<String> {
        self.client.whoami(credential).await
    }

    async fn repo_exists(&self, repo_id: &str, credential: &Credential) -> Result<bool> {
        self.client.repo_exists(repo_id, Some(credential)).await
    }

    async fn publish(
        &self,
        exported: &ExportedModel,
        destination: &str,
        credential: &Credential,
    ) -> Result<()> {
        let readme = exported.output_dir.join("README.md");
        if !readme.exists() {
            fs::write(&readme, model_card(&exported.model_id, self.client.endpoint()))?;
        }

        self.client
            .create_repo(destination, self.private, credential)
            .await?;

        let summary = format!("Add ONNX weights for {}", exported.model_id);
        let commit_url = self
            .upload_folder(&exported.output_dir, destination, &summary, credential)
            .await?;

        if let Some(url) = commit_url {
            tracing::info!("Committed {url}");
        }
        Ok(())
    }

    fn repo_url(&self, repo_id: &str) -> String {
        self.client.repo_url(repo_id)
    }
}

/// Walk `root`, hashing every non-hidden file
pub fn collect_files(root: &Path) -> Result<Vec<LocalFile>> {
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ConvertError::Other(format!("Unexpected path outside root: {e}")))?;
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if components.iter().any(|c| c.starts_with('.')) {
            continue;
        }

        let (sha256, sample, size) = hash_file(entry.path())?;
        files.push(LocalFile {
            path_in_repo: components.join("/"),
            local_path: entry.path().to_path_buf(),
            size,
            sha256,
            sample,
        });
    }

    Ok(files)
}

fn hash_file(path: &Path) -> Result<(String, Vec<u8>, u64)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut sample = Vec::with_capacity(SAMPLE_BYTES);
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if sample.len() < SAMPLE_BYTES {
            let take = (SAMPLE_BYTES - sample.len()).min(n);
            sample.extend_from_slice(&buf[..take]);
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((hex::encode(hasher.finalize()), sample, size))
}

fn lfs_batch_request(files: &[&LocalFile], revision: &str) -> serde_json::Value {
    serde_json::json!({
        "operation": "upload",
        "transfers": ["basic", "multipart"],
        "hash_algo": "sha256",
        "ref": { "name": revision },
        "objects": files.iter().map(|f| serde_json::json!({
            "oid": f.sha256,
            "size": f.size,
        })).collect::<Vec<_>>(),
    })
}

/// Chunk size and ordered part URLs from a multipart upload action
fn multipart_plan(header: &HashMap<String, String>) -> Result<(u64, Vec<(u32, &str)>)> {
    let chunk_size = header
        .get("chunk_size")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .ok_or_else(|| ConvertError::Upload("Multipart upload without chunk_size".to_string()))?;

    let mut parts: Vec<(u32, &str)> = header
        .iter()
        .filter_map(|(k, v)| k.parse::<u32>().ok().map(|n| (n, v.as_str())))
        .filter(|(n, _)| *n > 0)
        .collect();
    parts.sort_unstable_by_key(|(n, _)| *n);

    if parts.is_empty() {
        return Err(ConvertError::Upload(
            "Multipart upload without part URLs".to_string(),
        ));
    }
    Ok((chunk_size, parts))
}

/// NDJSON body for the commit endpoint
#[must_use]
pub fn commit_payload(summary: &str, ops: &[CommitOp]) -> String {
    let mut lines = Vec::with_capacity(ops.len() + 1);
    lines.push(serde_json::json!({
        "key": "header",
        "value": { "summary": summary, "description": "" },
    }));

    for op in ops {
        lines.push(match op {
            CommitOp::Regular { path, content } => serde_json::json!({
                "key": "file",
                "value": { "content": BASE64.encode(content), "path": path, "encoding": "base64" },
            }),
            CommitOp::Lfs { path, oid } => serde_json::json!({
                "key": "lfsFile",
                "value": { "path": path, "algo": "sha256", "oid": oid },
            }),
        });
    }

    let mut body = lines
        .iter()
        .map(serde_json::Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    body.push('\n');
    body
}
