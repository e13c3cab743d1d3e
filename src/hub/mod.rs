pub mod auth;
pub mod download;
pub mod upload;

use crate::error::{ConvertError, Result};
use reqwest::StatusCode;
use serde::Deserialize;

pub use auth::Credential;
pub use download::HubFetcher;
pub use upload::HubPublisher;

/// Model metadata returned by `/api/models/{id}`
#[derive(Deserialize, Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub sha: Option<String>,
    #[serde(default)]
    pub siblings: Vec<Sibling>,
}

/// One file in a model repository
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    pub rfilename: String,
    pub size: Option<u64>,
}

#[derive(Deserialize)]
struct WhoAmI {
    name: String,
}

/// Thin client for the hub REST API
#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("client", &"Client { ... }")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl HubClient {
    /// Create client for the given endpoint (e.g. `https://huggingface.co`)
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("onnx-convert/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConvertError::Other(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// Public web URL of a repository
    #[must_use]
    pub fn repo_url(&self, repo_id: &str) -> String {
        self.url(repo_id)
    }

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
        credential: Option<&Credential>,
    ) -> reqwest::RequestBuilder {
        match credential {
            Some(cred) => builder.header(reqwest::header::AUTHORIZATION, cred.bearer()),
            None => builder,
        }
    }

    /// Account name owning the token
    pub async fn whoami(&self, credential: &Credential) -> Result<String> {
        let response = self
            .client
            .get(self.url("api/whoami-v2"))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(|e| ConvertError::Network(format!("whoami request failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body: WhoAmI = response.json().await.map_err(|e| {
                    ConvertError::Auth(format!("Unexpected whoami response: {e}"))
                })?;
                Ok(body.name)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConvertError::Auth(
                "Access token is invalid or expired".to_string(),
            )),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ConvertError::Network(format!("whoami failed ({status}): {body}")))
            }
        }
    }

    /// Resolve a model id, including file sizes
    pub async fn model_info(
        &self,
        model_id: &str,
        credential: Option<&Credential>,
    ) -> Result<ModelInfo> {
        let request = self
            .client
            .get(self.url(&format!("api/models/{model_id}")))
            .query(&[("blobs", "true")]);
        let response = self
            .authorized(request, credential)
            .send()
            .await
            .map_err(|e| ConvertError::Network(format!("Failed to resolve {model_id}: {e}")))?;

        match response.status() {
            StatusCode::OK => response.json().await.map_err(|e| {
                ConvertError::Network(format!("Failed to parse model info for {model_id}: {e}"))
            }),
            // The hub answers 401 for missing repos when the caller cannot see them
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => Err(ConvertError::NotFound(
                format!("{model_id} does not exist or is not accessible"),
            )),
            StatusCode::FORBIDDEN => Err(ConvertError::NotFound(format!(
                "{model_id} is gated; request access on the model page first"
            ))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ConvertError::Network(format!(
                    "Resolving {model_id} failed ({status}): {body}"
                )))
            }
        }
    }

    /// Whether a model repository exists and is visible to the caller
    pub async fn repo_exists(&self, repo_id: &str, credential: Option<&Credential>) -> Result<bool> {
        let request = self.client.get(self.url(&format!("api/models/{repo_id}")));
        let response = self
            .authorized(request, credential)
            .send()
            .await
            .map_err(|e| ConvertError::Network(format!("Failed to query {repo_id}: {e}")))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => Ok(false),
            status => Err(ConvertError::Network(format!(
                "Checking {repo_id} failed ({status})"
            ))),
        }
    }

    /// Create a model repository, reusing it when it already exists
    pub async fn create_repo(&self, repo_id: &str, private: bool, credential: &Credential) -> Result<()> {
        let (organization, name) = repo_id
            .split_once('/')
            .ok_or_else(|| ConvertError::Upload(format!("Invalid repository id: {repo_id}")))?;

        let response = self
            .client
            .post(self.url("api/repos/create"))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .json(&serde_json::json!({
                "name": name,
                "organization": organization,
                "type": "model",
                "private": private,
            }))
            .send()
            .await
            .map_err(|e| ConvertError::Upload(format!("Failed to create {repo_id}: {e}")))?;

        match response.status() {
            s if s.is_success() => {
                tracing::info!("Created repository {repo_id}");
                Ok(())
            }
            StatusCode::CONFLICT => {
                tracing::info!("Reusing existing repository {repo_id}");
                Ok(())
            }
            status => Err(status_error(status, response.text().await.unwrap_or_default())),
        }
    }
}

/// Map a failed publish-side response to the error taxonomy
pub(crate) fn status_error(status: StatusCode, body: String) -> ConvertError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConvertError::Auth(format!(
            "The hub rejected the token ({status}): {}",
            truncate(&body, 300)
        )),
        _ => ConvertError::Upload(format!("Hub returned {status}: {}", truncate(&body, 300))),
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}
