//! Conversion coordinator.
//!
//! Drives fetch → export → quantize (optional) → publish in strict order.
//! Any failure aborts the run and becomes a single user-facing message;
//! partially written local files are left for the cache to manage.

pub mod naming;
pub mod request;

use crate::config::Config;
use crate::error::{ConvertError, Result};
use crate::hub::auth::{self, Credential};
use crate::hub::{HubClient, HubFetcher, HubPublisher};
use crate::toolchain::{ScriptExporter, Toolchain};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub use naming::{destination_name, ModelId};
pub use request::{ConversionRequest, ConversionResult, Preview, Published};

/// Model files downloaded into the local cache
#[derive(Debug, Clone)]
pub struct FetchedModel {
    pub model_id: ModelId,
    pub revision: String,
    pub snapshot_dir: PathBuf,
    pub files: Vec<String>,
    pub total_bytes: u64,
}

/// Export knobs derived from the request
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub trust_remote_code: bool,
    pub credential: Option<Credential>,
}

/// Output directory of an export, ready to publish
#[derive(Debug, Clone)]
pub struct ExportedModel {
    pub model_id: ModelId,
    pub output_dir: PathBuf,
    /// Graphs produced by the last step (export or quantize)
    pub onnx_files: Vec<PathBuf>,
    pub artifact_bytes: u64,
    pub log: String,
}

/// Step 1: resolve and download a model
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn fetch(&self, model_id: &ModelId, credential: Option<&Credential>)
        -> Result<FetchedModel>;
}

/// Steps 2 and 3: ONNX export and post-training quantization
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, model: &FetchedModel, options: &ExportOptions) -> Result<ExportedModel>;

    async fn quantize(&self, exported: &ExportedModel) -> Result<ExportedModel>;
}

/// Step 4: account lookup and upload
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn whoami(&self, credential: &Credential) -> Result<String>;

    async fn repo_exists(&self, repo_id: &str, credential: &Credential) -> Result<bool>;

    async fn publish(
        &self,
        exported: &ExportedModel,
        destination: &str,
        credential: &Credential,
    ) -> Result<()>;

    fn repo_url(&self, repo_id: &str) -> String;
}

struct Identity {
    username: String,
    credential: Credential,
}

/// Runs conversions against the configured collaborators
pub struct Coordinator {
    fetcher: Arc<dyn ModelFetcher>,
    exporter: Arc<dyn Exporter>,
    publisher: Arc<dyn Publisher>,
    credential: Option<Credential>,
    space_author: Option<String>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("credential", &self.credential)
            .field("space_author", &self.space_author)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ModelFetcher>,
        exporter: Arc<dyn Exporter>,
        publisher: Arc<dyn Publisher>,
        credential: Option<Credential>,
    ) -> Self {
        Self {
            fetcher,
            exporter,
            publisher,
            credential,
            space_author: None,
        }
    }

    /// Account used for the process token instead of asking the hub
    #[must_use]
    pub fn with_space_author(mut self, author: Option<String>) -> Self {
        self.space_author = author;
        self
    }

    /// Create coordinator from config, resolving the process token once
    pub fn from_config(config: &Config) -> Result<Self> {
        let credential = match auth::resolve_credential(&config.hub, &config.secrets_path()?) {
            Some((cred, source)) => {
                tracing::info!("Loaded access token from {source}");
                Some(cred)
            }
            None => {
                tracing::warn!(
                    "No access token found in ${} or secrets file; publishing will fail",
                    config.hub.token_env
                );
                None
            }
        };

        let client = HubClient::new(&config.hub.endpoint)?;
        let fetcher = HubFetcher::new(
            client.clone(),
            config.hub_cache_dir()?,
            config.hub.revision.clone(),
            config.cache.min_free_mb,
        )?;
        let toolchain = Toolchain::from_config(&config.toolchain)?;
        let exporter = ScriptExporter::new(
            toolchain,
            config.output_dir()?,
            config.hub_cache_dir()?,
            client.endpoint().to_string(),
        );
        let publisher = HubPublisher::new(client, config.hub.revision.clone(), config.hub.private);

        Ok(
            Self::new(Arc::new(fetcher), Arc::new(exporter), Arc::new(publisher), credential)
                .with_space_author(auth::space_author()),
        )
    }

    /// Whether a process-wide token is configured
    #[must_use]
    pub const fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Run the full pipeline for one request
    pub async fn convert(&self, request: &ConversionRequest) -> ConversionResult {
        let started = Instant::now();
        tracing::info!(
            "Conversion requested: model={} quantize={} trust_remote_code={}",
            request.model_id,
            request.quantize,
            request.trust_remote_code
        );

        match self.run(request).await {
            Ok(published) => {
                tracing::info!(
                    "Published {} in {:.1}s",
                    published.destination_name,
                    started.elapsed().as_secs_f64()
                );
                ConversionResult::succeeded(published, started.elapsed().as_secs_f64())
            }
            Err(e) => {
                tracing::error!("Conversion of {} failed: {e}", request.model_id);
                ConversionResult::failed(&e, started.elapsed().as_secs_f64())
            }
        }
    }

    async fn run(&self, request: &ConversionRequest) -> Result<Published> {
        let model_id = ModelId::parse(&request.model_id)?;

        if request.trust_remote_code && request.user_credential.is_none() {
            return Err(ConvertError::Auth(
                "Trust remote code requires your own access token".to_string(),
            ));
        }

        let credential = request
            .user_credential
            .as_ref()
            .or(self.credential.as_ref());

        tracing::info!("[1/4] Fetching {model_id}");
        let fetched = self.fetcher.fetch(&model_id, credential).await?;
        tracing::info!("Fetched {model_id} at revision {}", fetched.revision);

        tracing::info!("[2/4] Exporting {model_id} to ONNX");
        let options = ExportOptions {
            trust_remote_code: request.trust_remote_code,
            credential: credential.cloned(),
        };
        let mut exported = self.exporter.export(&fetched, &options).await?;

        if request.quantize {
            tracing::info!("[3/4] Quantizing {model_id}");
            exported = self.exporter.quantize(&exported).await?;
        } else {
            tracing::debug!("[3/4] Quantization not requested");
        }

        let identity = self.identity(request.user_credential.as_ref()).await?;
        let destination = destination_name(&identity.username, &model_id, request.same_repo);

        tracing::info!("[4/4] Publishing to {destination}");
        self.publisher
            .publish(&exported, &destination, &identity.credential)
            .await?;

        Ok(Published {
            destination_url: self.publisher.repo_url(&destination),
            destination_name: destination,
            artifact_bytes: exported.artifact_bytes,
            exporter_output: exported.log,
        })
    }

    /// Destination a conversion would publish to, and whether it already exists
    pub async fn preview(
        &self,
        model_id: &str,
        same_repo: bool,
        user_credential: Option<&Credential>,
    ) -> Result<Preview> {
        let model_id = ModelId::parse(model_id)?;
        let identity = self.identity(user_credential).await?;
        let can_use_same_repo = naming::owns_namespace(&identity.username, &model_id);
        let destination = destination_name(&identity.username, &model_id, same_repo);

        // Uploading in place always targets an existing repo
        let already_converted = if same_repo && can_use_same_repo {
            false
        } else {
            self.publisher
                .repo_exists(&destination, &identity.credential)
                .await?
        };

        Ok(Preview {
            destination_url: self.publisher.repo_url(&destination),
            destination_name: destination,
            already_converted,
            can_use_same_repo,
        })
    }

    /// Account name for the given user token, or for the process token
    pub async fn username(&self, user_credential: Option<&Credential>) -> Result<String> {
        Ok(self.identity(user_credential).await?.username)
    }

    async fn identity(&self, user_credential: Option<&Credential>) -> Result<Identity> {
        if let Some(cred) = user_credential {
            return Ok(Identity {
                username: self.publisher.whoami(cred).await?,
                credential: cred.clone(),
            });
        }

        let cred = self.credential.clone().ok_or_else(|| {
            ConvertError::Auth(
                "No access token configured; enter your own token or set HF_TOKEN".to_string(),
            )
        })?;

        let username = match &self.space_author {
            Some(author) => author.clone(),
            None => self.publisher.whoami(&cred).await?,
        };

        Ok(Identity {
            username,
            credential: cred,
        })
    }
}
