use crate::error::ConvertError;
use crate::hub::auth::{self, Credential};
use crate::pipeline::{ConversionRequest, Preview};
use crate::web::{page, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Body of `POST /api/preview`
#[derive(Deserialize, Debug)]
pub struct PreviewRequest {
    pub model_id: String,
    #[serde(default)]
    pub same_repo: bool,
    #[serde(default, rename = "user_token", deserialize_with = "auth::deserialize_optional")]
    pub user_credential: Option<Credential>,
}

/// JSON error body with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ConvertError> for ApiError {
    fn from(err: ConvertError) -> Self {
        tracing::warn!("Request failed: {err}");
        let status = match &err {
            ConvertError::NotFound(_) => StatusCode::NOT_FOUND,
            ConvertError::Auth(_) => StatusCode::UNAUTHORIZED,
            ConvertError::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// The conversion page
pub async fn index() -> Html<&'static str> {
    Html(page::INDEX_HTML)
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "busy": state.gate.is_busy(),
        "token_configured": state.coordinator.has_credential(),
    }))
}

/// Destination and "already converted" check for a model id
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<Preview>, ApiError> {
    let preview = state
        .coordinator
        .preview(
            &request.model_id,
            request.same_repo,
            request.user_credential.as_ref(),
        )
        .await?;
    Ok(Json(preview))
}

/// Run a conversion; rejected with 409 while another is in flight.
///
/// The pipeline runs on its own task holding the gate, so a client that
/// disconnects mid-run neither cancels it nor frees the gate early.
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConversionRequest>,
) -> Response {
    let Some(guard) = state.gate.try_acquire() else {
        tracing::warn!("Rejected {}: a conversion is already running", request.model_id);
        return ApiError {
            status: StatusCode::CONFLICT,
            message: "A conversion is already in progress. Please wait for it to finish."
                .to_string(),
        }
        .into_response();
    };

    let coordinator = Arc::clone(&state.coordinator);
    let task = tokio::spawn(async move {
        let _guard = guard;
        coordinator.convert(&request).await
    });

    match task.await {
        Ok(result) => Json(result).into_response(),
        Err(e) => ApiError::from(ConvertError::Other(format!("Conversion task failed: {e}")))
            .into_response(),
    }
}
