use crate::error::{ConvertError, ErrorKind};
use crate::hub::auth::{self, Credential};
use serde::{Deserialize, Serialize};

/// One user submission
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConversionRequest {
    pub model_id: String,
    #[serde(default)]
    pub quantize: bool,
    #[serde(default)]
    pub trust_remote_code: bool,
    #[serde(default)]
    pub same_repo: bool,
    /// Optional user token; publishes under the user's account instead
    #[serde(default, rename = "user_token", deserialize_with = "auth::deserialize_optional")]
    pub user_credential: Option<Credential>,
}

impl ConversionRequest {
    #[must_use]
    pub fn new(model_id: impl Into<String>, quantize: bool) -> Self {
        Self {
            model_id: model_id.into(),
            quantize,
            ..Self::default()
        }
    }
}

/// Terminal outcome of a request, rendered by the page
#[derive(Serialize, Debug, Clone)]
pub struct ConversionResult {
    pub success: bool,
    pub destination_name: Option<String>,
    pub destination_url: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Size of the published ONNX graphs (quantized graphs when quantizing)
    pub artifact_bytes: Option<u64>,
    pub exporter_output: Option<String>,
    pub elapsed_secs: f64,
    pub finished_at: String,
}

/// Successful pipeline run, before it becomes a `ConversionResult`
#[derive(Debug, Clone)]
pub struct Published {
    pub destination_name: String,
    pub destination_url: String,
    pub artifact_bytes: u64,
    pub exporter_output: String,
}

impl ConversionResult {
    #[must_use]
    pub fn succeeded(published: Published, elapsed_secs: f64) -> Self {
        let exporter_output = Some(published.exporter_output).filter(|s| !s.trim().is_empty());
        Self {
            success: true,
            destination_name: Some(published.destination_name),
            destination_url: Some(published.destination_url),
            error_message: None,
            error_kind: None,
            artifact_bytes: Some(published.artifact_bytes),
            exporter_output,
            elapsed_secs,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[must_use]
    pub fn failed(error: &ConvertError, elapsed_secs: f64) -> Self {
        Self {
            success: false,
            destination_name: None,
            destination_url: None,
            error_message: Some(error.user_message()),
            error_kind: Some(error.kind()),
            artifact_bytes: None,
            exporter_output: None,
            elapsed_secs,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Where a conversion would land, shown before the user proceeds
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub destination_name: String,
    pub destination_url: String,
    pub already_converted: bool,
    /// The caller owns the source namespace and may upload in place
    pub can_use_same_repo: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: ConversionRequest =
            serde_json::from_str(r#"{"model_id":"EleutherAI/pythia-14m"}"#).unwrap();
        assert_eq!(req.model_id, "EleutherAI/pythia-14m");
        assert!(!req.quantize);
        assert!(!req.trust_remote_code);
        assert!(req.user_credential.is_none());
    }

    #[test]
    fn test_blank_user_token_is_ignored() {
        let req: ConversionRequest =
            serde_json::from_str(r#"{"model_id":"a/b","user_token":"  "}"#).unwrap();
        assert!(req.user_credential.is_none());

        let req: ConversionRequest =
            serde_json::from_str(r#"{"model_id":"a/b","user_token":"hf_abc"}"#).unwrap();
        assert_eq!(req.user_credential.unwrap().expose(), "hf_abc");
    }

    #[test]
    fn test_request_debug_hides_token() {
        let req: ConversionRequest =
            serde_json::from_str(r#"{"model_id":"a/b","user_token":"hf_abc"}"#).unwrap();
        assert!(!format!("{req:?}").contains("hf_abc"));
    }

    #[test]
    fn test_failed_result_serializes_kind() {
        let err = ConvertError::Upload("connection reset".to_string());
        let json = serde_json::to_value(ConversionResult::failed(&err, 1.5)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "upload");
        assert_eq!(json["error_message"], "Upload failed: connection reset");
        assert!(json["destination_url"].is_null());
    }
}
