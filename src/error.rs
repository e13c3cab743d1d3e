use serde::Serialize;
use thiserror::Error;

/// Main error type for onnx-convert
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Model not found: {0}\n\nTroubleshooting:\n- Check the identifier uses the namespace/name form (e.g. EleutherAI/pythia-14m)\n- Private or gated models need a token with read access\n- Verify the model page exists on the Hub")]
    NotFound(String),

    #[error("Network error: {0}\n\nTroubleshooting:\n- Check internet connection\n- Verify the hub endpoint in config\n- Try again in a moment")]
    Network(String),

    #[error("Export error: {0}\n\nTroubleshooting:\n- The model architecture may not be supported by the transformers.js exporter\n- Models with custom code need trust_remote_code and your own token\n- Run with RUST_LOG=debug for the full exporter output")]
    Export(String),

    #[error("Quantization error: {0}\n\nTroubleshooting:\n- Some operator sets cannot be quantized; retry without quantization\n- Check the configured quantization modes")]
    Quantization(String),

    #[error("Authentication error: {0}\n\nTroubleshooting:\n- Set HF_TOKEN to a write-scoped access token\n- Or add HF_TOKEN to the secrets file next to config.toml\n- Verify the token at: https://huggingface.co/settings/tokens")]
    Auth(String),

    #[error("Upload error: {0}\n\nTroubleshooting:\n- Check internet connection\n- Ensure the token has write access to the destination namespace\n- Try again; uploads resume from the last committed state")]
    Upload(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/onnx-convert/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Toolchain error: {0}\n\nTroubleshooting:\n- Is python3 installed and in PATH?\n- Install the exporter requirements: pip install -r transformers.js/scripts/requirements.txt\n- Delete the toolchain directory to force a fresh download")]
    Toolchain(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse error class reported to the page alongside the message
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Network,
    Export,
    Quantization,
    Auth,
    Upload,
    Internal,
}

impl ConvertError {
    /// Error class for this failure
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Network(_) => ErrorKind::Network,
            Self::Export(_) => ErrorKind::Export,
            Self::Quantization(_) => ErrorKind::Quantization,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Upload(_) => ErrorKind::Upload,
            Self::Config(_) | Self::Toolchain(_) | Self::Io(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Short message for the user, without troubleshooting text
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(m) => format!("Model not found: {m}"),
            Self::Network(m) => format!("Download failed: {m}"),
            Self::Export(m) => format!("Conversion failed: {m}"),
            Self::Quantization(m) => format!("Quantization failed: {m}"),
            Self::Auth(m) => format!("Authentication failed: {m}"),
            Self::Upload(m) => format!("Upload failed: {m}"),
            Self::Config(_) | Self::Toolchain(_) | Self::Io(_) | Self::Other(_) => {
                "An internal error occurred. Check the server logs for details.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_troubleshooting() {
        let err = ConvertError::NotFound("no/such-model-xyz".to_string());
        assert_eq!(err.user_message(), "Model not found: no/such-model-xyz");
        assert!(err.to_string().contains("Troubleshooting"));
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let err = ConvertError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/secret/path",
        ));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.user_message().contains("/secret/path"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_value(ErrorKind::NotFound).unwrap();
        assert_eq!(json, "not_found");
    }
}
