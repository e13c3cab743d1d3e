use crate::error::{ConvertError, Result};
use std::fmt;
use std::str::FromStr;

/// Suffix appended to converted repositories
pub const ONNX_SUFFIX: &str = "-ONNX";

const MAX_PART_LEN: usize = 96;

/// A hub model identifier in `namespace/name` form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId {
    namespace: String,
    name: String,
}

impl ModelId {
    /// Parse and validate `namespace/name`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (namespace, name) = raw.split_once('/').ok_or_else(|| {
            ConvertError::NotFound(format!(
                "'{raw}' is not a model identifier; expected namespace/name"
            ))
        })?;

        for part in [namespace, name] {
            if !is_valid_part(part) {
                return Err(ConvertError::NotFound(format!(
                    "'{raw}' is not a valid model identifier"
                )));
            }
        }

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for ModelId {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn is_valid_part(part: &str) -> bool {
    !part.is_empty()
        && part.len() <= MAX_PART_LEN
        && !part.contains("..")
        && !part.starts_with(['.', '-'])
        && !part.ends_with(['.', '-'])
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Destination repository for a converted model.
///
/// `{username}/{name}-ONNX`, or the source repository itself when
/// `same_repo` is requested and the caller owns the source namespace.
#[must_use]
pub fn destination_name(username: &str, model_id: &ModelId, same_repo: bool) -> String {
    if same_repo && owns_namespace(username, model_id) {
        format!("{username}/{}", model_id.name())
    } else {
        format!("{username}/{}{ONNX_SUFFIX}", model_id.name())
    }
}

/// Whether `username` owns the source model's namespace
#[must_use]
pub fn owns_namespace(username: &str, model_id: &ModelId) -> bool {
    username == model_id.namespace()
}

/// Model card written to converted repositories that lack one
#[must_use]
pub fn model_card(model_id: &ModelId, hub_endpoint: &str) -> String {
    format!(
        "---\n\
         library_name: transformers.js\n\
         base_model:\n\
         - {model_id}\n\
         ---\n\n\
         # {name} (ONNX)\n\n\
         This is an ONNX version of [{model_id}]({hub_endpoint}/{model_id}). \
         It was automatically converted and uploaded using onnx-convert.\n",
        name = model_id.name(),
    )
}
