//! Controller configuration.

use serde::Deserialize;
use serde::Serialize;

/// What a failed conversion leaves behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertFailurePolicy {
    /// The level stays loaded and `convert` may be retried from `Error`.
    #[default]
    RetainLevel,
    /// The controller stays in `Error` until `reset`.
    RequireReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Label for the worker in logs.
    pub worker_name: String,
    pub convert_failure: ConvertFailurePolicy,
    /// Extension of the downloadable file, without the dot.
    pub artifact_extension: String,
    pub artifact_mime: String,
    /// Shown when a level has no description.
    pub empty_description_text: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            worker_name: "conversion-worker".to_string(),
            convert_failure: ConvertFailurePolicy::RetainLevel,
            artifact_extension: "gmd".to_string(),
            artifact_mime: "application/xml".to_string(),
            empty_description_text: "No description provided.".to_string(),
        }
    }
}

impl ConverterConfig {
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn with_convert_failure(mut self, policy: ConvertFailurePolicy) -> Self {
        self.convert_failure = policy;
        self
    }

    pub fn with_artifact_extension(mut self, extension: impl Into<String>) -> Self {
        self.artifact_extension = extension.into();
        self
    }

    pub fn with_artifact_mime(mut self, mime: impl Into<String>) -> Self {
        self.artifact_mime = mime.into();
        self
    }

    pub fn with_empty_description_text(mut self, text: impl Into<String>) -> Self {
        self.empty_description_text = text.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConverterConfig::default();
        assert_eq!(config.convert_failure, ConvertFailurePolicy::RetainLevel);
        assert_eq!(config.artifact_extension, "gmd");
        assert_eq!(config.empty_description_text, "No description provided.");
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: ConverterConfig =
            serde_json::from_str(r#"{ "convert_failure": "require_reset", "artifact_mime": "text/plain" }"#).unwrap();

        assert_eq!(config.convert_failure, ConvertFailurePolicy::RequireReset);
        assert_eq!(config.artifact_mime, "text/plain");
        assert_eq!(config.worker_name, "conversion-worker");
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let result = serde_json::from_str::<ConverterConfig>(r#"{ "convert_failure": "ignore" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_builder() {
        let config = ConverterConfig::default()
            .with_worker_name("w1")
            .with_convert_failure(ConvertFailurePolicy::RequireReset)
            .with_artifact_extension("txt");

        assert_eq!(config.worker_name, "w1");
        assert_eq!(config.convert_failure, ConvertFailurePolicy::RequireReset);
        assert_eq!(config.artifact_extension, "txt");
    }
}
