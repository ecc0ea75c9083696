//! Engine error types

use relpack_core::CoreError;
use thiserror::Error;

use crate::pipeline::Phase;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{path} is not valid UTF-8 (invalid byte at offset {offset})")]
    Decode { path: String, offset: u64 },

    #[error("{path} does not parse as YAML after substitution: {message}")]
    ManifestParse { path: String, message: String },

    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl EngineError {
    /// The install-root relative file the error is about, when it names one
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Decode { path, .. } | Self::ManifestParse { path, .. } => Some(path),
            Self::Core(CoreError::FileAccess { path, .. }) => Some(path),
            _ => None,
        }
    }

    /// Short machine-readable code, used in JSON file reports
    pub fn to_code_string(&self) -> &'static str {
        match self {
            Self::Core(_) => "core",
            Self::Io(_) => "io",
            Self::Yaml(_) => "yaml",
            Self::Decode { .. } => "decode",
            Self::ManifestParse { .. } => "manifest_parse",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_of_file_errors() {
        let err = EngineError::ManifestParse {
            path: "k8s-resources/configmap-a.yaml".to_string(),
            message: "bad".to_string(),
        };
        assert_eq!(err.path(), Some("k8s-resources/configmap-a.yaml"));
        assert_eq!(err.to_code_string(), "manifest_parse");

        let err = EngineError::InvalidConfig {
            message: "chunkSize must be at least 1".to_string(),
        };
        assert_eq!(err.path(), None);
    }
}
