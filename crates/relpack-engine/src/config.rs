//! Pipeline configuration
//!
//! Read from `relpack.yaml` at the install root when present. Every field
//! is optional; command-line flags override what the file sets.

use serde::{Deserialize, Serialize};
use std::path::Path;

use relpack_core::{CONFIG_FILE, InstallRoot};

use crate::error::{EngineError, Result};
use crate::stream::DEFAULT_CHUNK_SIZE;
use crate::token::MarkerMode;

/// Registry prefix swap applied to deploy image references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRewrite {
    pub from: String,
    pub to: String,
}

impl RegistryRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Equal or empty prefixes leave images alone
    pub fn is_noop(&self) -> bool {
        self.from.is_empty() || self.to.is_empty() || self.from == self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Accepted token marker spellings
    #[serde(default)]
    pub markers: MarkerMode,

    /// Bytes read per chunk while substituting
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub registry: RegistryRewrite,

    /// Treat non-UTF-8 templates as errors
    #[serde(default = "default_require_utf8")]
    pub require_utf8: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_require_utf8() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            markers: MarkerMode::default(),
            chunk_size: default_chunk_size(),
            registry: RegistryRewrite::default(),
            require_utf8: default_require_utf8(),
        }
    }
}

impl PipelineConfig {
    /// Load the configuration file of an install root, or the defaults
    pub fn discover(root: &InstallRoot) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if path.is_file() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| EngineError::InvalidConfig {
            message: format!("{}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(EngineError::InvalidConfig {
                message: "chunkSize must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
