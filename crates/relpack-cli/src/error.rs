//! CLI error types with exit code handling
//!
//! Every command returns a [`CliError`] on failure; `main` renders it with
//! miette and exits with [`CliError::exit_code`].

use miette::Diagnostic;
use relpack_core::CoreError;
use relpack_engine::EngineError;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// A control table could not be used at all
    #[error("Table error: {message}")]
    #[diagnostic(code(relpack::cli::table))]
    Table {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Validation or the dry run reported errors; nothing was written
    #[error("Check failed with {errors} error(s) and {warnings} warning(s)")]
    #[diagnostic(
        code(relpack::cli::check),
        help("nothing was written; fix the errors above and run again")
    )]
    CheckFailed { errors: usize, warnings: usize },

    /// Some commit steps failed after writing started
    #[error("Apply failed: {failures} commit step(s) did not complete")]
    #[diagnostic(
        code(relpack::cli::commit),
        help("files processed before the failure keep their new content")
    )]
    CommitFailed { failures: usize },

    /// Configuration file or flags are invalid
    #[error("Configuration error: {message}")]
    #[diagnostic(code(relpack::cli::config))]
    Config { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(relpack::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(relpack::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Table { .. } => exit_codes::VALIDATION_ERROR,
            CliError::CheckFailed { .. } => exit_codes::VALIDATION_ERROR,
            CliError::CommitFailed { .. } => exit_codes::ERROR,
            CliError::Config { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ArtifactNotFound { .. }
            | CoreError::FileAccess { .. }
            | CoreError::Io(_) => CliError::Io {
                message: err.to_string(),
            },
            other => CliError::Table {
                message: other.to_string(),
                help: other.help().map(|h| h.to_string()),
            },
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Core(core) => core.into(),
            EngineError::Io(e) => e.into(),
            EngineError::InvalidConfig { message } => CliError::Config { message },
            other => CliError::internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
