//! CLI commands

pub mod apply;
pub mod check;
pub mod tables;

use std::path::{Path, PathBuf};

use console::style;
use relpack_core::InstallRoot;
use relpack_engine::{MarkerMode, Pipeline, PipelineConfig, RunOutcome};

use crate::display::{self, ValidationReport};
use crate::error::{CliError, Result};

/// Options shared by `check` and `apply`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub old_registry: Option<String>,
    pub new_registry: Option<String>,
    pub markers_only: bool,
    pub chunk_size: Option<usize>,
    pub json: bool,
}

impl RunOptions {
    /// Layer command-line overrides on top of the file configuration
    pub fn resolve(&self, root: &InstallRoot) -> Result<PipelineConfig> {
        let loaded = match &self.config {
            Some(path) => PipelineConfig::load_from(path),
            None => PipelineConfig::discover(root),
        };
        let mut config = loaded.map_err(|e| CliError::config(e.to_string()))?;

        if let Some(from) = &self.old_registry {
            config.registry.from = from.clone();
        }
        if let Some(to) = &self.new_registry {
            config.registry.to = to.clone();
        }
        if self.markers_only {
            config.markers = MarkerMode::MarkersOnly;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }

        config
            .validate()
            .map_err(|e| CliError::config(e.to_string()))?;
        Ok(config)
    }
}

/// Open the install root and build the pipeline for it
pub fn open_pipeline(path: &Path, options: &RunOptions) -> Result<Pipeline> {
    let root = InstallRoot::open(path)?;
    let config = options.resolve(&root)?;
    tracing::debug!(?config, root = %path.display(), "pipeline configured");
    Ok(Pipeline::new(root, config))
}

/// Print a finished run and turn a failure into an error
pub fn report(outcome: &RunOutcome, json: bool) -> Result<()> {
    if json {
        let output = serde_json::to_string_pretty(outcome)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", output);
    } else {
        display::print_progress(&outcome.messages);

        let report = ValidationReport::from_outcome(outcome);
        report.display();
        display::print_run_errors(outcome, &report);
        display::print_run_summary(outcome);
        println!();
        report.print_summary();
    }

    if outcome.success {
        return Ok(());
    }
    if outcome.summary.commit_failures > 0 {
        return Err(CliError::CommitFailed {
            failures: outcome.summary.commit_failures,
        });
    }
    Err(CliError::CheckFailed {
        errors: outcome.count(relpack_core::Severity::Error),
        warnings: outcome.count(relpack_core::Severity::Warning),
    })
}

pub(crate) fn announce(verb: &str, path: &Path, json: bool) {
    if !json {
        println!(
            "{} {} {}",
            style("→").blue(),
            verb,
            style(path.display()).bold()
        );
    }
}
