//! Apply command - substitute an install directory in place

use std::path::Path;

use console::style;

use crate::commands::{RunOptions, announce, open_pipeline, report};
use crate::error::Result;

pub fn run(path: &Path, options: &RunOptions) -> Result<()> {
    announce("Applying", path, options.json);
    let pipeline = open_pipeline(path, options)?;

    let registry = &pipeline.config().registry;
    if !options.json && !registry.is_noop() {
        println!(
            "  {} Rewriting image registry {} -> {}",
            style("→").blue(),
            registry.from,
            registry.to
        );
    }

    let outcome = pipeline.apply();
    report(&outcome, options.json)
}
