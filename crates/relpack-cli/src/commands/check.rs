//! Check command - validate and dry-run an install directory

use std::path::Path;

use crate::commands::{RunOptions, announce, open_pipeline, report};
use crate::error::Result;

pub fn run(path: &Path, options: &RunOptions) -> Result<()> {
    announce("Checking", path, options.json);
    let pipeline = open_pipeline(path, options)?;
    let outcome = pipeline.check();
    report(&outcome, options.json)
}
