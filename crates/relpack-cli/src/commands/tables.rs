//! Tables command - validate the control tables only

use std::path::Path;

use console::style;
use relpack_core::{ControlTable, InstallRoot, RuleValidator, TableKind, TableReport};
use relpack_engine::VariableBinder;

use crate::commands::announce;
use crate::display;
use crate::error::{CliError, Result};

pub fn run(path: &Path, json: bool) -> Result<()> {
    announce("Validating control tables in", path, json);
    let root = InstallRoot::open(path)?;
    let validator = RuleValidator::new(&root);

    let mut reports: Vec<TableReport> = Vec::new();
    for kind in TableKind::ALL {
        let table_path = root.table_path(kind);
        if kind != TableKind::Variables && !table_path.is_file() {
            if !json {
                println!(
                    "  {} {} not found, skipped",
                    style("⚠").yellow(),
                    kind.relative_path()
                );
            }
            continue;
        }

        let table = ControlTable::load(&table_path, kind)?;
        if kind == TableKind::Variables {
            VariableBinder::check_unique(&table)?;
        }
        reports.push(validator.validate(&table));
    }

    let errors: usize = reports.iter().map(|r| r.errors.len()).sum();

    if json {
        let output = serde_json::json!({
            "valid": errors == 0,
            "tables": reports,
        });
        let output = serde_json::to_string_pretty(&output)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", output);
    } else {
        for report in &reports {
            display::display_matrix(report);
        }
        println!();
        if errors == 0 {
            println!("{} All control tables are valid", style("✓").green().bold());
        }
    }

    if errors > 0 {
        return Err(CliError::CheckFailed {
            errors,
            warnings: 0,
        });
    }
    Ok(())
}
