//! Display formatting for CLI output
//!
//! Provides structured display for:
//! - Table and template issues grouped by file
//! - The per-cell error matrix of a control table
//! - The end-of-run summary

use console::style;
use relpack_core::{CheckError, Message, Severity as MessageSeverity, TableReport};
use relpack_engine::RunOutcome;
use std::collections::BTreeMap;

/// Issue severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// An issue with location information
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub file: String,
    pub location: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Grouped issues for display
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the issues of a finished run
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let mut report = Self::new();

        for table in &outcome.tables {
            report.add_table(table);
        }

        for file in &outcome.files {
            if let Some(error) = &file.error {
                report.add_error(&file.file, "", error, None);
            }
            if !file.missing.is_empty() {
                let keys = file.missing.iter().cloned().collect::<Vec<_>>().join(", ");
                report.add_warning(
                    &file.file,
                    "",
                    &format!("undefined variables: {}", keys),
                    Some("add them to controls/global-vars.csv or remove the tokens".to_string()),
                );
            }
        }

        let variables = "controls/global-vars.csv";
        for key in &outcome.summary.unused_variables {
            report.add_warning(
                variables,
                key,
                "variable is not used in any template",
                None,
            );
        }

        report
    }

    /// Collect the cell errors of one table
    pub fn add_table(&mut self, table: &TableReport) {
        let file = table.kind.relative_path();
        for error in table.errors.log() {
            self.add_error(&file, &cell_location(error), &error.message, None);
        }
    }

    /// Add an error
    pub fn add_error(
        &mut self,
        file: &str,
        location: &str,
        message: &str,
        suggestion: Option<String>,
    ) {
        self.issues.push(ValidationIssue {
            severity: Severity::Error,
            file: file.to_string(),
            location: location.to_string(),
            message: message.to_string(),
            suggestion,
        });
    }

    /// Add a warning
    pub fn add_warning(
        &mut self,
        file: &str,
        location: &str,
        message: &str,
        suggestion: Option<String>,
    ) {
        self.issues.push(ValidationIssue {
            severity: Severity::Warning,
            file: file.to_string(),
            location: location.to_string(),
            message: message.to_string(),
            suggestion,
        });
    }

    /// Display issues grouped by file
    pub fn display(&self) {
        let mut by_file: BTreeMap<&str, Vec<&ValidationIssue>> = BTreeMap::new();
        for issue in &self.issues {
            by_file.entry(&issue.file).or_default().push(issue);
        }

        for (file, issues) in by_file {
            println!();
            println!("{}", style(file).cyan().bold());

            for issue in issues {
                let icon = match issue.severity {
                    Severity::Error => style("✗").red(),
                    Severity::Warning => style("⚠").yellow(),
                };

                let location = if issue.location.is_empty() {
                    String::new()
                } else {
                    format!(" at {}", style(&issue.location).dim())
                };

                println!("  {} {}{}", icon, issue.message, location);

                if let Some(suggestion) = &issue.suggestion {
                    println!("    {} {}", style("hint:").blue(), suggestion);
                }
            }
        }
    }

    /// Get summary counts
    pub fn summary(&self) -> (usize, usize) {
        let errors = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        let warnings = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count();
        (errors, warnings)
    }

    /// Print summary line
    pub fn print_summary(&self) {
        let (errors, warnings) = self.summary();
        if errors > 0 {
            println!(
                "{} Check failed: {} error(s), {} warning(s)",
                style("✗").red().bold(),
                errors,
                warnings
            );
        } else if warnings > 0 {
            println!(
                "{} Check passed with {} warning(s)",
                style("⚠").yellow().bold(),
                warnings
            );
        } else {
            println!("{} Check passed!", style("✓").green().bold());
        }
    }
}

/// `row R column C 【header】`, one-based
pub fn cell_location(error: &CheckError) -> String {
    format!(
        "row {} column {} 【{}】",
        error.row + 1,
        error.column + 1,
        error.header
    )
}

/// Print the informational part of the run log
pub fn print_progress(messages: &[Message]) {
    for message in messages {
        if message.severity == MessageSeverity::Info {
            println!("  {} {}", style("✓").green(), message.text);
        }
    }
}

/// Print errors that are not tied to a table cell or a template
///
/// Fatal run errors (duplicate keys, unreadable tables) and commit failures
/// only exist in the run log.
pub fn print_run_errors(outcome: &RunOutcome, report: &ValidationReport) {
    for message in &outcome.messages {
        if message.severity != MessageSeverity::Error {
            continue;
        }
        let already_shown = report
            .issues
            .iter()
            .any(|issue| message.text.ends_with(&issue.message));
        if !already_shown {
            println!("  {} {}", style("✗").red(), message.text);
        }
    }
}

/// Print the error matrix of one table, one line per cell
pub fn display_matrix(report: &TableReport) {
    let file = report.kind.relative_path();
    if report.is_valid() {
        println!(
            "  {} {} (schema {}): {} rows, no errors",
            style("✓").green(),
            file,
            report.version,
            report.rows_checked
        );
        return;
    }

    println!(
        "  {} {} (schema {}): {} error(s) in {} rows",
        style("✗").red(),
        style(&file).yellow(),
        report.version,
        report.errors.len(),
        report.rows_checked
    );
    for (row, column) in report.errors.cells() {
        let errors = report.errors.at(row, column);
        let Some(first) = errors.first() else {
            continue;
        };
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        let codes: Vec<&str> = errors.iter().map(|e| e.kind.to_code_string()).collect();
        println!(
            "    {} {} `{}`: {} {}",
            style("✗").red(),
            style(cell_location(first)).dim(),
            first.value,
            messages.join("; "),
            style(format!("[{}]", codes.join(", "))).dim()
        );
    }
}

/// Print the counters of a run
pub fn print_run_summary(outcome: &RunOutcome) {
    let summary = &outcome.summary;
    println!();
    println!("{}", style("Summary").bold());
    println!(
        "  templates: {} scanned, {} succeeded, {} failed, {} with variables, {} replacements",
        summary.templates,
        summary.files_succeeded,
        summary.files_failed,
        summary.templates_with_tokens,
        summary.replacements
    );
    println!(
        "  variables: {} defined, {} matched, {} unused, {} undefined keys",
        summary.variables,
        summary.variables_matched,
        summary.unused_variables.len(),
        summary.undefined_keys.len()
    );
    if outcome.applied || summary.files_written > 0 || summary.commit_failures > 0 {
        println!(
            "  written: {} files, {} images rewritten, {} failures",
            summary.files_written, summary.images_rewritten, summary.commit_failures
        );
    }
}
