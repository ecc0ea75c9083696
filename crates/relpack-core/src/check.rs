//! Check results: per-cell errors, the error matrix and run messages

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::table::TableKind;

/// Closed set of per-cell violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckErrorKind {
    MissingValue,
    UnsupportedResourceKind,
    UnsupportedDeployAction,
    DeployOrderViolation,
    ManifestPathMissing,
    ManifestNamingViolation,
    UnsupportedVariableType,
    ReferencedPathMissing,
    InvalidBooleanFlag,
    InvalidExecTarget,
    InvalidImageReference,
}

impl CheckErrorKind {
    pub fn to_code_string(&self) -> &'static str {
        match self {
            Self::MissingValue => "missing_value",
            Self::UnsupportedResourceKind => "unsupported_resource_kind",
            Self::UnsupportedDeployAction => "unsupported_deploy_action",
            Self::DeployOrderViolation => "deploy_order_violation",
            Self::ManifestPathMissing => "manifest_path_missing",
            Self::ManifestNamingViolation => "manifest_naming_violation",
            Self::UnsupportedVariableType => "unsupported_variable_type",
            Self::ReferencedPathMissing => "referenced_path_missing",
            Self::InvalidBooleanFlag => "invalid_boolean_flag",
            Self::InvalidExecTarget => "invalid_exec_target",
            Self::InvalidImageReference => "invalid_image_reference",
        }
    }
}

/// One violation attached to a table cell
///
/// `row` is the zero-based index of the data row (the header is not counted)
/// and `column` the zero-based column index. Both are shown one-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckError {
    pub kind: CheckErrorKind,
    pub table: TableKind,
    pub row: usize,
    pub column: usize,
    pub header: String,
    pub value: String,
    pub message: String,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row {} column {} 【{}】 `{}`: {}",
            self.table.label(),
            self.row + 1,
            self.column + 1,
            self.header,
            self.value,
            self.message
        )
    }
}

/// Row × column error matrix with a flat, ordered log
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorMatrix {
    #[serde(skip)]
    cells: BTreeMap<(usize, usize), Vec<usize>>,
    log: Vec<CheckError>,
}

impl ErrorMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CheckError) {
        self.cells
            .entry((error.row, error.column))
            .or_default()
            .push(self.log.len());
        self.log.push(error);
    }

    /// Errors stacked on one cell, in the order they were raised
    pub fn at(&self, row: usize, column: usize) -> Vec<&CheckError> {
        self.cells
            .get(&(row, column))
            .map(|idx| idx.iter().map(|&i| &self.log[i]).collect())
            .unwrap_or_default()
    }

    /// Cells that carry at least one error
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells.keys().copied()
    }

    pub fn log(&self) -> &[CheckError] {
        &self.log
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }
}

/// Message severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// An entry of the ordered run log handed back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }
}
