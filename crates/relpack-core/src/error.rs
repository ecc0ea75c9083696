//! Core error types
//!
//! Only structural problems are errors here. Data problems found inside a
//! control table are collected as [`CheckError`](crate::check::CheckError)s
//! and never abort a run on their own.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    #[error("Install directory not found: {path}")]
    #[diagnostic(code(relpack::artifact::not_found))]
    ArtifactNotFound { path: String },

    #[error("{table} not found at {path}")]
    #[diagnostic(
        code(relpack::table::missing),
        help("the variable table is required for every release artifact")
    )]
    TableNotFound { table: String, path: String },

    #[error("{table} has no header row")]
    #[diagnostic(code(relpack::table::header))]
    MissingHeader { table: String },

    #[error("{table} header does not match any known layout: found `{found}`")]
    #[diagnostic(code(relpack::table::schema))]
    SchemaMismatch {
        table: String,
        found: String,
        #[help]
        expected: Option<String>,
    },

    #[error("variable key `{key}` is defined twice (rows {first_row} and {row})")]
    #[diagnostic(
        code(relpack::table::duplicate_key),
        help("variable keys must be unique across global-vars.csv")
    )]
    DuplicateVariableKey {
        key: String,
        first_row: usize,
        row: usize,
    },

    #[error("failed to read {table}: {message}")]
    #[diagnostic(code(relpack::table::read))]
    UnreadableTable { table: String, message: String },

    #[error("File access error for '{path}': {message}")]
    #[diagnostic(code(relpack::file::access))]
    FileAccess { path: String, message: String },

    #[error("CSV error: {0}")]
    #[diagnostic(code(relpack::csv))]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(relpack::io))]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
