//! relpack core - control tables and rule validation for release artifacts
//!
//! This crate provides the foundational types used throughout relpack:
//! - `InstallRoot`: The unpacked release artifact and sandboxed path resolution
//! - `ControlTable`: A parsed control table with its detected schema version
//! - `Variable`, `DeployStep`, `ScriptStep`: Typed rows of the three tables
//! - `RuleValidator`: Per-cell validation producing an `ErrorMatrix`

pub mod artifact;
pub mod check;
pub mod error;
pub mod kind;
pub mod model;
pub mod table;
pub mod validate;

pub use artifact::{InstallRoot, TemplateEntry, CONFIG_FILE, TEMPLATE_TREES};
pub use check::{CheckError, CheckErrorKind, ErrorMatrix, Message, Severity};
pub use error::{CoreError, Result};
pub use kind::{DeployRank, RankTracker, ResourceKind};
pub use model::{
    DeployAction, DeployStep, ExecTarget, Flag, ScriptStep, VarType, Variable, split_file_list,
};
pub use table::{ControlTable, SchemaVersion, TableKind};
pub use validate::{ControlRow, RuleValidator, TableReport};
