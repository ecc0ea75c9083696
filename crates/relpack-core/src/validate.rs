//! Per-cell rule validation of control tables
//!
//! Data problems never abort validation: every violation becomes a
//! [`CheckError`] attached to its cell, and one pass reports every problem in
//! a table. Structural problems (unreadable file, unknown header) are
//! reported earlier, by [`ControlTable::load`].

use serde::Serialize;
use tracing::debug;

use crate::artifact::InstallRoot;
use crate::check::{CheckError, CheckErrorKind, ErrorMatrix};
use crate::kind::{RankTracker, ResourceKind};
use crate::model::{
    deploy_col, is_digest_reference, script_col, split_file_list, var_col, DeployAction,
    ExecTarget, Flag, VarType,
};
use crate::table::{ControlTable, SchemaVersion, TableKind};

/// A data row tagged with the table it belongs to
#[derive(Debug, Clone, Copy)]
pub enum ControlRow<'a> {
    Variable(&'a [String]),
    Deploy(&'a [String], SchemaVersion),
    Script(&'a [String]),
}

impl<'a> ControlRow<'a> {
    pub fn new(kind: TableKind, version: SchemaVersion, cells: &'a [String]) -> Self {
        match kind {
            TableKind::Variables => Self::Variable(cells),
            TableKind::Deploy => Self::Deploy(cells, version),
            TableKind::Script => Self::Script(cells),
        }
    }
}

/// Validation result for one table
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub kind: TableKind,
    pub version: SchemaVersion,
    pub rows_checked: usize,
    pub errors: ErrorMatrix,
}

impl TableReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates control tables against their rule sets
pub struct RuleValidator<'a> {
    root: &'a InstallRoot,
}

/// Per-table state threaded through the rows
struct RowCursor<'t> {
    table: &'t ControlTable,
    row: usize,
    cells: &'t [String],
    errors: ErrorMatrix,
    ranks: RankTracker,
}

impl<'t> RowCursor<'t> {
    fn enter(&mut self, row: usize, cells: &'t [String]) {
        self.row = row;
        self.cells = cells;
    }

    fn cell(&self, column: usize) -> &str {
        self.cells.get(column).map(|c| c.trim()).unwrap_or("")
    }

    fn raise(&mut self, column: usize, kind: CheckErrorKind, message: impl Into<String>) {
        let error = CheckError {
            kind,
            table: self.table.kind,
            row: self.row,
            column,
            header: self.table.header_name(column).to_string(),
            value: self.cell(column).to_string(),
            message: message.into(),
        };
        debug!(%error, "check failed");
        self.errors.push(error);
    }

    fn require(&mut self, columns: impl IntoIterator<Item = usize>) {
        for column in columns {
            if self.cell(column).is_empty() {
                self.raise(column, CheckErrorKind::MissingValue, "value is required");
            }
        }
    }
}

impl<'a> RuleValidator<'a> {
    pub fn new(root: &'a InstallRoot) -> Self {
        Self { root }
    }

    /// Validate every non-blank row of a table
    pub fn validate(&self, table: &ControlTable) -> TableReport {
        let mut cursor = RowCursor {
            table,
            row: 0,
            cells: &[],
            errors: ErrorMatrix::new(),
            ranks: RankTracker::new(),
        };
        let mut rows_checked = 0;

        for (idx, cells) in table.data_rows() {
            rows_checked += 1;
            match ControlRow::new(table.kind, table.version, cells) {
                ControlRow::Variable(cells) => {
                    cursor.enter(idx, cells);
                    self.check_variable(&mut cursor);
                }
                ControlRow::Deploy(cells, version) => {
                    cursor.enter(idx, cells);
                    self.check_deploy(&mut cursor, version);
                }
                ControlRow::Script(cells) => {
                    cursor.enter(idx, cells);
                    self.check_script(&mut cursor);
                }
            }
        }

        debug!(
            table = table.kind.label(),
            version = %table.version,
            rows_checked,
            errors = cursor.errors.len(),
            "table validated"
        );

        TableReport {
            kind: table.kind,
            version: table.version,
            rows_checked,
            errors: cursor.errors,
        }
    }

    fn check_path(&self, cursor: &mut RowCursor<'_>, column: usize, path: &str) {
        if let Err(e) = self.root.resolve(path) {
            cursor.raise(
                column,
                CheckErrorKind::ReferencedPathMissing,
                format!("relative path `{}` does not resolve: {}", path, e),
            );
        }
    }

    fn check_variable(&self, cursor: &mut RowCursor<'_>) {
        cursor.require(var_col::INDEX..=var_col::TYPE);

        let var_type = cursor.cell(var_col::TYPE).to_string();
        if !var_type.is_empty() && VarType::parse(&var_type).is_none() {
            cursor.raise(
                var_col::TYPE,
                CheckErrorKind::UnsupportedVariableType,
                "variable type must be 字符串, 数值 or 布尔",
            );
        }

        for path in split_file_list(cursor.cell(var_col::FILES)) {
            self.check_path(cursor, var_col::FILES, &path);
        }
    }

    fn check_deploy(&self, cursor: &mut RowCursor<'_>, version: SchemaVersion) {
        let action = DeployAction::parse(cursor.cell(deploy_col::ACTION), version);

        if action == Some(DeployAction::ImagePull) {
            cursor.require([deploy_col::STEP, deploy_col::IMAGE]);
            let manifest = cursor.cell(deploy_col::MANIFEST).to_string();
            if !manifest.is_empty() {
                self.check_path(cursor, deploy_col::MANIFEST, &manifest);
            }
            return;
        }

        cursor.require(deploy_col::STEP..=deploy_col::ACTION);

        let kind_cell = cursor.cell(deploy_col::KIND).to_string();
        let kind = ResourceKind::parse(&kind_cell);
        if !kind_cell.is_empty() && kind.is_none() {
            cursor.raise(
                deploy_col::KIND,
                CheckErrorKind::UnsupportedResourceKind,
                "resource kind is not supported",
            );
        }

        if !cursor.cell(deploy_col::ACTION).is_empty() && action.is_none() {
            let expected = if version >= SchemaVersion::V1_1 {
                "更新, 下线, 重启 or 镜像拉取"
            } else {
                "更新, 下线 or 重启"
            };
            cursor.raise(
                deploy_col::ACTION,
                CheckErrorKind::UnsupportedDeployAction,
                format!("deploy action must be {}", expected),
            );
        }

        if action != Some(DeployAction::Update) {
            return;
        }

        if let Some(kind) = kind {
            if let Err((max, max_kind)) = cursor.ranks.observe(kind) {
                cursor.raise(
                    deploy_col::KIND,
                    CheckErrorKind::DeployOrderViolation,
                    format!(
                        "{} (rank {}) must not be updated after {} (rank {})",
                        kind,
                        kind.rank(),
                        max_kind,
                        max
                    ),
                );
            }
        }

        let manifest = cursor.cell(deploy_col::MANIFEST).to_string();
        if manifest.is_empty() {
            cursor.raise(
                deploy_col::MANIFEST,
                CheckErrorKind::ManifestPathMissing,
                "update rows require a manifest path",
            );
        } else {
            self.check_path(cursor, deploy_col::MANIFEST, &manifest);
            if let Some(kind) = kind {
                if !kind.matches_manifest(&manifest) {
                    cursor.raise(
                        deploy_col::MANIFEST,
                        CheckErrorKind::ManifestNamingViolation,
                        format!(
                            "manifest file name must start with `{}` and end in .yaml or .yml",
                            kind.aliases()[0]
                        ),
                    );
                }
            }
        }

        if let Some(kind) = kind.filter(ResourceKind::requires_image) {
            let image = cursor.cell(deploy_col::IMAGE).to_string();
            if image.is_empty() {
                cursor.raise(
                    deploy_col::IMAGE,
                    CheckErrorKind::MissingValue,
                    format!("{} rows require an image reference", kind),
                );
            } else if version >= SchemaVersion::V1_1 && !is_digest_reference(&image) {
                cursor.raise(
                    deploy_col::IMAGE,
                    CheckErrorKind::InvalidImageReference,
                    "image reference must look like registry/group/project/name@digest",
                );
            }
        }
    }

    fn check_script(&self, cursor: &mut RowCursor<'_>) {
        cursor.require(script_col::STEP..=script_col::TARGET);

        let script = cursor.cell(script_col::PATH).to_string();
        if !script.is_empty() {
            self.check_path(cursor, script_col::PATH, &script);
        }

        for column in [script_col::IDEMPOTENT, script_col::DEPENDENCY] {
            let value = cursor.cell(column).to_string();
            if !value.is_empty() && Flag::parse(&value).is_none() {
                cursor.raise(
                    column,
                    CheckErrorKind::InvalidBooleanFlag,
                    "fill in 是 or 否; put explanations in the note column",
                );
            }
        }

        let target = cursor.cell(script_col::TARGET).to_string();
        if !target.is_empty() && ExecTarget::parse(&target).is_none() {
            cursor.raise(
                script_col::TARGET,
                CheckErrorKind::InvalidExecTarget,
                "fill in 宿主机 or 容器; put explanations in the note column",
            );
        }
    }
}
