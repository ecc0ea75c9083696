//! Typed rows of the control tables
//!
//! Tables are authored in Chinese, so every enumerated cell accepts the
//! Chinese label as well as the English name (compared case-insensitively).

use serde::Serialize;

use crate::kind::ResourceKind;
use crate::table::{ControlTable, SchemaVersion, TableKind};

/// Column positions of `global-vars.csv`
pub mod var_col {
    pub const INDEX: usize = 0;
    pub const KEY: usize = 1;
    pub const DESCRIPTION: usize = 2;
    pub const TYPE: usize = 3;
    pub const EXAMPLE: usize = 4;
    pub const FILES: usize = 5;
    pub const NOTE: usize = 6;
}

/// Column positions of `deploy-execution-plan.csv`
pub mod deploy_col {
    pub const STEP: usize = 0;
    pub const KIND: usize = 1;
    pub const NAME: usize = 2;
    pub const NAMESPACE: usize = 3;
    pub const ACTION: usize = 4;
    pub const MANIFEST: usize = 5;
    pub const IMAGE: usize = 6;
    pub const NOTE: usize = 7;
}

/// Column positions of `script-execution-plan.csv`
pub mod script_col {
    pub const STEP: usize = 0;
    pub const PATH: usize = 1;
    pub const IDEMPOTENT: usize = 2;
    pub const DEPENDENCY: usize = 3;
    pub const TARGET: usize = 4;
    pub const USER: usize = 5;
    pub const NAMESPACE: usize = 6;
    pub const RESOURCE: usize = 7;
    pub const NOTE: usize = 8;
}

fn matches_label(value: &str, chinese: &str, english: &str) -> bool {
    let value = value.trim();
    value == chinese || value.eq_ignore_ascii_case(english)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Number,
    Boolean,
}

impl VarType {
    pub fn parse(value: &str) -> Option<Self> {
        if matches_label(value, "字符串", "string") {
            Some(Self::String)
        } else if matches_label(value, "数值", "number") {
            Some(Self::Number)
        } else if matches_label(value, "布尔", "boolean") {
            Some(Self::Boolean)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployAction {
    Update,
    Decommission,
    Restart,
    ImagePull,
}

impl DeployAction {
    /// Parse an action; `image-pull` only exists from schema 1.1 on
    pub fn parse(value: &str, version: SchemaVersion) -> Option<Self> {
        if matches_label(value, "更新", "update") {
            Some(Self::Update)
        } else if matches_label(value, "下线", "decommission") {
            Some(Self::Decommission)
        } else if matches_label(value, "重启", "restart") {
            Some(Self::Restart)
        } else if version >= SchemaVersion::V1_1 && matches_label(value, "镜像拉取", "image-pull")
        {
            Some(Self::ImagePull)
        } else {
            None
        }
    }

    /// Whether the row's manifest images are rewritten on commit
    pub fn rewrites_images(&self) -> bool {
        !matches!(self, Self::Decommission | Self::Restart)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Yes,
    No,
}

impl Flag {
    pub fn parse(value: &str) -> Option<Self> {
        if matches_label(value, "是", "yes") {
            Some(Self::Yes)
        } else if matches_label(value, "否", "no") {
            Some(Self::No)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecTarget {
    Host,
    Container,
}

impl ExecTarget {
    pub fn parse(value: &str) -> Option<Self> {
        if matches_label(value, "宿主机", "host") {
            Some(Self::Host)
        } else if matches_label(value, "容器", "container") {
            Some(Self::Container)
        } else {
            None
        }
    }
}

/// Split a file-path cell into paths
///
/// A multi-line cell lists one path per line. A single-line cell may list
/// several paths separated by commas (ASCII or full-width).
pub fn split_file_list(cell: &str) -> Vec<String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Vec::new();
    }
    let parts: Vec<&str> = if cell.lines().count() > 1 {
        cell.lines().collect()
    } else {
        cell.split([',', '，']).collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Structural check for a digest image reference
///
/// Requires `a/b/c/d@digest`: at least four non-empty path segments before a
/// single `@` and a non-empty digest. This is a heuristic, not the full
/// reference grammar.
pub fn is_digest_reference(reference: &str) -> bool {
    let Some((path, digest)) = reference.trim().split_once('@') else {
        return false;
    };
    if digest.is_empty() || digest.contains('@') {
        return false;
    }
    let segments: Vec<&str> = path.split('/').collect();
    segments.len() >= 4 && segments.iter().all(|s| !s.is_empty())
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// A row of `global-vars.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    /// Data row index in the table
    pub row: usize,
    pub key: String,
    pub description: String,
    pub var_type: VarType,
    /// Bound value substituted for the key
    pub example: String,
    pub files: Vec<String>,
    pub note: String,
}

impl Variable {
    pub fn from_row(row: usize, cells: &[String]) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or("");
        let key = cell(var_col::KEY).trim();
        if key.is_empty() {
            return None;
        }
        Some(Self {
            row,
            key: key.to_string(),
            description: cell(var_col::DESCRIPTION).trim().to_string(),
            var_type: VarType::parse(cell(var_col::TYPE))?,
            example: cell(var_col::EXAMPLE).to_string(),
            files: split_file_list(cell(var_col::FILES)),
            note: cell(var_col::NOTE).to_string(),
        })
    }
}

/// A row of `deploy-execution-plan.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployStep {
    pub row: usize,
    pub step: String,
    /// `None` for image-pull rows, which carry no resource
    pub kind: Option<ResourceKind>,
    pub resource_name: String,
    pub namespace: String,
    pub action: DeployAction,
    pub manifest_path: Option<String>,
    pub image_reference: Option<String>,
    pub note: String,
}

impl DeployStep {
    pub fn from_row(row: usize, cells: &[String], version: SchemaVersion) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or("");
        let action = DeployAction::parse(cell(deploy_col::ACTION), version)?;
        let kind = ResourceKind::parse(cell(deploy_col::KIND));
        if kind.is_none() && action != DeployAction::ImagePull {
            return None;
        }
        Some(Self {
            row,
            step: cell(deploy_col::STEP).trim().to_string(),
            kind,
            resource_name: cell(deploy_col::NAME).trim().to_string(),
            namespace: cell(deploy_col::NAMESPACE).trim().to_string(),
            action,
            manifest_path: optional(cell(deploy_col::MANIFEST)),
            image_reference: optional(cell(deploy_col::IMAGE)),
            note: cell(deploy_col::NOTE).to_string(),
        })
    }
}

/// A row of `script-execution-plan.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptStep {
    pub row: usize,
    pub step: String,
    pub script_path: String,
    pub idempotent: Flag,
    pub has_dependency: Flag,
    pub exec_target: ExecTarget,
    pub exec_user: String,
    pub namespace: String,
    pub resource_name: String,
    pub note: String,
}

impl ScriptStep {
    pub fn from_row(row: usize, cells: &[String]) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or("");
        Some(Self {
            row,
            step: cell(script_col::STEP).trim().to_string(),
            script_path: cell(script_col::PATH).trim().to_string(),
            idempotent: Flag::parse(cell(script_col::IDEMPOTENT))?,
            has_dependency: Flag::parse(cell(script_col::DEPENDENCY))?,
            exec_target: ExecTarget::parse(cell(script_col::TARGET))?,
            exec_user: cell(script_col::USER).trim().to_string(),
            namespace: cell(script_col::NAMESPACE).trim().to_string(),
            resource_name: cell(script_col::RESOURCE).trim().to_string(),
            note: cell(script_col::NOTE).to_string(),
        })
    }
}

/// Typed view over the non-blank rows of a table
pub fn variables(table: &ControlTable) -> Vec<Variable> {
    debug_assert_eq!(table.kind, TableKind::Variables);
    table
        .data_rows()
        .filter_map(|(idx, cells)| Variable::from_row(idx, cells))
        .collect()
}

pub fn deploy_steps(table: &ControlTable) -> Vec<DeployStep> {
    debug_assert_eq!(table.kind, TableKind::Deploy);
    table
        .data_rows()
        .filter_map(|(idx, cells)| DeployStep::from_row(idx, cells, table.version))
        .collect()
}

pub fn script_steps(table: &ControlTable) -> Vec<ScriptStep> {
    debug_assert_eq!(table.kind, TableKind::Script);
    table
        .data_rows()
        .filter_map(|(idx, cells)| ScriptStep::from_row(idx, cells))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_vocabulary() {
        assert_eq!(VarType::parse("字符串"), Some(VarType::String));
        assert_eq!(VarType::parse("Boolean"), Some(VarType::Boolean));
        assert_eq!(VarType::parse("text"), None);

        assert_eq!(Flag::parse("是"), Some(Flag::Yes));
        assert_eq!(Flag::parse("NO"), Some(Flag::No));
        assert_eq!(Flag::parse("maybe"), None);

        assert_eq!(ExecTarget::parse("宿主机"), Some(ExecTarget::Host));
        assert_eq!(ExecTarget::parse("container"), Some(ExecTarget::Container));
        assert_eq!(ExecTarget::parse("vm"), None);
    }

    #[test]
    fn test_image_pull_requires_v1_1() {
        assert_eq!(DeployAction::parse("镜像拉取", SchemaVersion::V1_0), None);
        assert_eq!(
            DeployAction::parse("image-pull", SchemaVersion::V1_1),
            Some(DeployAction::ImagePull)
        );
        assert_eq!(
            DeployAction::parse("更新", SchemaVersion::V1_0),
            Some(DeployAction::Update)
        );
        assert!(!DeployAction::Restart.rewrites_images());
        assert!(DeployAction::ImagePull.rewrites_images());
    }

    #[test]
    fn test_split_file_list() {
        assert_eq!(
            split_file_list("k8s-resources/a.yaml\nscripts/b.sh\n"),
            vec!["k8s-resources/a.yaml", "scripts/b.sh"]
        );
        assert_eq!(
            split_file_list("a.yaml, b.yaml，c.yaml"),
            vec!["a.yaml", "b.yaml", "c.yaml"]
        );
        assert_eq!(split_file_list("  "), Vec::<String>::new());
        // commas inside a multi-line cell are part of the path
        assert_eq!(split_file_list("a,b.yaml\nc.yaml"), vec!["a,b.yaml", "c.yaml"]);
    }

    #[test]
    fn test_digest_reference() {
        assert!(is_digest_reference(
            "registry.example.com/team/project/app@sha256:0123abcd"
        ));
        assert!(!is_digest_reference("registry.example.com/team/app@sha256:0123abcd"));
        assert!(!is_digest_reference("registry.example.com/team/project/app:1.0"));
        assert!(!is_digest_reference("registry.example.com//project/app@sha256:01"));
        assert!(!is_digest_reference("registry.example.com/team/project/app@"));
    }

    #[test]
    fn test_variable_from_row() {
        let row = cells(&["1", "DB_HOST", "database host", "字符串", "10.0.0.1", "a.yaml,b.yaml", ""]);
        let var = Variable::from_row(0, &row).unwrap();
        assert_eq!(var.key, "DB_HOST");
        assert_eq!(var.example, "10.0.0.1");
        assert_eq!(var.files, vec!["a.yaml", "b.yaml"]);

        let blank_key = cells(&["1", " ", "d", "字符串", "x", "", ""]);
        assert!(Variable::from_row(0, &blank_key).is_none());
    }

    #[test]
    fn test_deploy_step_from_row() {
        let row = cells(&[
            "1",
            "sa",
            "app",
            "prod",
            "更新",
            "k8s-resources/sa.yaml",
            "",
            "",
        ]);
        let step = DeployStep::from_row(0, &row, SchemaVersion::V1_0).unwrap();
        assert_eq!(step.kind, Some(ResourceKind::ServiceAccount));
        assert_eq!(step.manifest_path.as_deref(), Some("k8s-resources/sa.yaml"));
        assert_eq!(step.image_reference, None);

        let pull = cells(&["2", "", "", "", "image-pull", "", "r/a/b/c@sha256:1", ""]);
        let step = DeployStep::from_row(1, &pull, SchemaVersion::V1_1).unwrap();
        assert_eq!(step.kind, None);
        assert_eq!(step.action, DeployAction::ImagePull);
    }
}
