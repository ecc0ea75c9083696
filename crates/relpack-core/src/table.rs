//! Control table loading and schema detection
//!
//! Control tables are comma-delimited UTF-8 files with an optional byte-order
//! mark. The header row identifies the table layout: each table kind owns an
//! ordered list of known headers, and an exact match selects the schema
//! version. Anything else is a [`CoreError::SchemaMismatch`].

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// The three control tables of a release artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Variables,
    Deploy,
    Script,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [Self::Variables, Self::Deploy, Self::Script];

    /// Name used in reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Variables => "global-vars",
            Self::Deploy => "deploy-execution-plan",
            Self::Script => "script-execution-plan",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Variables => "global-vars.csv",
            Self::Deploy => "deploy-execution-plan.csv",
            Self::Script => "script-execution-plan.csv",
        }
    }

    /// Location relative to the install root
    pub fn relative_path(&self) -> String {
        format!("controls/{}", self.file_name())
    }

    /// Known header layouts, oldest first
    pub fn layouts(&self) -> &'static [(&'static str, SchemaVersion)] {
        match self {
            Self::Variables => &[(
                "序号 变量键（KEY） 变量描述 变量类型 填写示例 文件路径 填写说明",
                SchemaVersion::V1_0,
            )],
            Self::Deploy => &[
                (
                    "步骤 资源类型 资源名称 命名空间 部署类型 YAML路径 镜像包名称 备注",
                    SchemaVersion::V1_0,
                ),
                (
                    "步骤 资源类型 资源名称 命名空间 部署类型 YAML路径 镜像引用（DIGEST） 备注",
                    SchemaVersion::V1_1,
                ),
            ],
            Self::Script => &[(
                "步骤 脚本路径 是否幂等 是否依赖 执行机类型 执行用户 K8S命名空间 负载资源名称 备注",
                SchemaVersion::V1_0,
            )],
        }
    }

    /// Select the schema version for a header row
    pub fn detect_version(&self, header: &[String]) -> Result<SchemaVersion> {
        let joined = header.join(" ");
        self.layouts()
            .iter()
            .find(|(text, _)| *text == joined)
            .map(|(_, version)| *version)
            .ok_or_else(|| CoreError::SchemaMismatch {
                table: self.label().to_string(),
                found: joined,
                expected: Some(format!(
                    "expected one of: {}",
                    self.layouts()
                        .iter()
                        .map(|(text, version)| format!("v{} `{}`", version, text))
                        .collect::<Vec<_>>()
                        .join("; ")
                )),
            })
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Version of a table layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SchemaVersion {
    pub major: u8,
    pub minor: u8,
}

impl SchemaVersion {
    pub const V1_0: SchemaVersion = SchemaVersion { major: 1, minor: 0 };
    pub const V1_1: SchemaVersion = SchemaVersion { major: 1, minor: 1 };
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A parsed control table
#[derive(Debug, Clone)]
pub struct ControlTable {
    pub kind: TableKind,
    pub version: SchemaVersion,
    pub path: PathBuf,
    pub header: Vec<String>,
    /// Data rows, padded to the header width
    pub rows: Vec<Vec<String>>,
    has_bom: bool,
    crlf: bool,
}

impl ControlTable {
    /// Load a control table from disk
    pub fn load(path: impl AsRef<Path>, kind: TableKind) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::TableNotFound {
                table: kind.label().to_string(),
                path: path.display().to_string(),
            });
        }
        let bytes = std::fs::read(path).map_err(|e| CoreError::UnreadableTable {
            table: kind.label().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&bytes, kind, path)
    }

    /// Parse table bytes
    pub fn parse(bytes: &[u8], kind: TableKind, path: impl Into<PathBuf>) -> Result<Self> {
        let has_bom = bytes.starts_with(UTF8_BOM);
        let body = if has_bom {
            &bytes[UTF8_BOM.len()..]
        } else {
            bytes
        };
        let crlf = body.windows(2).any(|w| w == b"\r\n");

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body);

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| CoreError::UnreadableTable {
                table: kind.label().to_string(),
                message: e.to_string(),
            })?;
            records.push(record.iter().map(String::from).collect::<Vec<_>>());
        }

        let mut records = records.into_iter();
        let mut header: Vec<String> = match records.next() {
            Some(header) => header.into_iter().map(|h| h.trim().to_string()).collect(),
            None => {
                return Err(CoreError::MissingHeader {
                    table: kind.label().to_string(),
                });
            }
        };
        while header.last().is_some_and(|h| h.is_empty()) {
            header.pop();
        }
        if header.is_empty() {
            return Err(CoreError::MissingHeader {
                table: kind.label().to_string(),
            });
        }

        let version = kind.detect_version(&header)?;

        let width = header.len();
        let rows = records
            .map(|mut row| {
                if row.len() < width {
                    row.resize(width, String::new());
                }
                row
            })
            .collect();

        Ok(Self {
            kind,
            version,
            path: path.into(),
            header,
            rows,
            has_bom,
            crlf,
        })
    }

    /// Cell text, empty when out of range
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn header_name(&self, column: usize) -> &str {
        self.header.get(column).map(String::as_str).unwrap_or("")
    }

    /// Data rows with at least one non-blank cell, with their index
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[String])> + '_ {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !is_blank_row(row))
            .map(|(idx, row)| (idx, row.as_slice()))
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: impl Into<String>) {
        if let Some(r) = self.rows.get_mut(row) {
            if r.len() <= column {
                r.resize(column + 1, String::new());
            }
            r[column] = value.into();
        }
    }

    /// Serialize back to CSV, keeping the BOM and line endings of the source
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if self.has_bom {
            out.extend_from_slice(UTF8_BOM);
        }
        let terminator = if self.crlf {
            csv::Terminator::CRLF
        } else {
            csv::Terminator::Any(b'\n')
        };
        {
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .terminator(terminator)
                .from_writer(&mut out);
            writer.write_record(&self.header)?;
            for row in &self.rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        Ok(out)
    }

    pub fn has_bom(&self) -> bool {
        self.has_bom
    }
}

/// A row is blank when every cell is empty after trimming
pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}
