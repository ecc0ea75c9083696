//! Release artifact layout and sandboxed path resolution
//!
//! Every path named in a control table is relative to the install root and
//! must resolve inside it.
//!
//! # Security
//!
//! - Absolute paths are rejected
//! - Paths are canonicalized, so `..` components and symlinks are resolved
//! - A resolved path outside the install root is rejected

use std::path::{Component, Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::table::TableKind;

/// Directories holding template files, in enumeration order
pub const TEMPLATE_TREES: [&str; 3] = ["k8s-resources", "scripts", "controls"];

/// Optional configuration file at the install root
pub const CONFIG_FILE: &str = "relpack.yaml";

/// A template file found under one of the managed trees
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TemplateEntry {
    /// Path relative to the install root, `/`-separated
    pub relative: String,
    pub path: PathBuf,
}

/// The root directory of an unpacked release artifact
#[derive(Debug, Clone)]
pub struct InstallRoot {
    root: PathBuf,
    canonical_root: PathBuf,
}

impl InstallRoot {
    /// Open an install directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory doesn't exist or cannot be canonicalized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(CoreError::ArtifactNotFound {
                path: root.display().to_string(),
            });
        }

        let canonical_root = root.canonicalize().map_err(|e| CoreError::FileAccess {
            path: root.display().to_string(),
            message: format!("failed to canonicalize install root: {}", e),
        })?;

        Ok(Self {
            root,
            canonical_root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn table_path(&self, kind: TableKind) -> PathBuf {
        self.root.join(kind.relative_path())
    }

    /// Resolve a relative path and verify it exists inside the install root
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = relative.trim();
        let requested = Path::new(relative);

        if requested.is_absolute() {
            return Err(CoreError::FileAccess {
                path: relative.to_string(),
                message: "absolute paths are not allowed".to_string(),
            });
        }

        let full_path = self.root.join(requested);
        if !full_path.exists() {
            return Err(CoreError::FileAccess {
                path: relative.to_string(),
                message: "file not found".to_string(),
            });
        }

        let canonical = full_path
            .canonicalize()
            .map_err(|e| CoreError::FileAccess {
                path: relative.to_string(),
                message: format!("failed to resolve path: {}", e),
            })?;

        if !canonical.starts_with(&self.canonical_root) {
            return Err(CoreError::FileAccess {
                path: relative.to_string(),
                message: "path escapes the install directory".to_string(),
            });
        }

        Ok(canonical)
    }

    /// Relative, `/`-separated form of a path under the root
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Every template file under the managed trees
    ///
    /// Trees are walked in [`TEMPLATE_TREES`] order with entries sorted by
    /// name. Any file named like the variable table is skipped, and missing
    /// trees are ignored. Entries that cannot be read (an unreadable
    /// directory, a file vanishing mid-walk) come back as errors in walk
    /// order.
    pub fn template_files(&self) -> Vec<Result<TemplateEntry>> {
        let variable_table = TableKind::Variables.file_name();
        let mut entries = Vec::new();

        for tree in TEMPLATE_TREES {
            let dir = self.root.join(tree);
            if !dir.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&dir).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e.path().unwrap_or(&dir);
                        tracing::warn!(path = %path.display(), "cannot walk template tree: {}", e);
                        entries.push(Err(CoreError::FileAccess {
                            path: self.relative(path),
                            message: e.to_string(),
                        }));
                        continue;
                    }
                };
                if !entry.file_type().is_file() || entry.file_name() == variable_table {
                    continue;
                }
                entries.push(Ok(TemplateEntry {
                    relative: self.relative(entry.path()),
                    path: entry.path().to_path_buf(),
                }));
            }
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_root() -> TempDir {
        let temp = TempDir::new().unwrap();

        std::fs::create_dir_all(temp.path().join("controls")).unwrap();
        std::fs::create_dir_all(temp.path().join("k8s-resources/web")).unwrap();
        std::fs::create_dir_all(temp.path().join("scripts")).unwrap();

        std::fs::write(temp.path().join("controls/global-vars.csv"), "x").unwrap();
        std::fs::write(temp.path().join("controls/deploy-execution-plan.csv"), "x").unwrap();
        std::fs::write(temp.path().join("k8s-resources/web/deployment.yaml"), "kind: Deployment")
            .unwrap();
        std::fs::write(temp.path().join("k8s-resources/namespace.yaml"), "kind: Namespace")
            .unwrap();
        std::fs::write(temp.path().join("scripts/init.sh"), "#!/bin/bash").unwrap();
        std::fs::write(temp.path().join("README.md"), "# release").unwrap();

        temp
    }

    #[test]
    fn test_resolve_existing_file() {
        let temp = create_test_root();
        let root = InstallRoot::open(temp.path()).unwrap();

        assert!(root.resolve("scripts/init.sh").is_ok());
        assert!(root.resolve(" k8s-resources/web/deployment.yaml ").is_ok());
        assert!(root.resolve("scripts/missing.sh").is_err());
    }

    #[test]
    fn test_resolve_rejects_absolute_paths() {
        let temp = create_test_root();
        let root = InstallRoot::open(temp.path()).unwrap();

        let err = root.resolve("/etc/passwd").unwrap_err();
        assert!(err.to_string().contains("absolute paths"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let temp = create_test_root();
        let inner = temp.path().join("release");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(temp.path().join("outside.txt"), "secret").unwrap();

        let root = InstallRoot::open(&inner).unwrap();
        let err = root.resolve("../outside.txt").unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }

    #[test]
    fn test_open_missing_root() {
        let temp = TempDir::new().unwrap();
        let err = InstallRoot::open(temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, CoreError::ArtifactNotFound { .. }));
    }

    #[test]
    fn test_template_files_order_and_exclusions() {
        let temp = create_test_root();
        let root = InstallRoot::open(temp.path()).unwrap();

        let files: Vec<String> = root
            .template_files()
            .into_iter()
            .map(|e| e.unwrap().relative)
            .collect();

        assert_eq!(
            files,
            vec![
                "k8s-resources/namespace.yaml",
                "k8s-resources/web/deployment.yaml",
                "scripts/init.sh",
                "controls/deploy-execution-plan.csv",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_template_files_reports_unreadable_directory() {
        use std::os::unix::fs::PermissionsExt;

        let temp = create_test_root();
        let locked = temp.path().join("k8s-resources/web");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read_dir(&locked).is_ok() {
            // running as root, permissions are not enforced
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let root = InstallRoot::open(temp.path()).unwrap();
        let entries = root.template_files();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        let failed: Vec<&CoreError> = entries.iter().filter_map(|e| e.as_ref().err()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].to_string().contains("k8s-resources/web"));
        assert!(
            entries
                .iter()
                .filter_map(|e| e.as_ref().ok())
                .any(|e| e.relative == "scripts/init.sh")
        );
    }
}
