//! Kubernetes resource kinds accepted by the deploy plan
//!
//! Every kind carries a deployment rank. Update rows in the deploy plan must
//! appear in non-decreasing rank order so that dependencies (namespaces,
//! RBAC, configuration) exist before the workloads that use them.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use serde::{Serialize, Serializer};

/// Resource kind named in the `资源类型` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    ServiceAccount,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Service,
    HorizontalPodAutoscaler,
    VerticalPodAutoscaler,
    Ingress,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 18] = [
        Self::Namespace,
        Self::ServiceAccount,
        Self::Role,
        Self::ClusterRole,
        Self::RoleBinding,
        Self::ClusterRoleBinding,
        Self::ConfigMap,
        Self::Secret,
        Self::PersistentVolumeClaim,
        Self::Deployment,
        Self::StatefulSet,
        Self::DaemonSet,
        Self::Job,
        Self::CronJob,
        Self::Service,
        Self::HorizontalPodAutoscaler,
        Self::VerticalPodAutoscaler,
        Self::Ingress,
    ];

    /// Lowercase spellings that name this kind
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Namespace => &["namespace"],
            Self::ServiceAccount => &["serviceaccount", "sa"],
            Self::Role => &["role"],
            Self::ClusterRole => &["clusterrole", "cr"],
            Self::RoleBinding => &["rolebinding"],
            Self::ClusterRoleBinding => &["clusterrolebinding", "crb"],
            Self::ConfigMap => &["configmap"],
            Self::Secret => &["secret"],
            Self::PersistentVolumeClaim => &["persistentvolumeclaim", "pvc"],
            Self::Deployment => &["deployment"],
            Self::StatefulSet => &["statefulset"],
            Self::DaemonSet => &["daemonset"],
            Self::Job => &["job"],
            Self::CronJob => &["cronjob"],
            Self::Service => &["service"],
            Self::HorizontalPodAutoscaler => &["horizontalpodautoscaler", "hpa"],
            Self::VerticalPodAutoscaler => &["verticalpodautoscaler", "vpa"],
            Self::Ingress => &["ingress"],
        }
    }

    /// Parse a kind, ignoring case and accepting any alias
    pub fn parse(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.aliases().contains(&lower.as_str()))
    }

    /// Canonical Kubernetes spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::ServiceAccount => "ServiceAccount",
            Self::Role => "Role",
            Self::ClusterRole => "ClusterRole",
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::Service => "Service",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Self::VerticalPodAutoscaler => "VerticalPodAutoscaler",
            Self::Ingress => "Ingress",
        }
    }

    /// Deployment rank used by the update ordering rule
    pub fn rank(&self) -> DeployRank {
        match self {
            Self::Namespace => DeployRank::major(0),
            Self::ServiceAccount | Self::Role | Self::ClusterRole => DeployRank::minor(1, 0),
            Self::RoleBinding | Self::ClusterRoleBinding => DeployRank::minor(1, 1),
            Self::ConfigMap | Self::Secret | Self::PersistentVolumeClaim => DeployRank::major(1),
            Self::Deployment
            | Self::StatefulSet
            | Self::DaemonSet
            | Self::Job
            | Self::CronJob
            | Self::Service => DeployRank::major(2),
            Self::HorizontalPodAutoscaler | Self::VerticalPodAutoscaler => DeployRank::major(3),
            Self::Ingress => DeployRank::major(4),
        }
    }

    /// Workload kinds run containers and must name an image
    pub fn requires_image(&self) -> bool {
        matches!(
            self,
            Self::Deployment | Self::StatefulSet | Self::DaemonSet | Self::Job | Self::CronJob
        )
    }

    /// Check a manifest file name against this kind
    ///
    /// The file must have a YAML extension, and its stem up to the first `-`
    /// must be an alias of this kind: `deployment-web.yaml` and `sa.yml` are
    /// accepted for `Deployment` and `ServiceAccount` respectively.
    pub fn matches_manifest(&self, manifest_path: &str) -> bool {
        let path = Path::new(manifest_path.trim());
        let has_yaml_ext = path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                ext == "yaml" || ext == "yml"
            })
            .unwrap_or(false);
        if !has_yaml_ext {
            return false;
        }

        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy()) else {
            return false;
        };
        let base = stem.split('-').next().unwrap_or_default();
        Self::parse(base) == Some(*self)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized with its canonical spelling, whichever alias the table used
impl Serialize for ResourceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Position of a kind in the deployment order
///
/// Ranks are either whole (`1`) or carry a sub-level (`1.0`, `1.1`). A whole
/// rank is equal to every sub-level of the same major rank, so ConfigMaps may
/// be interleaved freely with RBAC rows while RBAC principals must still come
/// before RBAC bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployRank {
    pub major: u8,
    pub minor: Option<u8>,
}

impl DeployRank {
    pub const fn major(major: u8) -> Self {
        Self { major, minor: None }
    }

    pub const fn minor(major: u8, minor: u8) -> Self {
        Self {
            major,
            minor: Some(minor),
        }
    }

    /// Compare two ranks with the mixed whole/sub-level rule
    pub fn compare(&self, other: &DeployRank) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => match (self.minor, other.minor) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => Ordering::Equal,
            },
            ord => ord,
        }
    }
}

impl fmt::Display for DeployRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "{}.{}", self.major, minor),
            None => write!(f, "{}", self.major),
        }
    }
}

/// Running maximum over the ranks of update rows
///
/// The maximum is never lowered and never reset, including across
/// decommission and restart rows.
#[derive(Debug, Clone, Default)]
pub struct RankTracker {
    max: Option<(DeployRank, ResourceKind)>,
}

impl RankTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next update row
    ///
    /// Returns the kind holding the current maximum when `kind` would move
    /// the sequence backwards.
    pub fn observe(&mut self, kind: ResourceKind) -> Result<(), (DeployRank, ResourceKind)> {
        let rank = kind.rank();
        match self.max {
            None => {
                self.max = Some((rank, kind));
                Ok(())
            }
            Some((max, max_kind)) => match rank.compare(&max) {
                Ordering::Less => Err((max, max_kind)),
                Ordering::Greater => {
                    self.max = Some((rank, kind));
                    Ok(())
                }
                Ordering::Equal => {
                    if max.minor.is_none() && rank.minor.is_some() {
                        self.max = Some((rank, kind));
                    }
                    Ok(())
                }
            },
        }
    }
}
