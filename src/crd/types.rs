//! Shared types for the PostgresCluster CRD

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// User-supplied labels and annotations for one scope
///
/// Either map may be empty. Keys under the operator's label domain are
/// ignored when the overlay is merged.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Metadata {
    /// Extra labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    /// Overlay with only labels
    pub fn with_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            annotations: BTreeMap::new(),
        }
    }

    /// Add an annotation (builder style)
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Persistent storage for an instance set
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Requested size (e.g., "10Gi")
    pub size: String,

    /// Storage class; cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

/// A named, independently scaled group of database pods
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSetSpec {
    /// Name, unique within the cluster
    pub name: String,

    /// Number of pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Overlay applied to this set's StatefulSet and pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Data volume; an emptyDir is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,
}

impl InstanceSetSpec {
    /// Instance set with one replica and no overlay
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: default_replicas(),
            metadata: None,
            storage: None,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

/// Backup configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupsSpec {
    /// pgBackRest settings
    #[serde(default)]
    pub pgbackrest: PgBackRestSpec,
}

/// pgBackRest repositories and their schedules
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PgBackRestSpec {
    /// Overlay applied to every pgBackRest object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Image override for backup jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Backup repositories
    #[serde(default)]
    pub repos: Vec<RepoSpec>,
}

/// One backup repository
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepoSpec {
    /// Repository name (e.g., "repo1")
    pub name: String,

    /// Overlay applied to this repository's objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Cron schedules; no CronJobs are emitted when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_schedules: Option<BackupSchedules>,
}

/// Highest repository index pgBackRest is configured with
pub const MAX_REPOS: u32 = 4;

impl RepoSpec {
    /// pgBackRest repository index: `repo2` is 2
    ///
    /// `None` unless the name is `repo1` through `repo{MAX_REPOS}`.
    pub fn index(&self) -> Option<u32> {
        let digits = self.name.strip_prefix("repo")?;
        if digits.starts_with('0') {
            return None;
        }
        digits
            .parse::<u32>()
            .ok()
            .filter(|i| (1..=MAX_REPOS).contains(i))
    }
}

/// Cron expressions per backup type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSchedules {
    /// Full backup schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<String>,

    /// Differential backup schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differential: Option<String>,

    /// Incremental backup schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental: Option<String>,
}

impl BackupSchedules {
    /// Configured schedules in full, differential, incremental order
    pub fn entries(&self) -> impl Iterator<Item = (BackupType, &str)> {
        [
            (BackupType::Full, self.full.as_deref()),
            (BackupType::Differential, self.differential.as_deref()),
            (BackupType::Incremental, self.incremental.as_deref()),
        ]
        .into_iter()
        .filter_map(|(t, s)| s.map(|s| (t, s)))
    }
}

/// pgBackRest backup type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackupType {
    /// Full backup
    Full,
    /// Differential backup (changes since last full)
    Differential,
    /// Incremental backup (changes since last backup)
    Incremental,
}

impl BackupType {
    /// Short form used by pgBackRest and in object names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Differential => "diff",
            Self::Incremental => "incr",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection proxy configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    /// pgBouncer connection pooler
    #[serde(default, rename = "pgBouncer", skip_serializing_if = "Option::is_none")]
    pub pgbouncer: Option<PgBouncerSpec>,
}

/// pgBouncer deployment settings
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PgBouncerSpec {
    /// Overlay applied to the proxy Deployment, its pods and its Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Number of proxy pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Listen port
    #[serde(default = "default_pgbouncer_port")]
    pub port: i32,

    /// Image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Default for PgBouncerSpec {
    fn default() -> Self {
        Self {
            metadata: None,
            replicas: default_replicas(),
            port: default_pgbouncer_port(),
            image: None,
        }
    }
}

fn default_pgbouncer_port() -> i32 {
    crate::DEFAULT_PGBOUNCER_PORT
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Reconciled)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}
