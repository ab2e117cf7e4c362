//! Custom Resource Definitions for the pgcluster operator

mod cluster;
mod schedule;
mod types;

pub use cluster::{PostgresCluster, PostgresClusterSpec, PostgresClusterStatus};
pub use schedule::validate_schedule;
pub use types::{
    BackupSchedules, BackupType, BackupsSpec, Condition, ConditionStatus, InstanceSetSpec,
    Metadata, PgBackRestSpec, PgBouncerSpec, ProxySpec, RepoSpec, StorageSpec, MAX_REPOS,
};
