//! PostgresCluster Custom Resource Definition
//!
//! A PostgresCluster declares the desired topology of one database cluster:
//! instance sets, backup repositories and an optional connection proxy.
//! Everything else the operator creates is derived from it.

use std::collections::HashSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::schedule::validate_schedule;
use super::types::{BackupsSpec, Condition, InstanceSetSpec, Metadata, ProxySpec, MAX_REPOS};
use crate::Error;

/// Specification for a PostgresCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "postgres.pgcluster.dev",
    version = "v1beta1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    shortname = "pgc",
    status = "PostgresClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Reconciled","type":"string","jsonPath":".status.conditions[?(@.type==\"Reconciled\")].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// Overlay applied to every object of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Database port; 5432 when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Database image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Instance sets, unique by name
    pub instances: Vec<InstanceSetSpec>,

    /// Backup configuration
    #[serde(default)]
    pub backups: BackupsSpec,

    /// Connection proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
}

impl PostgresClusterSpec {
    /// Effective database port
    pub fn port(&self) -> i32 {
        self.port.unwrap_or(crate::DEFAULT_POSTGRES_PORT)
    }

    /// Validate the parts of the spec the schema cannot express
    ///
    /// Every failure is a [`Error::SpecInvalid`] naming the offending field.
    pub fn validate(&self, cluster: &str) -> Result<(), Error> {
        let port = self.port();
        if !(1..=65535).contains(&port) {
            return Err(Error::spec_invalid_for_field(
                cluster,
                "spec.port",
                format!("port {port} is outside 1..=65535"),
            ));
        }

        validate_child_name(
            cluster,
            "metadata.name",
            format!("{cluster}-replicas"),
            MAX_NAME_LEN,
        )?;

        if self.instances.is_empty() {
            return Err(Error::spec_invalid_for_field(
                cluster,
                "spec.instances",
                "at least one instance set is required",
            ));
        }

        let mut seen = HashSet::new();
        for (i, set) in self.instances.iter().enumerate() {
            let field = format!("spec.instances[{i}]");
            validate_name(cluster, &format!("{field}.name"), &set.name)?;
            validate_child_name(
                cluster,
                &format!("{field}.name"),
                format!("{cluster}-{}", set.name),
                MAX_NAME_LEN,
            )?;
            if !seen.insert(set.name.as_str()) {
                return Err(Error::spec_invalid_for_field(
                    cluster,
                    format!("{field}.name"),
                    format!("duplicate instance set name {:?}", set.name),
                ));
            }
            if set.replicas < 0 {
                return Err(Error::spec_invalid_for_field(
                    cluster,
                    format!("{field}.replicas"),
                    "replicas cannot be negative",
                ));
            }
        }

        let mut seen = HashSet::new();
        for (i, repo) in self.backups.pgbackrest.repos.iter().enumerate() {
            let field = format!("spec.backups.pgbackrest.repos[{i}]");
            validate_name(cluster, &format!("{field}.name"), &repo.name)?;
            if repo.index().is_none() {
                return Err(Error::spec_invalid_for_field(
                    cluster,
                    format!("{field}.name"),
                    format!("repository name {:?} must be repo1 through repo{MAX_REPOS}", repo.name),
                ));
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(Error::spec_invalid_for_field(
                    cluster,
                    format!("{field}.name"),
                    format!("duplicate repository name {:?}", repo.name),
                ));
            }
            if let Some(schedules) = &repo.backup_schedules {
                for (backup_type, schedule) in schedules.entries() {
                    validate_child_name(
                        cluster,
                        &format!("{field}.name"),
                        format!("{cluster}-{}-{backup_type}", repo.name),
                        MAX_CRONJOB_NAME_LEN,
                    )?;
                    validate_schedule(schedule).map_err(|reason| {
                        Error::spec_invalid_for_field(
                            cluster,
                            format!("{field}.backupSchedules"),
                            format!("{backup_type} schedule {schedule:?}: {reason}"),
                        )
                    })?;
                }
            }
        }

        if let Some(bouncer) = self.proxy.as_ref().and_then(|p| p.pgbouncer.as_ref()) {
            validate_child_name(
                cluster,
                "metadata.name",
                format!("{cluster}-pgbouncer"),
                MAX_NAME_LEN,
            )?;
            if !(1..=65535).contains(&bouncer.port) {
                return Err(Error::spec_invalid_for_field(
                    cluster,
                    "spec.proxy.pgBouncer.port",
                    format!("port {} is outside 1..=65535", bouncer.port),
                ));
            }
        }

        Ok(())
    }
}

/// Longest Service, StatefulSet or Deployment name the operator emits
const MAX_NAME_LEN: usize = 63;

/// CronJob names leave room for the 11-character suffix of their Jobs
const MAX_CRONJOB_NAME_LEN: usize = 52;

fn validate_child_name(
    cluster: &str,
    field: &str,
    child: String,
    max: usize,
) -> Result<(), Error> {
    if child.len() <= max {
        return Ok(());
    }
    Err(Error::spec_invalid_for_field(
        cluster,
        field,
        format!("object name {child:?} is longer than {max} characters"),
    ))
}

/// Child object names are built from these, so they must be DNS labels
fn validate_name(cluster: &str, field: &str, name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::spec_invalid_for_field(
            cluster,
            field,
            format!("{name:?} is not a valid DNS label"),
        ))
    }
}

/// Status for a PostgresCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterStatus {
    /// Generation of the spec the conditions describe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions, at most one per type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Consecutive passes that ended in a transient error
    #[serde(default)]
    pub transient_failures: u32,
}

impl PostgresClusterStatus {
    /// Set or replace the condition of the same type (builder style)
    ///
    /// The transition time is kept when the condition status did not change.
    pub fn condition(mut self, mut condition: Condition) -> Self {
        if let Some(existing) = self
            .conditions
            .iter()
            .find(|c| c.type_ == condition.type_)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }

    /// Set the observed generation (builder style)
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Set the consecutive transient failure count (builder style)
    pub fn transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Look up a condition by type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
