//! Intent builders
//!
//! [`ClusterCompiler`] turns one cluster spec into the full list of child
//! objects. Every builder is a pure function of the spec and its scope: no
//! builder reads the store or assumes a sibling object exists, so intents can
//! be applied in any order.
//!
//! The builders are split by target kind:
//! - [`service`] - primary, replica and headless pod Services
//! - [`instance`] - one StatefulSet per instance set
//! - [`proxy`] - pgBouncer Deployment and Service
//! - [`backup`] - pgBackRest CronJobs per repository and backup type

pub mod backup;
pub mod instance;
pub mod proxy;
pub mod service;

use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;

use crate::crd::{Metadata, PostgresClusterSpec};
use crate::intent::{ClusterIdentity, ResourceIntent};
use crate::metadata::MetadataCascade;
use crate::taxonomy::LabelTaxonomy;
use crate::Result;

/// Container images used when the spec does not override them
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDefaults {
    /// PostgreSQL image for instance pods
    pub postgres: String,
    /// pgBackRest image for backup jobs
    pub pgbackrest: String,
    /// pgBouncer image for proxy pods
    pub pgbouncer: String,
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            postgres: "docker.io/library/postgres:16".to_string(),
            pgbackrest: "docker.io/pgbackrest/pgbackrest:2.53".to_string(),
            pgbouncer: "docker.io/bitnami/pgbouncer:1.23.1".to_string(),
        }
    }
}

/// Builds every intent for one cluster
#[derive(Clone, Copy, Debug)]
pub struct ClusterCompiler<'a> {
    identity: &'a ClusterIdentity,
    spec: &'a PostgresClusterSpec,
    taxonomy: &'a LabelTaxonomy,
    images: &'a ImageDefaults,
}

impl<'a> ClusterCompiler<'a> {
    /// Compiler for `spec` owned by `identity`
    pub fn new(
        identity: &'a ClusterIdentity,
        spec: &'a PostgresClusterSpec,
        taxonomy: &'a LabelTaxonomy,
        images: &'a ImageDefaults,
    ) -> Self {
        Self {
            identity,
            spec,
            taxonomy,
            images,
        }
    }

    /// Validate the spec and build the complete intent set
    ///
    /// Returns [`crate::Error::SpecInvalid`] before building anything if the
    /// spec is semantically invalid.
    pub fn compile(&self) -> Result<Vec<ResourceIntent>> {
        self.spec.validate(&self.identity.name)?;

        let mut intents = vec![
            ResourceIntent::Service(self.primary_service()),
            ResourceIntent::Service(self.replica_service()),
            ResourceIntent::Service(self.pods_service()),
        ];

        intents.extend(
            self.spec
                .instances
                .iter()
                .map(|set| ResourceIntent::StatefulSet(self.instance_set(set))),
        );

        if let Some(bouncer) = self.spec.proxy.as_ref().and_then(|p| p.pgbouncer.as_ref()) {
            intents.push(ResourceIntent::Deployment(self.proxy_deployment(bouncer)));
            intents.push(ResourceIntent::Service(self.proxy_service(bouncer)));
        }

        for repo in &self.spec.backups.pgbackrest.repos {
            intents.extend(
                self.backup_jobs(repo)
                    .into_iter()
                    .map(ResourceIntent::CronJob),
            );
        }

        debug!(
            cluster = %self.identity.name,
            intents = intents.len(),
            "compiled cluster intents"
        );
        Ok(intents)
    }

    fn cascade(&self) -> MetadataCascade<'a> {
        MetadataCascade::new(self.taxonomy)
    }

    fn cluster_overlay(&self) -> Option<&'a Metadata> {
        self.spec.metadata.as_ref()
    }

    fn owner(&self) -> OwnerReference {
        self.identity.owner_reference()
    }

    fn child_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.identity.name, suffix)
    }
}

/// Writable scratch space; every root filesystem is read-only
pub(crate) const TMP_VOLUME: &str = "tmp";

pub(crate) fn tmp_volume() -> Volume {
    Volume {
        name: TMP_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

pub(crate) fn tmp_mount() -> VolumeMount {
    VolumeMount {
        name: TMP_VOLUME.to_string(),
        mount_path: "/tmp".to_string(),
        ..Default::default()
    }
}
