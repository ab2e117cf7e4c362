//! StatefulSet builder, one per instance set

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::service::POSTGRES_PORT_NAME;
use super::{tmp_mount, tmp_volume, ClusterCompiler};
use crate::crd::{InstanceSetSpec, StorageSpec};
use crate::security::HardenedPodTemplate;
use crate::taxonomy::Scope;

/// Database container name
pub const DATABASE_CONTAINER: &str = "database";

/// Init container that prepares the data directory
pub const STARTUP_CONTAINER: &str = "postgres-startup";

const PGDATA_VOLUME: &str = "pgdata";
const PGDATA_MOUNT: &str = "/pgdata";

impl ClusterCompiler<'_> {
    /// `<cluster>-<set>`: the StatefulSet for one instance set
    ///
    /// The workload and its pod template are resolved separately, each with
    /// the instance-set overlay on top of the cluster overlay. The selector is
    /// `{cluster, instance-set}` from the taxonomy.
    pub fn instance_set(&self, set: &InstanceSetSpec) -> StatefulSet {
        let scope = Scope::cluster(&self.identity.name).instance_set(&set.name);
        let reserved = self.taxonomy.labels(&scope);
        let cascade = self.cascade();
        let workload = cascade.resolve(&reserved, self.cluster_overlay(), set.metadata.as_ref());
        let pod = cascade.resolve(&reserved, self.cluster_overlay(), set.metadata.as_ref());

        let mut volumes = vec![tmp_volume()];
        let claims = match &set.storage {
            Some(storage) => Some(vec![pgdata_claim(storage)]),
            None => {
                volumes.push(Volume {
                    name: PGDATA_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                });
                None
            }
        };

        let pod_spec = PodSpec {
            init_containers: Some(vec![self.startup_container()]),
            containers: vec![self.database_container()],
            volumes: Some(volumes),
            enable_service_links: Some(false),
            ..Default::default()
        };

        StatefulSet {
            metadata: workload.object_meta(
                self.child_name(&set.name),
                &self.identity.namespace,
                self.owner(),
            ),
            spec: Some(StatefulSetSpec {
                replicas: Some(set.replicas),
                selector: self.taxonomy.selector(&scope).to_label_selector(),
                pod_management_policy: Some("Parallel".to_string()),
                template: HardenedPodTemplate::new(&pod, pod_spec).into_inner(),
                volume_claim_templates: claims,
                ..Default::default()
            }),
            status: None,
        }
    }

    fn image(&self) -> String {
        self.spec
            .image
            .clone()
            .unwrap_or_else(|| self.images.postgres.clone())
    }

    fn data_mounts(&self) -> Vec<VolumeMount> {
        vec![
            VolumeMount {
                name: PGDATA_VOLUME.to_string(),
                mount_path: PGDATA_MOUNT.to_string(),
                ..Default::default()
            },
            tmp_mount(),
        ]
    }

    fn startup_container(&self) -> Container {
        Container {
            name: STARTUP_CONTAINER.to_string(),
            image: Some(self.image()),
            command: Some(vec![
                "bash".to_string(),
                "-ceu".to_string(),
                format!("install --directory --mode=0700 {PGDATA_MOUNT}/data"),
            ]),
            volume_mounts: Some(self.data_mounts()),
            ..Default::default()
        }
    }

    fn database_container(&self) -> Container {
        let port = self.spec.port();
        Container {
            name: DATABASE_CONTAINER.to_string(),
            image: Some(self.image()),
            ports: Some(vec![ContainerPort {
                name: Some(POSTGRES_PORT_NAME.to_string()),
                container_port: port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            env: Some(vec![
                env("PGDATA", format!("{PGDATA_MOUNT}/data")),
                env("PGPORT", port.to_string()),
            ]),
            volume_mounts: Some(self.data_mounts()),
            ..Default::default()
        }
    }
}

fn env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

fn pgdata_claim(storage: &StorageSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(PGDATA_VOLUME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}
