//! pgBouncer connection proxy: a Deployment plus its Service

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, Service, ServiceSpec};

use super::service::named_port;
use super::{tmp_mount, tmp_volume, ClusterCompiler};
use crate::crd::PgBouncerSpec;
use crate::metadata::ResolvedMetadata;
use crate::security::HardenedPodTemplate;
use crate::taxonomy::{Role, Scope};

/// Proxy container and port name
pub const PGBOUNCER_NAME: &str = "pgbouncer";

impl ClusterCompiler<'_> {
    fn proxy_scope(&self) -> Scope {
        Scope::cluster(&self.identity.name).role(Role::PgBouncer)
    }

    fn proxy_metadata(&self, bouncer: &PgBouncerSpec) -> ResolvedMetadata {
        let reserved = self.taxonomy.labels(&self.proxy_scope());
        self.cascade()
            .resolve(&reserved, self.cluster_overlay(), bouncer.metadata.as_ref())
    }

    /// `<cluster>-pgbouncer` Deployment
    pub fn proxy_deployment(&self, bouncer: &PgBouncerSpec) -> Deployment {
        let workload = self.proxy_metadata(bouncer);
        let pod = self.proxy_metadata(bouncer);

        let container = Container {
            name: PGBOUNCER_NAME.to_string(),
            image: Some(
                bouncer
                    .image
                    .clone()
                    .unwrap_or_else(|| self.images.pgbouncer.clone()),
            ),
            ports: Some(vec![ContainerPort {
                name: Some(PGBOUNCER_NAME.to_string()),
                container_port: bouncer.port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![tmp_mount()]),
            ..Default::default()
        };

        let pod_spec = PodSpec {
            containers: vec![container],
            volumes: Some(vec![tmp_volume()]),
            enable_service_links: Some(false),
            ..Default::default()
        };

        Deployment {
            metadata: workload.object_meta(
                self.child_name(PGBOUNCER_NAME),
                &self.identity.namespace,
                self.owner(),
            ),
            spec: Some(DeploymentSpec {
                replicas: Some(bouncer.replicas),
                selector: self.taxonomy.selector(&self.proxy_scope()).to_label_selector(),
                template: HardenedPodTemplate::new(&pod, pod_spec).into_inner(),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// `<cluster>-pgbouncer` Service in front of the proxy pods
    pub fn proxy_service(&self, bouncer: &PgBouncerSpec) -> Service {
        let meta = self.proxy_metadata(bouncer);
        Service {
            metadata: meta.object_meta(
                self.child_name(PGBOUNCER_NAME),
                &self.identity.namespace,
                self.owner(),
            ),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(self.taxonomy.selector(&self.proxy_scope()).match_labels()),
                ports: Some(vec![named_port(PGBOUNCER_NAME, bouncer.port)]),
                ..Default::default()
            }),
            status: None,
        }
    }
}
