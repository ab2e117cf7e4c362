//! Service builders
//!
//! Role services select on `{cluster, role}` only, so a role's endpoint spans
//! every instance set. Selectors come from the taxonomy alone; overlay labels
//! land on the Service's metadata but never in its selector.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::ClusterCompiler;
use crate::taxonomy::{Role, Scope};

/// Name of the database container port and Service port
pub const POSTGRES_PORT_NAME: &str = "postgres";

/// TCP service port that targets a named container port
pub(crate) fn named_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        target_port: Some(IntOrString::String(name.to_string())),
        ..Default::default()
    }
}

impl ClusterCompiler<'_> {
    /// `<cluster>-primary`: read-write endpoint
    pub fn primary_service(&self) -> Service {
        self.role_service(Role::Master, "primary")
    }

    /// `<cluster>-replicas`: read-only endpoint across all instance sets
    pub fn replica_service(&self) -> Service {
        self.role_service(Role::Replica, "replicas")
    }

    fn role_service(&self, role: Role, suffix: &str) -> Service {
        let scope = Scope::cluster(&self.identity.name).role(role);
        let reserved = self.taxonomy.labels(&scope);
        let meta = self.cascade().resolve(&reserved, self.cluster_overlay(), None);

        Service {
            metadata: meta.object_meta(
                self.child_name(suffix),
                &self.identity.namespace,
                self.owner(),
            ),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(self.taxonomy.selector(&scope).match_labels()),
                ports: Some(vec![named_port(POSTGRES_PORT_NAME, self.spec.port())]),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// `<cluster>-pods`: headless Service giving every database pod a stable
    /// DNS name
    ///
    /// Selects on the `data` marker so proxy and backup pods of the same
    /// cluster get no records here.
    pub fn pods_service(&self) -> Service {
        let scope = Scope::cluster(&self.identity.name);
        let reserved = self.taxonomy.labels(&scope);
        let meta = self.cascade().resolve(&reserved, self.cluster_overlay(), None);

        Service {
            metadata: meta.object_meta(
                self.child_name("pods"),
                &self.identity.namespace,
                self.owner(),
            ),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                publish_not_ready_addresses: Some(true),
                selector: Some(
                    self.taxonomy
                        .instance_pods_selector(&self.identity.name)
                        .match_labels(),
                ),
                ports: Some(vec![named_port(POSTGRES_PORT_NAME, self.spec.port())]),
                ..Default::default()
            }),
            status: None,
        }
    }
}
