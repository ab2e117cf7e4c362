//! PostgresCluster status writes

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;

use crate::crd::{PostgresCluster, PostgresClusterStatus};
use crate::Error;

/// Writes the status subresource of a PostgresCluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replace the status of `namespace/name` with `status`
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PostgresClusterStatus,
    ) -> Result<(), Error>;
}

/// [`StatusWriter`] backed by the API server
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    /// Create a new KubeStatusWriter wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PostgresClusterStatus,
    ) -> Result<(), Error> {
        let api: Api<PostgresCluster> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(crate::FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await
        .map_err(|e| Error::from_kube("PostgresCluster", name, e))?;

        Ok(())
    }
}
