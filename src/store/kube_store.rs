//! [`ObjectStore`] backed by the Kubernetes API server

use async_trait::async_trait;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

use super::ObjectStore;
use crate::intent::ResourceKind;
use crate::taxonomy::Selector;
use crate::{Error, Result};

/// API server store writing every object with server-side apply
///
/// Creates go through apply too, so every field the operator sets is owned
/// by its `Apply` entry in managedFields. A later apply that omits a label
/// or annotation then removes it, which a POSTed object would not allow.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    /// Store writing as `field_manager`
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    async fn apply(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = object_name(object);
        self.api(kind, namespace)
            .patch(name, &apply_params(&self.field_manager), &Patch::Apply(object))
            .await
            .map_err(|e| Error::from_kube(kind.kind_name(), name, e))
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

/// Forced server-side apply as `field_manager`
fn apply_params(field_manager: &str) -> PatchParams {
    PatchParams::apply(field_manager).force()
}

fn object_name(object: &DynamicObject) -> &str {
    object.metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube(kind.kind_name(), name, e))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(&selector.to_string());
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(|e| Error::from_kube(kind.kind_name(), &selector.to_string(), e))?;
        debug!(kind = %kind, selector = %selector, count = list.items.len(), "listed objects");
        Ok(list.items)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.apply(kind, namespace, object).await
    }

    async fn update(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.apply(kind, namespace, object).await
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        self.api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(kind.kind_name(), name, e))
    }
}
