//! Object store abstraction
//!
//! The apply engine talks to the cluster state only through [`ObjectStore`],
//! which speaks [`DynamicObject`] so one implementation covers every
//! [`ResourceKind`]. [`KubeStore`] is the API server implementation; tests use
//! mocks or an in-memory store.

mod kube_store;

use async_trait::async_trait;
use kube::api::DynamicObject;
#[cfg(test)]
use mockall::automock;

pub use kube_store::KubeStore;
use crate::intent::ResourceKind;
use crate::taxonomy::Selector;
use crate::Result;

/// CRUD + list access to namespaced child objects
///
/// Errors are already classified: a missing object on `get` is `Ok(None)`,
/// a missing object on `delete`/`update` is [`crate::Error::NotFound`], and a
/// stale `resourceVersion` on `update` is [`crate::Error::StoreConflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object by name
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List objects whose labels match `selector`
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>>;

    /// Create a new object
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Update the fields this operator owns on an existing object
    ///
    /// When `object.metadata.resource_version` is set the write only succeeds
    /// against that version.
    async fn update(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Delete an object by name
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()>;
}
