//! Materialized child objects and their owning cluster
//!
//! A [`ResourceIntent`] is the complete desired state of one child object,
//! built fresh on every pass and never persisted. The closed [`ResourceKind`]
//! enum is the only place the operator dispatches on object type.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crate::crd::PostgresCluster;
use crate::{Error, Result};

/// Kinds of child object the operator manages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// core/v1 Service
    NetworkService,
    /// apps/v1 StatefulSet
    StatefulWorkload,
    /// apps/v1 Deployment
    StatelessWorkload,
    /// batch/v1 CronJob
    ScheduledJob,
}

impl ResourceKind {
    /// Every managed kind, in apply order
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::NetworkService,
        ResourceKind::StatefulWorkload,
        ResourceKind::StatelessWorkload,
        ResourceKind::ScheduledJob,
    ];

    /// API resource used for dynamic calls
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::NetworkService => ApiResource::erase::<Service>(&()),
            Self::StatefulWorkload => ApiResource::erase::<StatefulSet>(&()),
            Self::StatelessWorkload => ApiResource::erase::<Deployment>(&()),
            Self::ScheduledJob => ApiResource::erase::<CronJob>(&()),
        }
    }

    /// API kind name
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NetworkService => "Service",
            Self::StatefulWorkload => "StatefulSet",
            Self::StatelessWorkload => "Deployment",
            Self::ScheduledJob => "CronJob",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// Who controls an existing object, relative to one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Controller {
    /// Controlled by this cluster
    This,
    /// Controlled by some other owner
    Other(String),
    /// No controller reference at all
    Nobody,
}

/// Name, namespace and uid of the owning PostgresCluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterIdentity {
    /// Cluster name
    pub name: String,
    /// Cluster namespace; every child lives here
    pub namespace: String,
    /// Cluster uid, when known
    pub uid: Option<String>,
}

impl ClusterIdentity {
    /// Identity without a uid
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: None,
        }
    }

    /// Set the uid (builder style)
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Identity of a stored cluster
    pub fn of(cluster: &PostgresCluster) -> Result<Self> {
        let namespace = cluster.namespace().ok_or_else(|| {
            Error::internal_with_context(
                "identity",
                format!("PostgresCluster {} has no namespace", cluster.name_any()),
            )
        })?;
        Ok(Self {
            name: cluster.name_any(),
            namespace,
            uid: cluster.uid(),
        })
    }

    /// Controller owner reference pointing at this cluster
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: PostgresCluster::api_version(&()).to_string(),
            kind: PostgresCluster::kind(&()).to_string(),
            name: self.name.clone(),
            uid: self.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Classify the controller of an existing object
    ///
    /// Matches on group/kind/name; uids are compared only when both sides
    /// know theirs, so a recreated cluster with the same name is treated as
    /// a different owner.
    pub fn controller_of(&self, meta: &ObjectMeta) -> Controller {
        let ours = self.owner_reference();
        let Some(controller) = meta
            .owner_references
            .iter()
            .flatten()
            .find(|r| r.controller == Some(true))
        else {
            return Controller::Nobody;
        };

        let same_kind = api_group(&controller.api_version) == api_group(&ours.api_version)
            && controller.kind == ours.kind;
        let same_uid = controller.uid.is_empty() || ours.uid.is_empty() || controller.uid == ours.uid;
        if same_kind && controller.name == ours.name && same_uid {
            Controller::This
        } else {
            Controller::Other(format!("{}/{}", controller.kind, controller.name))
        }
    }
}

fn api_group(api_version: &str) -> &str {
    api_version
        .rsplit_once('/')
        .map(|(group, _)| group)
        .unwrap_or("")
}

/// One child object to be applied
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceIntent {
    /// A Service
    Service(Service),
    /// A StatefulSet
    StatefulSet(StatefulSet),
    /// A Deployment
    Deployment(Deployment),
    /// A CronJob
    CronJob(CronJob),
}

impl ResourceIntent {
    /// Kind of this intent
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Service(_) => ResourceKind::NetworkService,
            Self::StatefulSet(_) => ResourceKind::StatefulWorkload,
            Self::Deployment(_) => ResourceKind::StatelessWorkload,
            Self::CronJob(_) => ResourceKind::ScheduledJob,
        }
    }

    /// Object metadata
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Service(o) => &o.metadata,
            Self::StatefulSet(o) => &o.metadata,
            Self::Deployment(o) => &o.metadata,
            Self::CronJob(o) => &o.metadata,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Labels on the object itself
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.meta().labels.clone().unwrap_or_default()
    }

    /// Annotations on the object itself
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.meta().annotations.clone().unwrap_or_default()
    }

    /// Pod selector, for kinds that have one
    pub fn selector(&self) -> Option<BTreeMap<String, String>> {
        match self {
            Self::Service(o) => o.spec.as_ref().and_then(|s| s.selector.clone()),
            Self::StatefulSet(o) => o.spec.as_ref().and_then(|s| s.selector.match_labels.clone()),
            Self::Deployment(o) => o.spec.as_ref().and_then(|s| s.selector.match_labels.clone()),
            Self::CronJob(_) => None,
        }
    }

    /// Owner reference, if set
    pub fn owner(&self) -> Option<&OwnerReference> {
        self.meta().owner_references.iter().flatten().next()
    }

    /// Pod templates nested in this object, outermost first
    ///
    /// For a CronJob this is the job template's pod template. Services have
    /// none.
    pub fn pod_templates(&self) -> Vec<&PodTemplateSpec> {
        match self {
            Self::Service(_) => Vec::new(),
            Self::StatefulSet(o) => o.spec.iter().map(|s| &s.template).collect(),
            Self::Deployment(o) => o.spec.iter().map(|s| &s.template).collect(),
            Self::CronJob(o) => o
                .spec
                .iter()
                .filter_map(|s| s.job_template.spec.as_ref())
                .map(|j| &j.template)
                .collect(),
        }
    }

    /// Serialize to a dynamic object for the store
    pub fn to_dynamic(&self) -> Result<DynamicObject> {
        let value = match self {
            Self::Service(o) => serde_json::to_value(o),
            Self::StatefulSet(o) => serde_json::to_value(o),
            Self::Deployment(o) => serde_json::to_value(o),
            Self::CronJob(o) => serde_json::to_value(o),
        }
        .map_err(|e| Error::serialization_for(self.kind().kind_name(), e.to_string()))?;

        serde_json::from_value(value)
            .map_err(|e| Error::serialization_for(self.kind().kind_name(), e.to_string()))
    }
}

/// Decode a dynamic object into a typed API object
///
/// A shape mismatch is a [`Error::Decode`], never silently ignored.
pub fn decode<K>(obj: &DynamicObject) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let kind = K::kind(&()).to_string();
    let value = serde_json::to_value(obj).map_err(|e| Error::decode(&kind, e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::decode(kind, e.to_string()))
}
