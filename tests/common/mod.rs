//! Shared fixtures for integration tests
//!
//! [`InMemoryStore`] behaves like a single namespace-partitioned API server:
//! it assigns resource versions, rejects stale writes and filters lists by
//! label selector. Labels and annotations follow server-side apply field
//! ownership: a write drops the keys the operator set last time and no longer
//! sends, and keeps keys written by anyone else.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::DynamicObject;

use pgcluster::controller::StatusWriter;
use pgcluster::crd::{
    BackupSchedules, BackupsSpec, InstanceSetSpec, Metadata, PgBackRestSpec, PgBouncerSpec,
    PostgresCluster, PostgresClusterSpec, PostgresClusterStatus, ProxySpec, RepoSpec,
};
use pgcluster::intent::ResourceKind;
use pgcluster::store::ObjectStore;
use pgcluster::taxonomy::Selector;
use pgcluster::{Error, Result};

type Key = (ResourceKind, String, String);

/// Label and annotation keys the operator's last write owned
#[derive(Clone, Default)]
struct Owned {
    labels: BTreeSet<String>,
    annotations: BTreeSet<String>,
}

impl Owned {
    fn of(object: &DynamicObject) -> Self {
        let keys = |m: &Option<BTreeMap<String, String>>| {
            m.iter().flat_map(|m| m.keys().cloned()).collect()
        };
        Self {
            labels: keys(&object.metadata.labels),
            annotations: keys(&object.metadata.annotations),
        }
    }
}

/// Start from `live`, drop keys `owned` last time, then add `sent`
fn merge_owned(
    live: &Option<BTreeMap<String, String>>,
    owned: &BTreeSet<String>,
    sent: &Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let mut merged: BTreeMap<String, String> = live
        .iter()
        .flatten()
        .filter(|(k, _)| !owned.contains(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(sent.iter().flatten().map(|(k, v)| (k.clone(), v.clone())));
    (!merged.is_empty()).then_some(merged)
}

/// In-memory [`ObjectStore`]
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<BTreeMap<Key, DynamicObject>>,
    owned: Mutex<BTreeMap<Key, Owned>>,
    version: AtomicU64,
    mutations: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create/update/delete calls so far
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Every stored object of `kind` in `namespace`, ordered by name
    pub fn objects(&self, kind: ResourceKind, namespace: &str) -> Vec<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Names of stored objects of `kind` in `namespace`
    pub fn names(&self, kind: ResourceKind, namespace: &str) -> Vec<String> {
        self.objects(kind, namespace)
            .into_iter()
            .filter_map(|o| o.metadata.name)
            .collect()
    }

    /// One stored object
    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Write an object directly, as another client would
    pub fn put(&self, kind: ResourceKind, namespace: &str, mut object: DynamicObject) {
        let name = object.metadata.name.clone().unwrap_or_default();
        object.metadata.resource_version = Some(self.next_version());
        self.objects
            .lock()
            .unwrap()
            .insert((kind, namespace.to_string(), name), object);
    }

    /// Make every call naming `name` fail with a transient error
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    /// Stop failing calls for `name`
    pub fn heal(&self, name: &str) {
        self.failing.lock().unwrap().remove(name);
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_failing(&self, name: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(name) {
            return Err(Error::store_unavailable(format!("injected failure for {name}")));
        }
        Ok(())
    }

    fn key(kind: ResourceKind, namespace: &str, object: &DynamicObject) -> Key {
        (
            kind,
            namespace.to_string(),
            object.metadata.name.clone().unwrap_or_default(),
        )
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.check_failing(name)?;
        Ok(self.object(kind, namespace, name))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>> {
        Ok(self
            .objects(kind, namespace)
            .into_iter()
            .filter(|o| selector.matches(&o.metadata.labels.clone().unwrap_or_default()))
            .collect())
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = Self::key(kind, namespace, object);
        self.check_failing(&key.2)?;

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::store_conflict(
                kind.kind_name(),
                key.2.clone(),
                "already exists",
            ));
        }
        let mut stored = object.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.next_version());
        self.owned.lock().unwrap().insert(key.clone(), Owned::of(object));
        objects.insert(key, stored.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = Self::key(kind, namespace, object);
        self.check_failing(&key.2)?;

        let mut objects = self.objects.lock().unwrap();
        let Some(current) = objects.get(&key) else {
            return Err(Error::not_found(kind.kind_name(), key.2.clone()));
        };
        if let Some(expected) = &object.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(expected) {
                return Err(Error::store_conflict(
                    kind.kind_name(),
                    key.2.clone(),
                    "the object has been modified",
                ));
            }
        }
        let mut owned = self.owned.lock().unwrap();
        let previous = owned.get(&key).cloned().unwrap_or_default();
        let mut stored = object.clone();
        stored.metadata.labels = merge_owned(
            &current.metadata.labels,
            &previous.labels,
            &object.metadata.labels,
        );
        stored.metadata.annotations = merge_owned(
            &current.metadata.annotations,
            &previous.annotations,
            &object.metadata.annotations,
        );
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.next_version());
        owned.insert(key.clone(), Owned::of(object));
        objects.insert(key, stored.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        self.check_failing(name)?;
        let removed = self
            .objects
            .lock()
            .unwrap()
            .remove(&(kind, namespace.to_string(), name.to_string()));
        self.owned
            .lock()
            .unwrap()
            .remove(&(kind, namespace.to_string(), name.to_string()));
        match removed {
            Some(_) => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::not_found(kind.kind_name(), name)),
        }
    }
}

/// [`StatusWriter`] that records every write
#[derive(Default)]
pub struct RecordingStatusWriter {
    writes: Mutex<Vec<PostgresClusterStatus>>,
}

impl RecordingStatusWriter {
    pub fn last(&self) -> Option<PostgresClusterStatus> {
        self.writes.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait]
impl StatusWriter for RecordingStatusWriter {
    async fn patch_status(
        &self,
        _namespace: &str,
        _name: &str,
        status: &PostgresClusterStatus,
    ) -> std::result::Result<(), Error> {
        self.writes.lock().unwrap().push(status.clone());
        Ok(())
    }
}

/// Cluster in `namespace` with a uid and generation, as the API server returns it
pub fn cluster(name: &str, namespace: &str, spec: PostgresClusterSpec) -> PostgresCluster {
    let mut cluster = PostgresCluster::new(name, spec);
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster.metadata.uid = Some(format!("{name}-uid"));
    cluster.metadata.generation = Some(1);
    cluster
}

pub fn yearly() -> BackupSchedules {
    BackupSchedules {
        full: Some("@yearly".to_string()),
        differential: Some("@yearly".to_string()),
        incremental: Some("@yearly".to_string()),
    }
}

/// Two instance sets, one repository with every schedule, pgBouncer, and an
/// overlay at every scope
pub fn full_spec() -> PostgresClusterSpec {
    PostgresClusterSpec {
        metadata: Some(
            Metadata::with_labels([("team", "db")]).annotation("owner", "dba@example.com"),
        ),
        port: None,
        image: None,
        instances: vec![
            InstanceSetSpec {
                metadata: Some(Metadata::with_labels([("tier", "fast")])),
                ..InstanceSetSpec::named("a")
            },
            InstanceSetSpec::named("b"),
        ],
        backups: BackupsSpec {
            pgbackrest: PgBackRestSpec {
                metadata: Some(Metadata::with_labels([("backup", "pgbackrest")])),
                image: None,
                repos: vec![RepoSpec {
                    name: "repo1".to_string(),
                    metadata: Some(
                        Metadata::with_labels([("repo", "one")]).annotation("retention", "30d"),
                    ),
                    backup_schedules: Some(yearly()),
                }],
            },
        },
        proxy: Some(ProxySpec {
            pgbouncer: Some(PgBouncerSpec {
                metadata: Some(Metadata::with_labels([("proxy", "yes")])),
                ..PgBouncerSpec::default()
            }),
        }),
    }
}

/// Minimal spec: one instance set, nothing else
pub fn minimal_spec() -> PostgresClusterSpec {
    PostgresClusterSpec {
        metadata: None,
        port: None,
        image: None,
        instances: vec![InstanceSetSpec::named("00")],
        backups: BackupsSpec::default(),
        proxy: None,
    }
}
