//! Reserved label taxonomy
//!
//! Every object the operator creates carries a small set of labels that
//! identify its cluster, instance set, role and backup repository. Those keys
//! live under one label domain that is injected as configuration. The whole
//! domain is reserved: user overlays can never set or override a key in it,
//! which keeps selectors and ownership queries trustworthy.

mod selector;

use std::collections::BTreeMap;
use std::fmt;

pub use selector::{Requirement, Selector};

use crate::crd::BackupType;

/// Role a child object plays in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The writable primary
    Master,
    /// Read-only replicas
    Replica,
    /// pgBouncer connection proxy
    PgBouncer,
    /// pgBackRest backup objects
    PgBackRest,
}

impl Role {
    /// Label value for this role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Replica => "replica",
            Self::PgBouncer => "pgbouncer",
            Self::PgBackRest => "pgbackrest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which object a set of reserved labels is for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    cluster: String,
    instance_set: Option<String>,
    role: Option<Role>,
    repo: Option<String>,
    backup_type: Option<BackupType>,
}

impl Scope {
    /// Cluster-wide scope
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            cluster: name.into(),
            instance_set: None,
            role: None,
            repo: None,
            backup_type: None,
        }
    }

    /// Narrow to an instance set
    pub fn instance_set(mut self, name: impl Into<String>) -> Self {
        self.instance_set = Some(name.into());
        self
    }

    /// Narrow to a role
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Narrow to a backup repository
    pub fn repo(mut self, name: impl Into<String>) -> Self {
        self.repo = Some(name.into());
        self
    }

    /// Narrow to a backup type
    pub fn backup_type(mut self, backup_type: BackupType) -> Self {
        self.backup_type = Some(backup_type);
        self
    }
}

/// Value of the `data` marker on database instance pods
pub const POSTGRES_DATA: &str = "postgres";

/// The operator's reserved label keys under one domain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTaxonomy {
    domain: String,
}

impl Default for LabelTaxonomy {
    fn default() -> Self {
        Self::new(crate::DEFAULT_LABEL_DOMAIN)
    }
}

impl LabelTaxonomy {
    /// Taxonomy rooted at `domain` (e.g., "pgcluster.dev")
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    /// The reserved label domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.domain, name)
    }

    /// Key holding the owning cluster's name
    pub fn cluster_key(&self) -> String {
        self.key("cluster")
    }

    /// Key holding the instance set name
    pub fn instance_set_key(&self) -> String {
        self.key("instance-set")
    }

    /// Key holding the [`Role`]
    pub fn role_key(&self) -> String {
        self.key("role")
    }

    /// Marker carried by every database instance pod
    pub fn data_key(&self) -> String {
        self.key("data")
    }

    /// Presence marker carried by every backup object
    pub fn pgbackrest_key(&self) -> String {
        self.key("pgbackrest")
    }

    /// Key holding the backup repository name
    pub fn repo_key(&self) -> String {
        self.key("pgbackrest-repo")
    }

    /// Key holding the backup type of a CronJob
    pub fn cronjob_key(&self) -> String {
        self.key("pgbackrest-cronjob")
    }

    /// Annotation holding the fingerprint of the last applied intent
    pub fn intent_hash_key(&self) -> String {
        self.key("intent-hash")
    }

    /// True when `key` belongs to the reserved domain or one of its subdomains
    pub fn is_reserved(&self, key: &str) -> bool {
        match key.split_once('/') {
            Some((prefix, _)) => {
                prefix == self.domain
                    || prefix
                        .strip_suffix(self.domain.as_str())
                        .is_some_and(|sub| sub.ends_with('.'))
            }
            None => false,
        }
    }

    /// Reserved labels for `scope`
    ///
    /// Always contains the cluster key. Instance-set objects also get the
    /// `data=postgres` marker, which tells database pods apart from proxy and
    /// backup pods of the same cluster. Backup objects also get the
    /// `pgbackrest` presence marker so they can be found with an existence
    /// selector regardless of repository.
    pub fn labels(&self, scope: &Scope) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(self.cluster_key(), scope.cluster.clone());
        if let Some(set) = &scope.instance_set {
            labels.insert(self.instance_set_key(), set.clone());
            labels.insert(self.data_key(), POSTGRES_DATA.to_string());
        }
        if let Some(role) = scope.role {
            labels.insert(self.role_key(), role.to_string());
            if role == Role::PgBackRest {
                labels.insert(self.pgbackrest_key(), String::new());
            }
        }
        if let Some(repo) = &scope.repo {
            labels.insert(self.repo_key(), repo.clone());
        }
        if let Some(backup_type) = scope.backup_type {
            labels.insert(self.cronjob_key(), backup_type.to_string());
        }
        labels
    }

    /// Exact-match selector over the identity labels of `scope`
    ///
    /// The `pgbackrest` and `data` markers are left out; they carry no
    /// identity.
    pub fn selector(&self, scope: &Scope) -> Selector {
        let markers = [self.pgbackrest_key(), self.data_key()];
        self.labels(scope)
            .into_iter()
            .filter(|(k, _)| !markers.contains(k))
            .fold(Selector::new(), |sel, (k, v)| sel.equals(k, v))
    }

    /// Selector for every object of a cluster
    pub fn cluster_selector(&self, cluster: &str) -> Selector {
        Selector::new().equals(self.cluster_key(), cluster)
    }

    /// Selector for the database pods of a cluster, any instance set
    pub fn instance_pods_selector(&self, cluster: &str) -> Selector {
        self.cluster_selector(cluster)
            .equals(self.data_key(), POSTGRES_DATA)
    }

    /// Selector for every backup object of a cluster, any repository
    pub fn backup_selector(&self, cluster: &str) -> Selector {
        self.cluster_selector(cluster).exists(self.pgbackrest_key())
    }
}
