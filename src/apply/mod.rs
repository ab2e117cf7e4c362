//! Apply/prune engine
//!
//! One pass applies every intent for a cluster and then prunes owned objects
//! that are no longer intended:
//!
//! 1. For each intent: get the live object; create it if absent; refuse it
//!    if another owner controls it; leave it alone if it already matches;
//!    otherwise update it against the live `resourceVersion`.
//! 2. For each kind: list by the cluster selector, keep objects this cluster
//!    controls, delete those whose name is not in the intent set.
//!
//! Store calls run concurrently up to `EngineConfig::concurrency`, each under
//! its own timeout. A failing object never stops the pass. Once the pass is
//! cancelled no new call is issued; calls already in flight finish.

mod diff;
mod outcome;

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use diff::{deterministic_hash, fingerprint, is_subset, is_up_to_date};
pub use outcome::{ApplyResult, ListFailure, ObjectOutcome, ReconcileOutcome};

use crate::intent::{ClusterIdentity, Controller, ResourceIntent, ResourceKind};
use crate::store::ObjectStore;
use crate::taxonomy::LabelTaxonomy;
use crate::{Error, Result};

/// Tuning for store calls within a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum concurrent store calls
    pub concurrency: usize,
    /// Timeout for each store call
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::DEFAULT_APPLY_CONCURRENCY,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Cooperative cancellation for one pass
#[derive(Clone, Debug)]
pub struct PassControl {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl PassControl {
    /// Pass cancelled through `token`
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Pass that can only be cancelled by its own token
    pub fn unbounded() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Also cancel once `deadline` passes (builder style)
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Token that cancels this pass
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the token fired or the deadline passed
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Applies intents to an [`ObjectStore`]
#[derive(Clone)]
pub struct ApplyEngine {
    store: Arc<dyn ObjectStore>,
    taxonomy: LabelTaxonomy,
    config: EngineConfig,
}

impl ApplyEngine {
    /// Engine over `store`
    pub fn new(store: Arc<dyn ObjectStore>, taxonomy: LabelTaxonomy, config: EngineConfig) -> Self {
        Self {
            store,
            taxonomy,
            config,
        }
    }

    /// Apply `intents` for `owner` and prune what is no longer intended
    #[instrument(skip_all, fields(cluster = %owner.name, intents = intents.len()))]
    pub async fn apply(
        &self,
        owner: &ClusterIdentity,
        intents: Vec<ResourceIntent>,
        pass: &PassControl,
    ) -> ReconcileOutcome {
        let intended: HashSet<(ResourceKind, String)> = intents
            .iter()
            .map(|i| (i.kind(), i.name().to_string()))
            .collect();

        let mut outcome = ReconcileOutcome {
            objects: stream::iter(intents)
                .map(|intent| self.apply_one(owner, intent, pass))
                .buffer_unordered(self.concurrency())
                .collect()
                .await,
            ..Default::default()
        };

        self.prune(owner, &intended, pass, &mut outcome).await;

        outcome.cancelled |= outcome
            .objects
            .iter()
            .any(|o| o.result == ApplyResult::Skipped);

        info!(
            created = outcome.count(&ApplyResult::Created),
            updated = outcome.count(&ApplyResult::Updated),
            unchanged = outcome.count(&ApplyResult::Unchanged),
            pruned = outcome.count(&ApplyResult::Pruned),
            failed = outcome.failures().count(),
            cancelled = outcome.cancelled,
            "apply pass finished"
        );
        outcome
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    async fn apply_one(
        &self,
        owner: &ClusterIdentity,
        intent: ResourceIntent,
        pass: &PassControl,
    ) -> ObjectOutcome {
        let kind = intent.kind();
        let name = intent.name().to_string();

        let result = if pass.is_cancelled() {
            ApplyResult::Skipped
        } else {
            match self.converge(owner, &intent).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(kind = %kind, name = %name, error = %e, "failed to apply object");
                    ApplyResult::failed(&e)
                }
            }
        };

        debug!(kind = %kind, name = %name, result = ?result, "applied object");
        ObjectOutcome { kind, name, result }
    }

    async fn converge(&self, owner: &ClusterIdentity, intent: &ResourceIntent) -> Result<ApplyResult> {
        let kind = intent.kind();
        let name = intent.name();
        let namespace = owner.namespace.as_str();

        let mut desired = intent.to_dynamic()?;
        let hash = fingerprint(&desired)?;
        desired
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(self.taxonomy.intent_hash_key(), hash);

        let live = self.call("get", self.store.get(kind, namespace, name)).await?;
        let Some(live) = live else {
            self.call("create", self.store.create(kind, namespace, &desired))
                .await?;
            return Ok(ApplyResult::Created);
        };

        if let Controller::Other(other) = owner.controller_of(&live.metadata) {
            return Err(Error::ownership_conflict(kind.kind_name(), name, other));
        }

        if is_up_to_date(&desired, &live)? {
            return Ok(ApplyResult::Unchanged);
        }

        desired.metadata.resource_version = live.metadata.resource_version.clone();
        self.call("update", self.store.update(kind, namespace, &desired))
            .await?;
        Ok(ApplyResult::Updated)
    }

    async fn prune(
        &self,
        owner: &ClusterIdentity,
        intended: &HashSet<(ResourceKind, String)>,
        pass: &PassControl,
        outcome: &mut ReconcileOutcome,
    ) {
        let selector = self.taxonomy.cluster_selector(&owner.name);

        for kind in ResourceKind::ALL {
            if pass.is_cancelled() {
                outcome.cancelled = true;
                return;
            }

            let listed = match self
                .call("list", self.store.list(kind, &owner.namespace, &selector))
                .await
            {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "failed to list objects for pruning");
                    outcome.list_failures.push(ListFailure {
                        kind,
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                    continue;
                }
            };

            let stale: Vec<String> = listed
                .into_iter()
                .filter(|o| owner.controller_of(&o.metadata) == Controller::This)
                .filter_map(|o| o.metadata.name)
                .filter(|name| !intended.contains(&(kind, name.clone())))
                .collect();

            let pruned: Vec<ObjectOutcome> = stream::iter(stale)
                .map(|name| self.prune_one(owner, kind, name, pass))
                .buffer_unordered(self.concurrency())
                .collect()
                .await;
            outcome.objects.extend(pruned);
        }
    }

    async fn prune_one(
        &self,
        owner: &ClusterIdentity,
        kind: ResourceKind,
        name: String,
        pass: &PassControl,
    ) -> ObjectOutcome {
        let result = if pass.is_cancelled() {
            ApplyResult::Skipped
        } else {
            match self
                .call("delete", self.store.delete(kind, &owner.namespace, &name))
                .await
            {
                Ok(()) => ApplyResult::Pruned,
                Err(e) if e.is_not_found() => ApplyResult::Pruned,
                Err(e) => {
                    warn!(kind = %kind, name = %name, error = %e, "failed to prune object");
                    ApplyResult::failed(&e)
                }
            }
        };

        if result == ApplyResult::Pruned {
            info!(kind = %kind, name = %name, "pruned object no longer in spec");
        }
        ObjectOutcome { kind, name, result }
    }

    async fn call<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout(format!("store {what}"), self.config.call_timeout))?
    }
}
