//! Readiness observation outside the reconcile pass
//!
//! A reconcile pass never waits. Callers that need to block until the
//! cluster's instances are up (tests, tooling) use [`poll_until`], which polls
//! on an injected [`Clock`] and gives up with [`Error::Timeout`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::intent::{decode, ClusterIdentity, Controller, ResourceKind};
use crate::store::ObjectStore;
use crate::taxonomy::LabelTaxonomy;
use crate::{Error, Result};

/// Time source for polling
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Poll `check` every `interval` until it yields a value or `timeout` passes
///
/// Retryable errors from `check` are logged and polling continues; any other
/// error is returned immediately.
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    timeout: Duration,
    interval: Duration,
    what: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = clock.now();
    let deadline = start + timeout;

    loop {
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                debug!(what = %what, error = %e, "poll check failed, retrying");
            }
            Err(e) => return Err(e),
        }

        let now = clock.now();
        if now >= deadline {
            return Err(Error::timeout(what, now.duration_since(start)));
        }
        clock.sleep(interval.min(deadline - now)).await;
    }
}

/// Sum of `status.readyReplicas` over the StatefulSets this cluster controls
pub async fn ready_instances(
    store: &dyn ObjectStore,
    taxonomy: &LabelTaxonomy,
    identity: &ClusterIdentity,
) -> Result<i32> {
    let selector = taxonomy.cluster_selector(&identity.name);
    let listed = store
        .list(ResourceKind::StatefulWorkload, &identity.namespace, &selector)
        .await?;

    let mut ready = 0;
    for obj in listed
        .iter()
        .filter(|o| identity.controller_of(&o.metadata) == Controller::This)
    {
        let sts: StatefulSet = decode(obj)?;
        ready += sts.status.and_then(|s| s.ready_replicas).unwrap_or(0);
    }
    Ok(ready)
}

/// Wait until at least `expected` instances report ready
pub async fn wait_for_ready_instances(
    store: &dyn ObjectStore,
    taxonomy: &LabelTaxonomy,
    identity: &ClusterIdentity,
    clock: &dyn Clock,
    expected: i32,
    timeout: Duration,
    interval: Duration,
) -> Result<i32> {
    let what = format!("{expected} ready instances of {}", identity.name);
    let ready = poll_until(clock, timeout, interval, &what, || async move {
        let ready = ready_instances(store, taxonomy, identity).await?;
        debug!(cluster = %identity.name, ready, expected, "observed ready instances");
        Ok((ready >= expected).then_some(ready))
    })
    .await?;

    info!(cluster = %identity.name, ready, "instances ready");
    Ok(ready)
}
