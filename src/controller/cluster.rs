//! PostgresCluster reconciliation

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::status::{KubeStatusWriter, StatusWriter};
use crate::apply::{ApplyEngine, EngineConfig, PassControl, ReconcileOutcome};
use crate::compiler::{ClusterCompiler, ImageDefaults};
use crate::config::OperatorConfig;
use crate::crd::{PostgresCluster, PostgresClusterStatus};
use crate::intent::ClusterIdentity;
use crate::requeue::{RequeueDecision, RequeuePolicy, Verdict};
use crate::store::{KubeStore, ObjectStore};
use crate::taxonomy::LabelTaxonomy;
use crate::Error;

/// Default deadline for one pass
const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay before retrying a pass that returned an error
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Controller context shared by every pass
///
/// Everything a pass needs is injected here; nothing else carries state
/// between passes.
///
/// # Example
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(&operator_config)
///     .shutdown(token)
///     .build();
/// ```
pub struct Context {
    /// Child object store (trait object for testability)
    pub store: Arc<dyn ObjectStore>,
    /// Status subresource writer
    pub status: Arc<dyn StatusWriter>,
    /// Label taxonomy
    pub taxonomy: LabelTaxonomy,
    /// Container image defaults
    pub images: ImageDefaults,
    /// Apply engine tuning
    pub engine: EngineConfig,
    /// Verdict to requeue mapping
    pub requeue: RequeuePolicy,
    /// Deadline for one pass
    pub pass_timeout: Duration,
    /// Cancelled on operator shutdown; every pass watches a child of it
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Context over explicit collaborators with default settings
    ///
    /// Used where no API server is available, e.g. with an in-memory store.
    pub fn new(store: Arc<dyn ObjectStore>, status: Arc<dyn StatusWriter>) -> Self {
        Self {
            store,
            status,
            taxonomy: LabelTaxonomy::default(),
            images: ImageDefaults::default(),
            engine: EngineConfig::default(),
            requeue: RequeuePolicy::default(),
            pass_timeout: DEFAULT_PASS_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    fn engine(&self) -> ApplyEngine {
        ApplyEngine::new(self.store.clone(), self.taxonomy.clone(), self.engine.clone())
    }

    fn pass_control(&self) -> PassControl {
        PassControl::new(self.shutdown.child_token()).with_deadline(Instant::now() + self.pass_timeout)
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    store: Option<Arc<dyn ObjectStore>>,
    status: Option<Arc<dyn StatusWriter>>,
    config: Option<OperatorConfig>,
    shutdown: CancellationToken,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            store: None,
            status: None,
            config: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Apply operator settings
    pub fn config(mut self, config: &OperatorConfig) -> Self {
        self.config = Some(config.clone());
        self
    }

    /// Use `token` as the shutdown signal
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Override the object store (primarily for testing)
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the status writer (primarily for testing)
    pub fn status_writer(mut self, status: Arc<dyn StatusWriter>) -> Self {
        self.status = Some(status);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(KubeStore::new(self.client.clone(), crate::FIELD_MANAGER)));
        let status = self
            .status
            .unwrap_or_else(|| Arc::new(KubeStatusWriter::new(self.client.clone())));

        let mut ctx = Context::new(store, status);
        ctx.shutdown = self.shutdown;
        if let Some(config) = self.config {
            ctx.taxonomy = config.taxonomy();
            ctx.images = config.image_defaults();
            ctx.engine = config.engine_config();
            ctx.requeue = config.requeue_policy();
            ctx.pass_timeout = config.pass_timeout();
        }
        ctx
    }
}

/// Result of one pass before it is mapped to an action
#[derive(Clone, Debug, PartialEq)]
pub struct PassReport {
    /// Aggregate verdict
    pub verdict: Verdict,
    /// Apply outcome; `None` when the spec was rejected before applying
    pub outcome: Option<ReconcileOutcome>,
}

/// Compile and apply one cluster, without touching its status
///
/// An invalid spec yields a fatal verdict without any store call. Errors are
/// returned only when the cluster itself is unusable (e.g. no namespace).
pub async fn run_pass(
    cluster: &PostgresCluster,
    ctx: &Context,
    pass: &PassControl,
) -> Result<PassReport, Error> {
    let identity = ClusterIdentity::of(cluster)?;
    let compiler = ClusterCompiler::new(&identity, &cluster.spec, &ctx.taxonomy, &ctx.images);

    let intents = match compiler.compile() {
        Ok(intents) => intents,
        Err(e) => {
            let verdict = if e.is_fatal() {
                warn!(error = %e, "cluster spec rejected");
                Verdict::FatalSpecError {
                    message: e.to_string(),
                }
            } else {
                warn!(error = %e, "failed to build intents");
                Verdict::TransientError {
                    message: e.to_string(),
                }
            };
            return Ok(PassReport {
                verdict,
                outcome: None,
            });
        }
    };

    debug!(intents = intents.len(), "compiled cluster intents");
    let outcome = ctx.engine().apply(&identity, intents, pass).await;
    Ok(PassReport {
        verdict: outcome.verdict(),
        outcome: Some(outcome),
    })
}

/// Reconcile a PostgresCluster resource
///
/// Runs one pass, persists the verdict in the status (condition, observed
/// generation and consecutive transient failures) and returns the requeue
/// action for the verdict.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<PostgresCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    info!("reconciling cluster");

    let pass = ctx.pass_control();
    let report = run_pass(&cluster, &ctx, &pass).await?;

    let prior_failures = cluster
        .status
        .as_ref()
        .map(|s| s.transient_failures)
        .unwrap_or(0);
    let decision = ctx.requeue.decide(&report.verdict, prior_failures);

    match &report.verdict {
        Verdict::Converged => debug!("cluster converged"),
        Verdict::Progressing => info!(
            mutations = report.outcome.as_ref().map(|o| o.mutations()).unwrap_or(0),
            "cluster progressing"
        ),
        Verdict::TransientError { message } => warn!(
            failures = decision.transient_failures,
            error = %message,
            "pass failed, will retry"
        ),
        Verdict::FatalSpecError { message } => warn!(error = %message, "cluster spec invalid"),
    }

    update_status(&cluster, &ctx, &decision).await?;
    Ok(decision.action)
}

/// Status after applying `decision` to the current one
fn next_status(cluster: &PostgresCluster, decision: &RequeueDecision) -> PostgresClusterStatus {
    let status = cluster
        .status
        .clone()
        .unwrap_or_default()
        .observed_generation(cluster.metadata.generation)
        .transient_failures(decision.transient_failures);

    match &decision.condition {
        Some(condition) => status.condition(condition.clone()),
        None => status,
    }
}

async fn update_status(
    cluster: &PostgresCluster,
    ctx: &Context,
    decision: &RequeueDecision,
) -> Result<(), Error> {
    let status = next_status(cluster, decision);
    if cluster.status.as_ref() == Some(&status) {
        debug!("status unchanged");
        return Ok(());
    }

    let namespace = cluster.namespace().unwrap_or_default();
    ctx.status
        .patch_status(&namespace, &cluster.name_any(), &status)
        .await
}

/// Error policy for the controller
///
/// Called when [`reconcile`] itself fails (status write failure, cluster
/// without a namespace). Verdict-level failures never reach here.
pub fn error_policy(cluster: Arc<PostgresCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

#[cfg(test)]
impl Context {
    /// Create a context for testing with mock collaborators
    pub fn for_testing(store: Arc<dyn ObjectStore>, status: Arc<dyn StatusWriter>) -> Self {
        Self::new(store, status)
    }
}
