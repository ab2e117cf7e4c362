//! pgcluster - reconciliation core of a PostgresCluster Kubernetes operator
//!
//! Given a `PostgresCluster` custom resource, the operator computes every child
//! object the cluster needs (services, one StatefulSet per instance set, a
//! pgBouncer proxy Deployment, pgBackRest backup CronJobs), merges user metadata
//! overlays onto them, hardens every container, and drives an idempotent
//! create/update/prune loop against the API server until the cluster converges.
//!
//! # Pipeline
//!
//! ```text
//! PostgresCluster ──► compiler ──► Vec<ResourceIntent> ──► apply engine ──► ReconcileOutcome
//!                      │  ▲                                  │                  │
//!          metadata ───┘  └── security                    store            requeue ──► Action
//! ```
//!
//! # Modules
//!
//! - [`crd`] - The `PostgresCluster` custom resource and its nested types
//! - [`taxonomy`] - Reserved label keys and label selectors
//! - [`metadata`] - Label/annotation cascade across overlay scopes
//! - [`security`] - Container hardening and the hardened pod template constructor
//! - [`intent`] - Resource kinds, cluster identity and materialized intents
//! - [`compiler`] - Intent builders (services, StatefulSets, proxy, backup CronJobs)
//! - [`store`] - Object store abstraction over the Kubernetes API
//! - [`apply`] - Apply/prune engine producing a per-pass outcome
//! - [`requeue`] - Verdict to requeue-action state machine
//! - [`readiness`] - Bounded readiness polling outside the reconcile pass
//! - [`controller`] - kube-runtime reconcile entry point and status writer
//! - [`config`] - Operator command-line/environment configuration
//! - [`telemetry`] - Tracing subscriber setup
//! - [`retry`] - Exponential backoff with jitter
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod apply;
pub mod compiler;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod intent;
pub mod metadata;
pub mod readiness;
pub mod requeue;
pub mod retry;
pub mod security;
pub mod store;
pub mod taxonomy;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Shared by the CLI defaults, the CRD defaults and test fixtures.

/// Field manager recorded on every object this operator applies
pub const FIELD_MANAGER: &str = "pgcluster-controller";

/// Default label domain; every key under it is reserved for the operator
pub const DEFAULT_LABEL_DOMAIN: &str = "pgcluster.dev";

/// Default PostgreSQL port when the cluster spec does not set one
pub const DEFAULT_POSTGRES_PORT: i32 = 5432;

/// Default pgBouncer listen port
pub const DEFAULT_PGBOUNCER_PORT: i32 = 5432;

/// Default number of concurrent store calls within one pass
pub const DEFAULT_APPLY_CONCURRENCY: usize = 4;
