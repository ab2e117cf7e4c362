//! Controller for PostgresCluster
//!
//! Each pass compiles the cluster spec into intents, applies them, and maps
//! the outcome to a requeue action and a status update. Passes never block on
//! readiness; the requeue interval covers that.

mod cluster;
mod status;

pub use cluster::{error_policy, reconcile, run_pass, Context, ContextBuilder, PassReport};
#[cfg(test)]
pub use status::MockStatusWriter;
pub use status::{KubeStatusWriter, StatusWriter};
