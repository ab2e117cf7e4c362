//! Operator configuration from flags and environment

use std::time::Duration;

use clap::Args;

use crate::apply::EngineConfig;
use crate::compiler::ImageDefaults;
use crate::requeue::RequeuePolicy;
use crate::taxonomy::LabelTaxonomy;
use crate::telemetry::TelemetryConfig;

/// Runtime settings for the controller
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Label/annotation domain reserved for operator-managed keys
    #[arg(long, env = "PGCLUSTER_LABEL_DOMAIN", default_value = crate::DEFAULT_LABEL_DOMAIN)]
    pub label_domain: String,

    /// Maximum concurrent store calls within one pass
    #[arg(long, env = "PGCLUSTER_APPLY_CONCURRENCY", default_value_t = crate::DEFAULT_APPLY_CONCURRENCY)]
    pub apply_concurrency: usize,

    /// Timeout for each store call, in seconds
    #[arg(long, env = "PGCLUSTER_CALL_TIMEOUT_SECS", default_value_t = 10)]
    pub call_timeout_secs: u64,

    /// Deadline for a whole reconcile pass, in seconds
    #[arg(long, env = "PGCLUSTER_PASS_TIMEOUT_SECS", default_value_t = 60)]
    pub pass_timeout_secs: u64,

    /// Requeue delay after a pass that applied changes, in seconds
    #[arg(long, env = "PGCLUSTER_PROGRESS_REQUEUE_SECS", default_value_t = 10)]
    pub progress_requeue_secs: u64,

    /// Consecutive transient failures before the Reconciled condition reports them
    #[arg(long, env = "PGCLUSTER_MAX_TRANSIENT_RETRIES", default_value_t = 10)]
    pub max_transient_retries: u32,

    /// Default PostgreSQL image
    #[arg(long, env = "PGCLUSTER_POSTGRES_IMAGE")]
    pub postgres_image: Option<String>,

    /// Default pgBackRest image
    #[arg(long, env = "PGCLUSTER_PGBACKREST_IMAGE")]
    pub pgbackrest_image: Option<String>,

    /// Default pgBouncer image
    #[arg(long, env = "PGCLUSTER_PGBOUNCER_IMAGE")]
    pub pgbouncer_image: Option<String>,

    /// Log as JSON lines instead of plain text
    #[arg(long, env = "PGCLUSTER_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl OperatorConfig {
    /// Label taxonomy under the configured domain
    pub fn taxonomy(&self) -> LabelTaxonomy {
        LabelTaxonomy::new(self.label_domain.clone())
    }

    /// Apply engine tuning
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            concurrency: self.apply_concurrency.max(1),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }

    /// Requeue policy
    pub fn requeue_policy(&self) -> RequeuePolicy {
        RequeuePolicy {
            progress_interval: Duration::from_secs(self.progress_requeue_secs),
            max_transient_retries: self.max_transient_retries,
            ..RequeuePolicy::default()
        }
    }

    /// Images, with flag overrides applied over the built-in defaults
    pub fn image_defaults(&self) -> ImageDefaults {
        let defaults = ImageDefaults::default();
        ImageDefaults {
            postgres: self.postgres_image.clone().unwrap_or(defaults.postgres),
            pgbackrest: self.pgbackrest_image.clone().unwrap_or(defaults.pgbackrest),
            pgbouncer: self.pgbouncer_image.clone().unwrap_or(defaults.pgbouncer),
        }
    }

    /// Deadline for one pass
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    /// Logging setup
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            json: self.log_json,
            ..TelemetryConfig::default()
        }
    }
}
