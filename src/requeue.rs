//! Verdict to requeue-action state machine
//!
//! | verdict          | action                                    | condition           |
//! |------------------|-------------------------------------------|---------------------|
//! | `Converged`      | await change                              | True / Converged    |
//! | `Progressing`    | requeue after the progress interval       | False / Progressing |
//! | `TransientError` | requeue now, then with backoff            | unchanged           |
//! |   (over limit)   | requeue after the maximum backoff delay   | False / RetriesExhausted |
//! | `FatalSpecError` | await change                              | False / SpecInvalid |
//!
//! The consecutive transient failure count is an input and an output: it is
//! persisted in the cluster status between passes, never held in memory.

use std::fmt;
use std::time::Duration;

use kube::runtime::controller::Action;

use crate::crd::{Condition, ConditionStatus};
use crate::retry::RetryConfig;

/// Condition type written after every pass
pub const RECONCILED_CONDITION: &str = "Reconciled";

/// Aggregate result of one reconciliation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing changed and nothing failed
    Converged,
    /// Changes were applied and have not been observed settled yet
    Progressing,
    /// A retryable failure occurred, or the pass was cancelled
    TransientError {
        /// Summary of what failed
        message: String,
    },
    /// The spec is invalid in a way no retry fixes
    FatalSpecError {
        /// What to fix
        message: String,
    },
}

impl Verdict {
    /// Short machine-readable name
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Converged => "Converged",
            Self::Progressing => "Progressing",
            Self::TransientError { .. } => "TransientError",
            Self::FatalSpecError { .. } => "SpecInvalid",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged | Self::Progressing => f.write_str(self.reason()),
            Self::TransientError { message } | Self::FatalSpecError { message } => {
                write!(f, "{}: {}", self.reason(), message)
            }
        }
    }
}

/// What the controller should do after a pass
#[derive(Clone, Debug, PartialEq)]
pub struct RequeueDecision {
    /// Action returned to the controller runtime
    pub action: Action,
    /// Consecutive transient failures including this pass
    pub transient_failures: u32,
    /// Condition to write, if the user-visible state changes
    pub condition: Option<Condition>,
}

/// Maps verdicts to requeue actions
#[derive(Clone, Debug, PartialEq)]
pub struct RequeuePolicy {
    /// Delay before re-checking a pass that made changes
    pub progress_interval: Duration,
    /// Backoff curve for repeated transient failures
    pub backoff: RetryConfig,
    /// Transient failures tolerated before surfacing a condition
    pub max_transient_retries: u32,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(10),
            backoff: RetryConfig {
                max_attempts: 0,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(300),
                backoff_multiplier: 2.0,
            },
            max_transient_retries: 10,
        }
    }
}

impl RequeuePolicy {
    /// Decide the next action given this pass's verdict and the failure
    /// count persisted by the previous pass
    pub fn decide(&self, verdict: &Verdict, prior_failures: u32) -> RequeueDecision {
        match verdict {
            Verdict::Converged => RequeueDecision {
                action: Action::await_change(),
                transient_failures: 0,
                condition: Some(reconciled(
                    ConditionStatus::True,
                    verdict.reason(),
                    "all objects match the spec",
                )),
            },
            Verdict::Progressing => RequeueDecision {
                action: Action::requeue(self.progress_interval),
                transient_failures: 0,
                condition: Some(reconciled(
                    ConditionStatus::False,
                    verdict.reason(),
                    "changes applied, waiting for them to settle",
                )),
            },
            Verdict::TransientError { message } => {
                let failures = prior_failures.saturating_add(1);
                if failures > self.max_transient_retries {
                    return RequeueDecision {
                        action: Action::requeue(self.backoff.max_delay),
                        transient_failures: failures,
                        condition: Some(reconciled(
                            ConditionStatus::False,
                            "RetriesExhausted",
                            format!("{failures} consecutive transient failures, last: {message}"),
                        )),
                    };
                }
                let delay = match prior_failures {
                    0 => Duration::ZERO,
                    n => self.backoff.delay_for_attempt(n - 1),
                };
                RequeueDecision {
                    action: Action::requeue(delay),
                    transient_failures: failures,
                    condition: None,
                }
            }
            Verdict::FatalSpecError { message } => RequeueDecision {
                action: Action::await_change(),
                transient_failures: 0,
                condition: Some(reconciled(
                    ConditionStatus::False,
                    verdict.reason(),
                    message.clone(),
                )),
            },
        }
    }
}

fn reconciled(status: ConditionStatus, reason: &str, message: impl Into<String>) -> Condition {
    Condition::new(RECONCILED_CONDITION, status, reason, message)
}
