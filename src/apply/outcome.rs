//! Per-pass apply outcome

use std::fmt;

use crate::intent::ResourceKind;
use crate::requeue::Verdict;
use crate::Error;

/// What happened to one object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyResult {
    /// Object did not exist and was created
    Created,
    /// Object existed with drift and was updated
    Updated,
    /// Object already matched its intent
    Unchanged,
    /// Object was no longer intended and was deleted
    Pruned,
    /// The store call failed
    Failed {
        /// Error text
        message: String,
        /// Whether a later pass may succeed
        retryable: bool,
    },
    /// Not attempted because the pass was cancelled
    Skipped,
}

impl ApplyResult {
    /// Record a failure from an error
    pub fn failed(error: &Error) -> Self {
        Self::Failed {
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }

    /// True for results that changed the store
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Pruned)
    }
}

/// Outcome for one (kind, name)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectOutcome {
    /// Object kind
    pub kind: ResourceKind,
    /// Object name
    pub name: String,
    /// What happened
    pub result: ApplyResult,
}

impl fmt::Display for ObjectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// A prune listing that could not be completed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListFailure {
    /// Kind that was being listed
    pub kind: ResourceKind,
    /// Error text
    pub message: String,
    /// Whether a later pass may succeed
    pub retryable: bool,
}

/// Everything one apply pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Per-object results, in completion order
    pub objects: Vec<ObjectOutcome>,
    /// Failed prune listings
    pub list_failures: Vec<ListFailure>,
    /// True if any call was skipped because the pass was cancelled
    pub cancelled: bool,
}

impl ReconcileOutcome {
    /// Number of store mutations
    pub fn mutations(&self) -> usize {
        self.objects.iter().filter(|o| o.result.is_mutation()).count()
    }

    /// Number of objects with the given result
    pub fn count(&self, result: &ApplyResult) -> usize {
        self.objects.iter().filter(|o| &o.result == result).count()
    }

    /// Result for one object, if it was touched this pass
    pub fn result_for(&self, kind: ResourceKind, name: &str) -> Option<&ApplyResult> {
        self.objects
            .iter()
            .find(|o| o.kind == kind && o.name == name)
            .map(|o| &o.result)
    }

    /// Objects that failed
    pub fn failures(&self) -> impl Iterator<Item = &ObjectOutcome> {
        self.objects
            .iter()
            .filter(|o| matches!(o.result, ApplyResult::Failed { .. }))
    }

    /// Aggregate verdict
    ///
    /// A non-retryable failure means the object as specified cannot be
    /// applied, which is fatal. Any other failure, or cancellation, is
    /// transient. Otherwise the pass is progressing if it changed anything
    /// and converged if it did not.
    pub fn verdict(&self) -> Verdict {
        let mut permanent = Vec::new();
        let mut transient = Vec::new();

        for o in &self.objects {
            if let ApplyResult::Failed { message, retryable } = &o.result {
                let entry = format!("{o}: {message}");
                if *retryable {
                    transient.push(entry);
                } else {
                    permanent.push(entry);
                }
            }
        }
        for l in &self.list_failures {
            let entry = format!("list {}: {}", l.kind, l.message);
            if l.retryable {
                transient.push(entry);
            } else {
                permanent.push(entry);
            }
        }

        if !permanent.is_empty() {
            return Verdict::FatalSpecError {
                message: permanent.join("; "),
            };
        }
        if !transient.is_empty() {
            return Verdict::TransientError {
                message: format!("{} failed: {}", transient.len(), transient.join("; ")),
            };
        }
        if self.cancelled {
            return Verdict::TransientError {
                message: "pass cancelled before all objects were applied".to_string(),
            };
        }
        if self.mutations() > 0 {
            Verdict::Progressing
        } else {
            Verdict::Converged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str, result: ApplyResult) -> ObjectOutcome {
        ObjectOutcome {
            kind: ResourceKind::StatefulWorkload,
            name: name.to_string(),
            result,
        }
    }

    fn outcome(results: Vec<ObjectOutcome>) -> ReconcileOutcome {
        ReconcileOutcome {
            objects: results,
            ..Default::default()
        }
    }

    #[test]
    fn test_all_unchanged_is_converged() {
        let o = outcome(vec![
            object("a", ApplyResult::Unchanged),
            object("b", ApplyResult::Unchanged),
        ]);
        assert_eq!(o.mutations(), 0);
        assert_eq!(o.verdict(), Verdict::Converged);
    }

    #[test]
    fn test_any_mutation_is_progressing() {
        for result in [ApplyResult::Created, ApplyResult::Updated, ApplyResult::Pruned] {
            let o = outcome(vec![object("a", ApplyResult::Unchanged), object("b", result)]);
            assert_eq!(o.verdict(), Verdict::Progressing);
        }
    }

    /// Story: one failed object makes the pass transient even though the
    /// others were applied; nothing is rolled back
    #[test]
    fn story_partial_failure_is_transient() {
        let o = outcome(vec![
            object("a", ApplyResult::Created),
            object(
                "b",
                ApplyResult::Failed {
                    message: "store unavailable: down".to_string(),
                    retryable: true,
                },
            ),
        ]);
        assert_eq!(o.failures().count(), 1);
        assert_eq!(o.count(&ApplyResult::Created), 1);
        match o.verdict() {
            Verdict::TransientError { message } => {
                assert!(message.contains("StatefulSet b"));
                assert!(message.starts_with("1 failed"));
            }
            other => panic!("expected transient, got {other:?}"),
        }
    }

    #[test]
    fn test_permanent_failure_wins_over_transient() {
        let o = outcome(vec![
            object(
                "a",
                ApplyResult::Failed {
                    message: "conflict".to_string(),
                    retryable: true,
                },
            ),
            object(
                "b",
                ApplyResult::Failed {
                    message: "StatefulSet b is controlled by PostgresCluster/x".to_string(),
                    retryable: false,
                },
            ),
        ]);
        assert!(matches!(o.verdict(), Verdict::FatalSpecError { .. }));
    }

    #[test]
    fn test_cancelled_pass_is_transient() {
        let mut o = outcome(vec![
            object("a", ApplyResult::Unchanged),
            object("b", ApplyResult::Skipped),
        ]);
        o.cancelled = true;
        assert!(matches!(o.verdict(), Verdict::TransientError { .. }));
    }

    #[test]
    fn test_list_failure_counts() {
        let mut o = outcome(vec![]);
        o.list_failures.push(ListFailure {
            kind: ResourceKind::ScheduledJob,
            message: "store unavailable".to_string(),
            retryable: true,
        });
        match o.verdict() {
            Verdict::TransientError { message } => assert!(message.contains("list CronJob")),
            other => panic!("expected transient, got {other:?}"),
        }
    }

    #[test]
    fn test_result_for_finds_object() {
        let o = outcome(vec![object("a", ApplyResult::Pruned)]);
        assert_eq!(
            o.result_for(ResourceKind::StatefulWorkload, "a"),
            Some(&ApplyResult::Pruned)
        );
        assert_eq!(o.result_for(ResourceKind::NetworkService, "a"), None);
    }
}
