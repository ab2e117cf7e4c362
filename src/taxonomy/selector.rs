//! Label selectors for list and watch queries

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

/// A single selector requirement
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// The label must be present with exactly this value
    Equals {
        /// Label key
        key: String,
        /// Required value
        value: String,
    },
    /// The label must be present with any value
    Exists {
        /// Label key
        key: String,
    },
}

impl Requirement {
    /// Label key this requirement constrains
    pub fn key(&self) -> &str {
        match self {
            Self::Equals { key, .. } | Self::Exists { key } => key,
        }
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals { key, value } => labels.get(key) == Some(value),
            Self::Exists { key } => labels.contains_key(key),
        }
    }
}

/// Conjunction of requirements, kept sorted by key
///
/// Requirements are ordered so that the same inputs always render the same
/// query string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Empty selector (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key=value` (builder style)
    pub fn equals(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(Requirement::Equals {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Require that `key` is present (builder style)
    pub fn exists(self, key: impl Into<String>) -> Self {
        self.with(Requirement::Exists { key: key.into() })
    }

    fn with(mut self, requirement: Requirement) -> Self {
        self.requirements.retain(|r| r.key() != requirement.key());
        self.requirements.push(requirement);
        self.requirements.sort_by(|a, b| a.key().cmp(b.key()));
        self
    }

    /// Requirements in key order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// True when every requirement holds for `labels`
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Exact-match requirements as a map (for Service and workload selectors)
    pub fn match_labels(&self) -> BTreeMap<String, String> {
        self.requirements
            .iter()
            .filter_map(|r| match r {
                Requirement::Equals { key, value } => Some((key.clone(), value.clone())),
                Requirement::Exists { .. } => None,
            })
            .collect()
    }

    /// Convert to the API `LabelSelector` shape
    pub fn to_label_selector(&self) -> LabelSelector {
        let match_labels = self.match_labels();
        let expressions: Vec<LabelSelectorRequirement> = self
            .requirements
            .iter()
            .filter_map(|r| match r {
                Requirement::Exists { key } => Some(LabelSelectorRequirement {
                    key: key.clone(),
                    operator: "Exists".to_string(),
                    values: None,
                }),
                Requirement::Equals { .. } => None,
            })
            .collect();

        LabelSelector {
            match_labels: (!match_labels.is_empty()).then_some(match_labels),
            match_expressions: (!expressions.is_empty()).then_some(expressions),
        }
    }
}

impl fmt::Display for Selector {
    /// Renders the `labelSelector` query parameter form (`a=b,c`)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match r {
                Requirement::Equals { key, value } => write!(f, "{key}={value}")?,
                Requirement::Exists { key } => f.write_str(key)?,
            }
        }
        Ok(())
    }
}
