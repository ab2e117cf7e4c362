//! Label/annotation cascade across overlay scopes
//!
//! Overlays are applied from least to most specific (cluster first, then the
//! instance set, repository or proxy), so the more specific scope wins on a
//! key collision. Reserved taxonomy labels are inserted last and always win.
//! Overlay keys under the reserved domain are dropped from both labels and
//! annotations. Labels and annotations are merged independently.
//!
//! The resolver is applied separately to each object and to each template
//! nested inside it, so a CronJob, its job template and the job's pod
//! template each get their own resolution.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::debug;

use crate::crd::Metadata;
use crate::taxonomy::LabelTaxonomy;

/// Final labels and annotations for one object or template
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedMetadata {
    /// Merged labels, reserved keys included
    pub labels: BTreeMap<String, String>,
    /// Merged annotations
    pub annotations: BTreeMap<String, String>,
}

impl ResolvedMetadata {
    /// Object metadata for a top-level child object
    pub fn object_meta(
        &self,
        name: impl Into<String>,
        namespace: impl Into<String>,
        owner: OwnerReference,
    ) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            owner_references: Some(vec![owner]),
            ..self.template_meta()
        }
    }

    /// Metadata for a nested template (no name, namespace or owner)
    pub fn template_meta(&self) -> ObjectMeta {
        ObjectMeta {
            labels: non_empty(&self.labels),
            annotations: non_empty(&self.annotations),
            ..Default::default()
        }
    }
}

fn non_empty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then(|| map.clone())
}

/// Merges overlays under a [`LabelTaxonomy`]
#[derive(Clone, Copy, Debug)]
pub struct MetadataCascade<'a> {
    taxonomy: &'a LabelTaxonomy,
}

impl<'a> MetadataCascade<'a> {
    /// Resolver that guards `taxonomy`'s reserved domain
    pub fn new(taxonomy: &'a LabelTaxonomy) -> Self {
        Self { taxonomy }
    }

    /// Merge a cluster overlay and one scope overlay over `reserved`
    pub fn resolve(
        &self,
        reserved: &BTreeMap<String, String>,
        cluster: Option<&Metadata>,
        scope: Option<&Metadata>,
    ) -> ResolvedMetadata {
        self.resolve_chain(reserved, &[cluster, scope])
    }

    /// Merge any number of overlays, least specific first, over `reserved`
    pub fn resolve_chain(
        &self,
        reserved: &BTreeMap<String, String>,
        overlays: &[Option<&Metadata>],
    ) -> ResolvedMetadata {
        let mut resolved = ResolvedMetadata::default();

        for overlay in overlays.iter().flatten() {
            self.merge(&mut resolved.labels, &overlay.labels, "label");
            self.merge(&mut resolved.annotations, &overlay.annotations, "annotation");
        }

        for (k, v) in reserved {
            resolved.labels.insert(k.clone(), v.clone());
        }
        resolved
    }

    fn merge(
        &self,
        target: &mut BTreeMap<String, String>,
        overlay: &BTreeMap<String, String>,
        what: &str,
    ) {
        for (k, v) in overlay {
            if self.taxonomy.is_reserved(k) {
                debug!(key = %k, kind = what, "ignoring overlay key in reserved domain");
                continue;
            }
            target.insert(k.clone(), v.clone());
        }
    }
}
