//! Container hardening
//!
//! Every container and init container the operator emits runs unprivileged,
//! with a read-only root filesystem and without privilege escalation. The only
//! way to get a pod template into an intent is [`HardenedPodTemplate::new`],
//! which applies [`harden`] to every container, so no builder can skip it.

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, SecurityContext};

use crate::metadata::ResolvedMetadata;

/// Apply the hardening profile to one container
///
/// Overwrites the three hardened fields and leaves the rest of the security
/// context as given. Applying it twice gives the same result as once.
pub fn harden(mut container: Container) -> Container {
    let ctx = container
        .security_context
        .get_or_insert_with(SecurityContext::default);
    ctx.privileged = Some(false);
    ctx.read_only_root_filesystem = Some(true);
    ctx.allow_privilege_escalation = Some(false);
    container
}

/// True when `container` carries the full hardening profile
pub fn is_hardened(container: &Container) -> bool {
    container.security_context.as_ref().is_some_and(|ctx| {
        ctx.privileged == Some(false)
            && ctx.read_only_root_filesystem == Some(true)
            && ctx.allow_privilege_escalation == Some(false)
    })
}

/// A pod template whose containers have all been hardened
#[derive(Clone, Debug, PartialEq)]
pub struct HardenedPodTemplate(PodTemplateSpec);

impl HardenedPodTemplate {
    /// Build a pod template from resolved metadata and a pod spec
    pub fn new(metadata: &ResolvedMetadata, mut spec: PodSpec) -> Self {
        spec.containers = std::mem::take(&mut spec.containers)
            .into_iter()
            .map(harden)
            .collect();
        spec.init_containers = spec
            .init_containers
            .take()
            .map(|init| init.into_iter().map(harden).collect());

        Self(PodTemplateSpec {
            metadata: Some(metadata.template_meta()),
            spec: Some(spec),
        })
    }

    /// Borrow the underlying template
    pub fn as_template(&self) -> &PodTemplateSpec {
        &self.0
    }

    /// Unwrap into the API type
    pub fn into_inner(self) -> PodTemplateSpec {
        self.0
    }
}

/// Every container and init container in a pod template
pub fn all_containers(template: &PodTemplateSpec) -> impl Iterator<Item = &Container> {
    template.spec.iter().flat_map(|spec| {
        spec.containers
            .iter()
            .chain(spec.init_containers.iter().flatten())
    })
}
