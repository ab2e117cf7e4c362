//! pgBackRest backup CronJobs
//!
//! One CronJob per repository per configured backup type. The CronJob, its
//! job template and the job's pod template are each resolved on their own
//! with the overlay chain cluster → pgbackrest → repository.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use tracing::warn;

use super::{tmp_mount, tmp_volume, ClusterCompiler};
use crate::crd::{BackupType, RepoSpec};
use crate::metadata::ResolvedMetadata;
use crate::security::HardenedPodTemplate;
use crate::taxonomy::{Role, Scope};

/// Backup container name
pub const PGBACKREST_CONTAINER: &str = "pgbackrest";

impl ClusterCompiler<'_> {
    /// CronJobs for one repository; empty when it has no schedules
    ///
    /// A repository whose name carries no pgBackRest index gets no jobs;
    /// validation rejects such names before compiling.
    pub fn backup_jobs(&self, repo: &RepoSpec) -> Vec<CronJob> {
        let Some(index) = repo.index() else {
            warn!(repo = %repo.name, "repository has no pgBackRest index, skipping backup jobs");
            return Vec::new();
        };
        repo.backup_schedules
            .iter()
            .flat_map(|s| s.entries())
            .map(|(backup_type, schedule)| self.backup_job(repo, index, backup_type, schedule))
            .collect()
    }

    fn backup_metadata(&self, repo: &RepoSpec, backup_type: BackupType) -> ResolvedMetadata {
        let scope = Scope::cluster(&self.identity.name)
            .role(Role::PgBackRest)
            .repo(&repo.name)
            .backup_type(backup_type);
        let reserved = self.taxonomy.labels(&scope);
        self.cascade().resolve_chain(
            &reserved,
            &[
                self.cluster_overlay(),
                self.spec.backups.pgbackrest.metadata.as_ref(),
                repo.metadata.as_ref(),
            ],
        )
    }

    /// `<cluster>-<repo>-<full|diff|incr>`
    fn backup_job(
        &self,
        repo: &RepoSpec,
        index: u32,
        backup_type: BackupType,
        schedule: &str,
    ) -> CronJob {
        let cronjob = self.backup_metadata(repo, backup_type);
        let job = self.backup_metadata(repo, backup_type);
        let pod = self.backup_metadata(repo, backup_type);

        let image = self
            .spec
            .backups
            .pgbackrest
            .image
            .clone()
            .unwrap_or_else(|| self.images.pgbackrest.clone());

        let container = Container {
            name: PGBACKREST_CONTAINER.to_string(),
            image: Some(image),
            command: Some(vec![
                "pgbackrest".to_string(),
                "backup".to_string(),
                "--stanza=db".to_string(),
                format!("--repo={index}"),
                format!("--type={}", backup_type),
            ]),
            volume_mounts: Some(vec![tmp_mount()]),
            ..Default::default()
        };

        let pod_spec = PodSpec {
            containers: vec![container],
            restart_policy: Some("OnFailure".to_string()),
            volumes: Some(vec![tmp_volume()]),
            enable_service_links: Some(false),
            ..Default::default()
        };

        CronJob {
            metadata: cronjob.object_meta(
                self.child_name(&format!("{}-{}", repo.name, backup_type)),
                &self.identity.namespace,
                self.owner(),
            ),
            spec: Some(CronJobSpec {
                schedule: schedule.to_string(),
                concurrency_policy: Some("Forbid".to_string()),
                job_template: JobTemplateSpec {
                    metadata: Some(job.template_meta()),
                    spec: Some(JobSpec {
                        template: HardenedPodTemplate::new(&pod, pod_spec).into_inner(),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}
