//! Full reconciliation passes against an in-memory store
//!
//! These tests drive the public pipeline (compile, apply, prune, requeue,
//! status) end to end without an API server.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::controller::Action;

use common::{cluster, full_spec, minimal_spec, InMemoryStore, RecordingStatusWriter};
use pgcluster::apply::{ApplyResult, PassControl};
use pgcluster::compiler::{ClusterCompiler, ImageDefaults};
use pgcluster::controller::{reconcile, run_pass, Context, PassReport};
use pgcluster::crd::{ConditionStatus, Metadata, PostgresCluster};
use pgcluster::intent::{decode, ClusterIdentity, ResourceKind};
use pgcluster::readiness::ready_instances;
use pgcluster::requeue::{Verdict, RECONCILED_CONDITION};
use pgcluster::security::{all_containers, is_hardened};
use pgcluster::taxonomy::LabelTaxonomy;

const NS: &str = "postgres";

fn context(store: &Arc<InMemoryStore>) -> (Context, Arc<RecordingStatusWriter>) {
    let status = Arc::new(RecordingStatusWriter::default());
    (Context::new(store.clone(), status.clone()), status)
}

async fn pass(cluster: &PostgresCluster, ctx: &Context) -> PassReport {
    run_pass(cluster, ctx, &PassControl::unbounded())
        .await
        .expect("cluster is usable")
}

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn labels_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> BTreeMap<String, String> {
    meta.labels.clone().unwrap_or_default()
}

fn typed<K>(store: &InMemoryStore, kind: ResourceKind, name: &str) -> K
where
    K: kube::Resource<DynamicType = ()> + serde::de::DeserializeOwned,
{
    let obj = store
        .object(kind, NS, name)
        .unwrap_or_else(|| panic!("{kind} {name} exists"));
    decode(&obj).expect("decodes")
}

mod full_cluster {
    use super::*;

    /// Story: a cluster with two instance sets, one repository with every
    /// schedule and a proxy yields exactly the expected objects
    #[tokio::test]
    async fn story_first_pass_creates_every_object() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        let hippo = cluster("hippo", NS, full_spec());

        let report = pass(&hippo, &ctx).await;
        assert_eq!(report.verdict, Verdict::Progressing);

        assert_eq!(
            store.names(ResourceKind::StatefulWorkload, NS),
            vec!["hippo-a", "hippo-b"]
        );
        assert_eq!(
            store.names(ResourceKind::ScheduledJob, NS),
            vec!["hippo-repo1-diff", "hippo-repo1-full", "hippo-repo1-incr"]
        );
        assert_eq!(
            store.names(ResourceKind::StatelessWorkload, NS),
            vec!["hippo-pgbouncer"]
        );
        assert_eq!(
            store.names(ResourceKind::NetworkService, NS),
            vec!["hippo-pgbouncer", "hippo-pods", "hippo-primary", "hippo-replicas"]
        );
        assert_eq!(store.mutations(), 10);
    }

    /// Story: the repository overlay reaches the CronJob, its job template
    /// and the job's pod template alike
    #[tokio::test]
    async fn story_backup_overlay_reaches_every_level() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        pass(&cluster("hippo", NS, full_spec()), &ctx).await;

        for name in ["hippo-repo1-full", "hippo-repo1-diff", "hippo-repo1-incr"] {
            let job: CronJob = typed(&store, ResourceKind::ScheduledJob, name);
            let spec = job.spec.expect("cronjob spec");
            let job_meta = spec.job_template.metadata.clone().expect("job metadata");
            let pod_meta = spec
                .job_template
                .spec
                .as_ref()
                .and_then(|j| j.template.metadata.clone())
                .expect("pod metadata");

            for labels in [
                labels_of(&job.metadata),
                labels_of(&job_meta),
                labels_of(&pod_meta),
            ] {
                assert_eq!(labels.get("repo").map(String::as_str), Some("one"));
                assert_eq!(labels.get("backup").map(String::as_str), Some("pgbackrest"));
                assert_eq!(labels.get("team").map(String::as_str), Some("db"));
                assert_eq!(
                    labels.get("pgcluster.dev/pgbackrest-repo").map(String::as_str),
                    Some("repo1")
                );
                assert_eq!(
                    labels.get("pgcluster.dev/pgbackrest").map(String::as_str),
                    Some("")
                );
            }
            assert_eq!(
                pod_meta
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get("retention"))
                    .map(String::as_str),
                Some("30d")
            );
        }
    }

    #[tokio::test]
    async fn test_instance_overlay_stays_in_its_set() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        pass(&cluster("hippo", NS, full_spec()), &ctx).await;

        let a: StatefulSet = typed(&store, ResourceKind::StatefulWorkload, "hippo-a");
        let b: StatefulSet = typed(&store, ResourceKind::StatefulWorkload, "hippo-b");
        let pod_labels = |sts: &StatefulSet| {
            sts.spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .map(labels_of)
                .unwrap_or_default()
        };

        assert_eq!(pod_labels(&a).get("tier").map(String::as_str), Some("fast"));
        assert!(!pod_labels(&b).contains_key("tier"));
        assert_eq!(pod_labels(&b).get("team").map(String::as_str), Some("db"));
        assert_eq!(
            pod_labels(&b).get("pgcluster.dev/instance-set").map(String::as_str),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_proxy_deployment_carries_proxy_overlay() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        pass(&cluster("hippo", NS, full_spec()), &ctx).await;

        let deploy: Deployment = typed(&store, ResourceKind::StatelessWorkload, "hippo-pgbouncer");
        let labels = labels_of(&deploy.metadata);
        assert_eq!(labels.get("proxy").map(String::as_str), Some("yes"));
        assert_eq!(
            labels.get("pgcluster.dev/role").map(String::as_str),
            Some("pgbouncer")
        );
    }

    /// Story: the headless pods Service covers database pods and nothing
    /// else the cluster runs
    #[tokio::test]
    async fn story_pods_service_selects_only_database_pods() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        pass(&cluster("hippo", NS, full_spec()), &ctx).await;

        let svc: Service = typed(&store, ResourceKind::NetworkService, "hippo-pods");
        let selector = svc.spec.and_then(|s| s.selector).expect("selector");
        let selects = |labels: &BTreeMap<String, String>| {
            selector.iter().all(|(k, v)| labels.get(k) == Some(v))
        };

        for name in ["hippo-a", "hippo-b"] {
            let sts: StatefulSet = typed(&store, ResourceKind::StatefulWorkload, name);
            let pod = sts.spec.and_then(|s| s.template.metadata).expect("pod metadata");
            assert!(selects(&labels_of(&pod)), "{name} pods are selected");
        }

        let deploy: Deployment = typed(&store, ResourceKind::StatelessWorkload, "hippo-pgbouncer");
        let proxy_pod = deploy.spec.and_then(|s| s.template.metadata).expect("pod metadata");
        assert!(!selects(&labels_of(&proxy_pod)));

        let job: CronJob = typed(&store, ResourceKind::ScheduledJob, "hippo-repo1-full");
        let backup_pod = job
            .spec
            .and_then(|s| s.job_template.spec)
            .and_then(|j| j.template.metadata)
            .expect("pod metadata");
        assert!(!selects(&labels_of(&backup_pod)));
    }

    /// Story: every container of every stored pod template is hardened
    #[tokio::test]
    async fn story_every_stored_container_is_hardened() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        pass(&cluster("hippo", NS, full_spec()), &ctx).await;

        let mut templates = Vec::new();
        for name in store.names(ResourceKind::StatefulWorkload, NS) {
            let sts: StatefulSet = typed(&store, ResourceKind::StatefulWorkload, &name);
            templates.push(sts.spec.expect("spec").template);
        }
        for name in store.names(ResourceKind::StatelessWorkload, NS) {
            let deploy: Deployment = typed(&store, ResourceKind::StatelessWorkload, &name);
            templates.push(deploy.spec.expect("spec").template);
        }
        for name in store.names(ResourceKind::ScheduledJob, NS) {
            let job: CronJob = typed(&store, ResourceKind::ScheduledJob, &name);
            let template = job
                .spec
                .and_then(|s| s.job_template.spec)
                .map(|j| j.template)
                .expect("job pod template");
            templates.push(template);
        }

        assert_eq!(templates.len(), 6);
        for template in &templates {
            let containers: Vec<_> = all_containers(template).collect();
            assert!(!containers.is_empty());
            assert!(containers.iter().all(|c| is_hardened(c)));
        }
    }
}

mod replica_service {
    use super::*;

    fn build(overlay: Option<Metadata>) -> Service {
        let mut spec = minimal_spec();
        spec.port = Some(9876);
        spec.metadata = overlay;
        let identity = ClusterIdentity::new("pg2", "ns1");
        let taxonomy = LabelTaxonomy::default();
        let images = ImageDefaults::default();
        ClusterCompiler::new(&identity, &spec, &taxonomy, &images).replica_service()
    }

    #[test]
    fn test_replica_service_without_overlay() {
        let service = build(None);
        assert_eq!(service.metadata.name.as_deref(), Some("pg2-replicas"));
        assert_eq!(service.metadata.namespace.as_deref(), Some("ns1"));
        assert_eq!(service.metadata.annotations, None);
        assert_eq!(
            labels_of(&service.metadata),
            map(&[
                ("pgcluster.dev/cluster", "pg2"),
                ("pgcluster.dev/role", "replica"),
            ])
        );

        let spec = service.spec.expect("service spec");
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(
            spec.selector,
            Some(map(&[
                ("pgcluster.dev/cluster", "pg2"),
                ("pgcluster.dev/role", "replica"),
            ]))
        );
        let ports = spec.ports.expect("ports");
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("postgres"));
        assert_eq!(ports[0].port, 9876);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
        assert_eq!(
            ports[0].target_port,
            Some(IntOrString::String("postgres".to_string()))
        );

        let owner = &service.metadata.owner_references.expect("owner")[0];
        assert_eq!(owner.kind, "PostgresCluster");
        assert_eq!(owner.name, "pg2");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    /// Story: the cluster overlay lands on the Service metadata and never in
    /// its selector
    #[test]
    fn story_cluster_overlay_on_replica_service() {
        let service = build(Some(
            Metadata::with_labels([("happy", "label")]).annotation("some", "note"),
        ));
        assert_eq!(
            service.metadata.annotations,
            Some(map(&[("some", "note")]))
        );
        assert_eq!(
            labels_of(&service.metadata),
            map(&[
                ("happy", "label"),
                ("pgcluster.dev/cluster", "pg2"),
                ("pgcluster.dev/role", "replica"),
            ])
        );
        assert_eq!(
            service.spec.and_then(|s| s.selector),
            Some(map(&[
                ("pgcluster.dev/cluster", "pg2"),
                ("pgcluster.dev/role", "replica"),
            ]))
        );
    }

    #[test]
    fn test_overlay_cannot_override_reserved_labels() {
        let service = build(Some(Metadata::with_labels([
            ("pgcluster.dev/cluster", "other"),
            ("pgcluster.dev/role", "master"),
        ])));
        assert_eq!(
            labels_of(&service.metadata),
            map(&[
                ("pgcluster.dev/cluster", "pg2"),
                ("pgcluster.dev/role", "replica"),
            ])
        );
    }
}

mod convergence {
    use super::*;

    /// Story: a second pass over an unchanged spec makes no writes at all
    #[tokio::test]
    async fn story_second_pass_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        let hippo = cluster("hippo", NS, full_spec());

        pass(&hippo, &ctx).await;
        let after_first = store.mutations();

        let report = pass(&hippo, &ctx).await;
        assert_eq!(report.verdict, Verdict::Converged);
        assert_eq!(report.outcome.expect("applied").mutations(), 0);
        assert_eq!(store.mutations(), after_first);
    }

    /// Story: removing an instance set prunes its StatefulSet and nothing else
    #[tokio::test]
    async fn story_removed_instance_set_is_pruned() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        let mut hippo = cluster("hippo", NS, full_spec());
        pass(&hippo, &ctx).await;

        hippo.spec.instances.retain(|s| s.name != "b");
        let report = pass(&hippo, &ctx).await;
        let outcome = report.outcome.expect("applied");

        assert_eq!(
            outcome.result_for(ResourceKind::StatefulWorkload, "hippo-b"),
            Some(&ApplyResult::Pruned)
        );
        assert_eq!(outcome.mutations(), 1);
        assert_eq!(store.names(ResourceKind::StatefulWorkload, NS), vec!["hippo-a"]);
        assert_eq!(report.verdict, Verdict::Progressing);
    }

    #[tokio::test]
    async fn test_disabling_proxy_prunes_deployment_and_service() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        let mut hippo = cluster("hippo", NS, full_spec());
        pass(&hippo, &ctx).await;

        hippo.spec.proxy = None;
        pass(&hippo, &ctx).await;
        assert!(store.names(ResourceKind::StatelessWorkload, NS).is_empty());
        assert!(!store
            .names(ResourceKind::NetworkService, NS)
            .contains(&"hippo-pgbouncer".to_string()));
    }

    /// Story: an external edit to an operator-owned label is reverted
    #[tokio::test]
    async fn story_external_drift_is_repaired() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        let hippo = cluster("hippo", NS, full_spec());
        pass(&hippo, &ctx).await;

        let mut edited = store
            .object(ResourceKind::NetworkService, NS, "hippo-primary")
            .expect("primary exists");
        edited
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("team".to_string(), "web".to_string());
        store.put(ResourceKind::NetworkService, NS, edited);

        let report = pass(&hippo, &ctx).await;
        assert_eq!(
            report
                .outcome
                .expect("applied")
                .result_for(ResourceKind::NetworkService, "hippo-primary"),
            Some(&ApplyResult::Updated)
        );
        let primary: Service = typed(&store, ResourceKind::NetworkService, "hippo-primary");
        assert_eq!(
            labels_of(&primary.metadata).get("team").map(String::as_str),
            Some("db")
        );
    }

    /// Story: a label or annotation removed from an overlay disappears from
    /// the live objects, while keys other clients wrote survive
    #[tokio::test]
    async fn story_removed_overlay_keys_are_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        let mut hippo = cluster("hippo", NS, full_spec());
        pass(&hippo, &ctx).await;

        let mut foreign = store
            .object(ResourceKind::NetworkService, NS, "hippo-primary")
            .expect("primary exists");
        foreign
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("mesh".to_string(), "injected".to_string());
        store.put(ResourceKind::NetworkService, NS, foreign);

        hippo.spec.metadata = None;
        let report = pass(&hippo, &ctx).await;
        assert_eq!(
            report
                .outcome
                .expect("applied")
                .result_for(ResourceKind::NetworkService, "hippo-primary"),
            Some(&ApplyResult::Updated)
        );

        let primary: Service = typed(&store, ResourceKind::NetworkService, "hippo-primary");
        let labels = labels_of(&primary.metadata);
        assert!(!labels.contains_key("team"));
        assert_eq!(labels.get("mesh").map(String::as_str), Some("injected"));
        let annotations = primary.metadata.annotations.clone().unwrap_or_default();
        assert!(!annotations.contains_key("owner"));
        assert!(annotations.contains_key("pgcluster.dev/intent-hash"));

        let sts: StatefulSet = typed(&store, ResourceKind::StatefulWorkload, "hippo-b");
        assert!(!labels_of(&sts.metadata).contains_key("team"));

        let report = pass(&hippo, &ctx).await;
        assert_eq!(report.verdict, Verdict::Converged);
    }

    /// Story: a transient failure on one object leaves the rest applied and
    /// the next pass finishes the job
    #[tokio::test]
    async fn story_partial_failure_recovers_next_pass() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        let hippo = cluster("hippo", NS, full_spec());

        store.fail_on("hippo-b");
        let report = pass(&hippo, &ctx).await;
        assert!(matches!(report.verdict, Verdict::TransientError { .. }));
        assert_eq!(store.names(ResourceKind::StatefulWorkload, NS), vec!["hippo-a"]);

        store.heal("hippo-b");
        let report = pass(&hippo, &ctx).await;
        assert_eq!(report.verdict, Verdict::Progressing);
        assert_eq!(
            store.names(ResourceKind::StatefulWorkload, NS),
            vec!["hippo-a", "hippo-b"]
        );
    }
}

mod isolation {
    use super::*;

    /// Story: two clusters in one namespace never prune each other's objects
    #[tokio::test]
    async fn story_clusters_do_not_prune_each_other() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        let hippo = cluster("hippo", NS, full_spec());
        let rhino = cluster("rhino", NS, minimal_spec());

        pass(&hippo, &ctx).await;
        pass(&rhino, &ctx).await;
        let report = pass(&rhino, &ctx).await;
        assert_eq!(report.verdict, Verdict::Converged);

        assert_eq!(
            store.names(ResourceKind::StatefulWorkload, NS),
            vec!["hippo-a", "hippo-b", "rhino-00"]
        );
        assert_eq!(store.names(ResourceKind::ScheduledJob, NS).len(), 3);
    }

    /// Story: an object with the intended name but another controller is
    /// not adopted and the pass reports a fatal error
    #[tokio::test]
    async fn story_foreign_object_is_not_adopted() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);

        let squatter: kube::api::DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "hippo-primary",
                "namespace": NS,
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": "someone-else",
                    "uid": "x",
                    "controller": true
                }]
            }
        }))
        .expect("valid object");
        store.put(ResourceKind::NetworkService, NS, squatter);

        let report = pass(&cluster("hippo", NS, full_spec()), &ctx).await;
        assert!(matches!(report.verdict, Verdict::FatalSpecError { .. }));

        let primary = store
            .object(ResourceKind::NetworkService, NS, "hippo-primary")
            .expect("still there");
        assert_eq!(
            primary.metadata.owner_references.expect("owner")[0].name,
            "someone-else"
        );
    }
}

mod controller {
    use super::*;

    /// Story: reconcile writes Progressing, then Converged once the store
    /// matches, and stops requeueing
    #[tokio::test]
    async fn story_reconcile_reaches_converged_condition() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, status) = context(&store);
        let ctx = Arc::new(ctx);
        let mut hippo = cluster("hippo", NS, full_spec());

        let action = reconcile(Arc::new(hippo.clone()), ctx.clone())
            .await
            .expect("first pass");
        assert_eq!(action, Action::requeue(std::time::Duration::from_secs(10)));
        hippo.status = status.last();

        let action = reconcile(Arc::new(hippo.clone()), ctx)
            .await
            .expect("second pass");
        assert_eq!(action, Action::await_change());

        let last = status.last().expect("status written");
        let cond = last
            .get_condition(RECONCILED_CONDITION)
            .expect("reconciled condition");
        assert_eq!(cond.status, ConditionStatus::True);
        assert_eq!(cond.reason, "Converged");
        assert_eq!(last.observed_generation, Some(1));
        assert_eq!(status.count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_spec_invalid() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, status) = context(&store);
        let mut spec = full_spec();
        spec.backups.pgbackrest.repos[0]
            .backup_schedules
            .as_mut()
            .expect("schedules")
            .full = Some("61 * * * *".to_string());

        let action = reconcile(Arc::new(cluster("hippo", NS, spec)), Arc::new(ctx))
            .await
            .expect("reconcile succeeds");
        assert_eq!(action, Action::await_change());
        assert_eq!(store.mutations(), 0);

        let cond = status
            .last()
            .and_then(|s| s.get_condition(RECONCILED_CONDITION).cloned())
            .expect("condition");
        assert_eq!(cond.reason, "SpecInvalid");
        assert!(cond.message.contains("full"));
    }
}

mod readiness {
    use super::*;

    #[tokio::test]
    async fn test_ready_instances_reads_stored_statefulsets() {
        let store = Arc::new(InMemoryStore::new());
        let (ctx, _) = context(&store);
        pass(&cluster("hippo", NS, full_spec()), &ctx).await;

        let identity = ClusterIdentity::new("hippo", NS).with_uid("hippo-uid");
        let taxonomy = LabelTaxonomy::default();
        assert_eq!(
            ready_instances(store.as_ref(), &taxonomy, &identity)
                .await
                .expect("listable"),
            0
        );

        let mut a = store
            .object(ResourceKind::StatefulWorkload, NS, "hippo-a")
            .expect("hippo-a");
        a.data["status"] = serde_json::json!({"replicas": 1, "readyReplicas": 1});
        store.put(ResourceKind::StatefulWorkload, NS, a);

        assert_eq!(
            ready_instances(store.as_ref(), &taxonomy, &identity)
                .await
                .expect("listable"),
            1
        );
    }
}
