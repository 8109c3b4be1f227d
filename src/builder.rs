//! Turns cached Kubernetes objects plus optional metrics into view models.
//!
//! Builders are pure: the same inputs always give the same view. Missing
//! metrics never fail a build, they leave `usage` empty.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::model::{ClusterSummaryView, NodeView, PodView, ReadyCount, Usage, pod_key};
use crate::quantity::{storage_bytes, usage_from_resource_list};

pub fn build_pod_view(
    pod: &Pod,
    usage: Option<Usage>,
    node_usage: Option<Usage>,
    node_allocatable: Option<Usage>,
) -> PodView {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let containers = container_summary(pod);
    let (requested, limit) = resource_totals(pod);
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();

    PodView {
        key: pod_key(&namespace, &name),
        namespace,
        name,
        status: pod_status(pod, &containers),
        node: spec
            .and_then(|spec| spec.node_name.clone())
            .unwrap_or_default(),
        ip: status
            .and_then(|status| status.pod_ip.clone())
            .unwrap_or_default(),
        created_at: pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|time| time.0.as_second()),
        ready_containers: containers.ready,
        total_containers: containers.total,
        restarts: containers.restarts,
        volumes: spec
            .and_then(|spec| spec.volumes.as_ref())
            .map_or(0, Vec::len),
        volume_mounts: all_containers(pod)
            .map(|container| container.volume_mounts.as_ref().map_or(0, Vec::len))
            .sum(),
        requested,
        limit,
        usage,
        node_allocatable,
        node_usage,
        peak: None,
    }
}

#[derive(Debug, Default)]
struct ContainerSummary<'a> {
    ready: usize,
    total: usize,
    restarts: i32,
    some_running: bool,
    reason: Option<String>,
    statuses: &'a [ContainerStatus],
}

fn container_summary(pod: &Pod) -> ContainerSummary<'_> {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_deref())
        .unwrap_or(&[]);

    let mut summary = ContainerSummary {
        total: statuses.len(),
        statuses,
        ..ContainerSummary::default()
    };
    for container in statuses {
        summary.restarts = summary.restarts.saturating_add(container.restart_count);
        let Some(state) = container.state.as_ref() else {
            continue;
        };
        if state.running.is_some() {
            summary.some_running = true;
            if container.ready {
                summary.ready += 1;
            }
        }
        if summary.reason.is_some() {
            continue;
        }
        if let Some(waiting) = state.waiting.as_ref() {
            summary.reason = Some(
                waiting
                    .reason
                    .clone()
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "Waiting".to_string()),
            );
        } else if let Some(terminated) = state.terminated.as_ref() {
            summary.reason = Some(match terminated.reason.as_deref() {
                Some(reason) if !reason.is_empty() => reason.to_string(),
                _ => match terminated.signal {
                    Some(signal) if signal != 0 => format!("Sig:{signal}"),
                    _ => format!("Exit:{}", terminated.exit_code),
                },
            });
        }
    }
    summary
}

fn pod_status(pod: &Pod, containers: &ContainerSummary<'_>) -> String {
    if containers.statuses.is_empty() {
        return pod
            .status
            .as_ref()
            .and_then(|status| status.phase.clone())
            .filter(|phase| !phase.is_empty())
            .unwrap_or_else(|| "Pending".to_string());
    }
    if let Some(reason) = containers.reason.as_ref() {
        return reason.clone();
    }
    if containers.some_running && pod_is_ready(pod) {
        "Running".to_string()
    } else {
        "NotReady".to_string()
    }
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
}

fn all_containers(pod: &Pod) -> impl Iterator<Item = &Container> {
    let spec = pod.spec.as_ref();
    spec.into_iter()
        .flat_map(|spec| spec.containers.iter())
        .chain(
            spec.and_then(|spec| spec.init_containers.as_ref())
                .into_iter()
                .flatten(),
        )
}

/// Requested and limit totals over regular and init containers. Pod overhead
/// counts toward both.
fn resource_totals(pod: &Pod) -> (Usage, Usage) {
    let mut requested = Usage::default();
    let mut limit = Usage::default();
    for container in all_containers(pod) {
        let Some(resources) = container.resources.as_ref() else {
            continue;
        };
        if let Some(requests) = resources.requests.as_ref() {
            requested = requested.saturating_add(usage_from_resource_list(requests));
        }
        if let Some(limits) = resources.limits.as_ref() {
            limit = limit.saturating_add(usage_from_resource_list(limits));
        }
    }

    if let Some(overhead) = pod.spec.as_ref().and_then(|spec| spec.overhead.as_ref()) {
        let overhead = usage_from_resource_list(overhead);
        requested = requested.saturating_add(overhead);
        limit = limit.saturating_add(overhead);
    }
    (requested, limit)
}

pub fn build_node_view(node: &Node, usage: Option<Usage>, pods: &[PodView]) -> NodeView {
    let name = node.metadata.name.clone().unwrap_or_default();
    let status = node.status.as_ref();
    let info = status.and_then(|status| status.node_info.as_ref());
    let on_node = pods.iter().filter(|pod| pod.node == name);

    let (pod_count, requested) = on_node.fold((0usize, Usage::default()), |(count, total), pod| {
        (count + 1, total.saturating_add(pod.requested))
    });

    NodeView {
        status: node_status(node).to_string(),
        roles: node_roles(node),
        created_at: node
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|time| time.0.as_second()),
        kubelet_version: info
            .map(|info| info.kubelet_version.clone())
            .unwrap_or_default(),
        os_image: info.map(|info| info.os_image.clone()).unwrap_or_default(),
        architecture: info
            .map(|info| info.architecture.clone())
            .unwrap_or_default(),
        internal_ip: status
            .and_then(|status| status.addresses.as_ref())
            .and_then(|addresses| {
                addresses
                    .iter()
                    .find(|address| address.type_ == "InternalIP")
                    .map(|address| address.address.clone())
            })
            .unwrap_or_default(),
        pods: pod_count,
        container_images: status
            .and_then(|status| status.images.as_ref())
            .map_or(0, Vec::len),
        allocatable: node_allocatable(node),
        capacity: status
            .and_then(|status| status.capacity.as_ref())
            .map(usage_from_resource_list)
            .unwrap_or_default(),
        requested,
        usage,
        peak: None,
        name,
    }
}

pub fn node_allocatable(node: &Node) -> Usage {
    node.status
        .as_ref()
        .and_then(|status| status.allocatable.as_ref())
        .map(usage_from_resource_list)
        .unwrap_or_default()
}

fn node_status(node: &Node) -> &'static str {
    let ready = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition.type_ == "Ready")
        });
    match ready.map(|condition| condition.status.as_str()) {
        Some("True") => "Ready",
        Some("False") => "NotReady",
        _ => "Unknown",
    }
}

fn node_roles(node: &Node) -> String {
    let Some(labels) = node.metadata.labels.as_ref() else {
        return "<none>".to_string();
    };

    let mut roles = labels
        .keys()
        .filter_map(|key| key.strip_prefix("node-role.kubernetes.io/"))
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();

    if roles.is_empty()
        && let Some(role) = labels.get("kubernetes.io/role")
    {
        roles.push(role.clone());
    }

    if roles.is_empty() {
        "<none>".to_string()
    } else {
        roles.sort();
        roles.dedup();
        roles.join(",")
    }
}

/// Everything the cluster summary is folded from. Non-core lists are `None`
/// while their cache has not synced.
#[derive(Debug, Default, Clone)]
pub struct Inventory {
    pub nodes: Vec<Arc<Node>>,
    pub pods: Vec<Arc<Pod>>,
    pub namespaces: usize,
    pub deployments: Option<Vec<Arc<Deployment>>>,
    pub replica_sets: Option<Vec<Arc<ReplicaSet>>>,
    pub daemon_sets: Option<Vec<Arc<DaemonSet>>>,
    pub stateful_sets: Option<Vec<Arc<StatefulSet>>>,
    pub jobs: Option<Vec<Arc<Job>>>,
    pub cron_jobs: Option<Vec<Arc<CronJob>>>,
    pub persistent_volumes: Option<Vec<Arc<PersistentVolume>>>,
    pub persistent_volume_claims: Option<Vec<Arc<PersistentVolumeClaim>>>,
}

pub fn build_cluster_summary(
    inventory: &Inventory,
    usage: Option<Usage>,
    metrics_available: bool,
) -> ClusterSummaryView {
    let nodes = ReadyCount {
        ready: inventory
            .nodes
            .iter()
            .filter(|node| node_status(node) == "Ready")
            .count(),
        total: inventory.nodes.len(),
    };
    let pods = ReadyCount {
        ready: inventory
            .pods
            .iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|status| status.phase.as_deref())
                    == Some("Running")
            })
            .count(),
        total: inventory.pods.len(),
    };
    let container_images = inventory
        .pods
        .iter()
        .flat_map(|pod| all_containers(pod))
        .filter_map(|container| container.image.as_deref())
        .collect::<BTreeSet<_>>()
        .len();

    let requested = inventory
        .pods
        .iter()
        .map(|pod| resource_totals(pod).0)
        .fold(Usage::default(), Usage::saturating_add);
    let allocatable = inventory
        .nodes
        .iter()
        .map(|node| node_allocatable(node))
        .fold(Usage::default(), Usage::saturating_add);

    ClusterSummaryView {
        oldest_node_created_at: inventory
            .nodes
            .iter()
            .filter_map(|node| node.metadata.creation_timestamp.as_ref())
            .map(|time| time.0.as_second())
            .min(),
        nodes,
        pods,
        namespaces: inventory.namespaces,
        container_images,
        deployments: inventory
            .deployments
            .as_deref()
            .map(|items| ready_count(items, deployment_ready)),
        replica_sets: inventory
            .replica_sets
            .as_deref()
            .map(|items| ready_count(items, replica_set_ready)),
        daemon_sets: inventory
            .daemon_sets
            .as_deref()
            .map(|items| ready_count(items, daemon_set_ready)),
        stateful_sets: inventory
            .stateful_sets
            .as_deref()
            .map(|items| ready_count(items, stateful_set_ready)),
        jobs: inventory.jobs.as_ref().map(Vec::len),
        cron_jobs: inventory.cron_jobs.as_ref().map(Vec::len),
        persistent_volumes: inventory.persistent_volumes.as_ref().map(Vec::len),
        persistent_volume_bytes: inventory
            .persistent_volumes
            .iter()
            .flatten()
            .map(|volume| storage_bytes(volume.spec.as_ref().and_then(|spec| spec.capacity.as_ref())))
            .sum(),
        persistent_volume_claims: inventory.persistent_volume_claims.as_ref().map(Vec::len),
        persistent_volume_claim_bytes: inventory
            .persistent_volume_claims
            .iter()
            .flatten()
            .map(|claim| claim_bytes(claim))
            .sum(),
        requested,
        allocatable,
        usage,
        peak: None,
        metrics_available,
    }
}

fn ready_count<K>(items: &[Arc<K>], is_ready: fn(&K) -> bool) -> ReadyCount {
    ReadyCount {
        ready: items.iter().filter(|item| is_ready(item)).count(),
        total: items.len(),
    }
}

fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);
    ready >= desired
}

fn replica_set_ready(replica_set: &ReplicaSet) -> bool {
    replica_set
        .status
        .as_ref()
        .is_some_and(|status| status.ready_replicas.unwrap_or(0) == status.replicas)
}

fn daemon_set_ready(daemon_set: &DaemonSet) -> bool {
    daemon_set
        .status
        .as_ref()
        .is_some_and(|status| status.number_ready == status.desired_number_scheduled)
}

fn stateful_set_ready(stateful_set: &StatefulSet) -> bool {
    stateful_set
        .status
        .as_ref()
        .is_some_and(|status| status.ready_replicas.unwrap_or(0) == status.replicas)
}

fn claim_bytes(claim: &PersistentVolumeClaim) -> u64 {
    let bound = storage_bytes(
        claim
            .status
            .as_ref()
            .and_then(|status| status.capacity.as_ref()),
    );
    if bound > 0 {
        return bound;
    }
    storage_bytes(
        claim
            .spec
            .as_ref()
            .and_then(|spec| spec.resources.as_ref())
            .and_then(|resources| resources.requests.as_ref()),
    )
}

#[cfg(test)]
mod tests {
    use super::{Inventory, build_cluster_summary, build_node_view, build_pod_view};
    use crate::model::{Capacity, Usage};
    use crate::testing::{deployment, node, pod, pod_from_json};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn running_and_ready_containers_count_as_ready() {
        let pod = pod_from_json(json!({
            "metadata": { "name": "web", "namespace": "default" },
            "spec": { "containers": [{ "name": "a" }, { "name": "b" }] },
            "status": {
                "conditions": [{ "type": "Ready", "status": "True" }],
                "containerStatuses": [
                    { "name": "a", "image": "a", "imageID": "", "ready": true, "restartCount": 2,
                      "state": { "running": {} } },
                    { "name": "b", "image": "b", "imageID": "", "ready": false, "restartCount": 1,
                      "state": { "running": {} } }
                ]
            }
        }));
        let view = build_pod_view(&pod, None, None, None);
        assert_eq!(view.ready_containers, 1);
        assert_eq!(view.total_containers, 2);
        assert_eq!(view.restarts, 3);
        assert_eq!(view.status, "Running");
        assert_eq!(view.key, "default/web");
        assert_eq!(view.usage, None);
    }

    #[test]
    fn waiting_reason_takes_precedence_over_running() {
        let pod = pod_from_json(json!({
            "metadata": { "name": "api", "namespace": "default" },
            "spec": { "containers": [] },
            "status": {
                "conditions": [{ "type": "Ready", "status": "True" }],
                "containerStatuses": [
                    { "name": "a", "image": "a", "imageID": "", "ready": true, "restartCount": 0,
                      "state": { "running": {} } },
                    { "name": "b", "image": "b", "imageID": "", "ready": false, "restartCount": 7,
                      "state": { "waiting": { "reason": "CrashLoopBackOff" } } }
                ]
            }
        }));
        assert_eq!(build_pod_view(&pod, None, None, None).status, "CrashLoopBackOff");
    }

    #[test]
    fn terminated_without_reason_reports_signal_or_exit_code() {
        let status = |terminated: serde_json::Value| {
            pod_from_json(json!({
                "metadata": { "name": "job", "namespace": "batch" },
                "spec": { "containers": [] },
                "status": {
                    "containerStatuses": [
                        { "name": "a", "image": "a", "imageID": "", "ready": false, "restartCount": 0,
                          "state": { "terminated": terminated } }
                    ]
                }
            }))
        };
        let signalled = status(json!({ "exitCode": 137, "signal": 9 }));
        let exited = status(json!({ "exitCode": 3 }));
        let completed = status(json!({ "exitCode": 0, "reason": "Completed" }));

        assert_eq!(build_pod_view(&signalled, None, None, None).status, "Sig:9");
        assert_eq!(build_pod_view(&exited, None, None, None).status, "Exit:3");
        assert_eq!(build_pod_view(&completed, None, None, None).status, "Completed");
    }

    #[test]
    fn waiting_without_reason_reports_waiting() {
        let pod = pod_from_json(json!({
            "metadata": { "name": "w", "namespace": "default" },
            "spec": { "containers": [] },
            "status": {
                "containerStatuses": [
                    { "name": "a", "image": "a", "imageID": "", "ready": false, "restartCount": 0,
                      "state": { "waiting": {} } }
                ]
            }
        }));
        assert_eq!(build_pod_view(&pod, None, None, None).status, "Waiting");
    }

    #[test]
    fn running_without_ready_condition_is_not_ready() {
        let pod = pod_from_json(json!({
            "metadata": { "name": "r", "namespace": "default" },
            "spec": { "containers": [] },
            "status": {
                "conditions": [{ "type": "Ready", "status": "False" }],
                "containerStatuses": [
                    { "name": "a", "image": "a", "imageID": "", "ready": false, "restartCount": 0,
                      "state": { "running": {} } }
                ]
            }
        }));
        assert_eq!(build_pod_view(&pod, None, None, None).status, "NotReady");
    }

    #[test]
    fn pod_without_container_statuses_uses_phase() {
        let scheduled = pod_from_json(json!({
            "metadata": { "name": "s", "namespace": "default" },
            "spec": { "containers": [] },
            "status": { "phase": "Succeeded" }
        }));
        let fresh = pod_from_json(json!({
            "metadata": { "name": "f", "namespace": "default" },
            "spec": { "containers": [] }
        }));
        assert_eq!(build_pod_view(&scheduled, None, None, None).status, "Succeeded");
        assert_eq!(build_pod_view(&fresh, None, None, None).status, "Pending");
    }

    #[test]
    fn totals_include_init_containers_and_overhead() {
        let pod = pod_from_json(json!({
            "metadata": { "name": "o", "namespace": "default" },
            "spec": {
                "containers": [{
                    "name": "main",
                    "resources": {
                        "requests": { "cpu": "100m", "memory": "64Mi" },
                        "limits": { "cpu": "500m", "memory": "128Mi" }
                    },
                    "volumeMounts": [{ "name": "data", "mountPath": "/data" }]
                }],
                "initContainers": [{
                    "name": "init",
                    "resources": { "requests": { "cpu": "50m" } }
                }],
                "overhead": { "cpu": "10m", "memory": "1Mi" },
                "volumes": [{ "name": "data", "emptyDir": {} }]
            }
        }));
        let view = build_pod_view(&pod, None, None, None);
        assert_eq!(view.requested, Usage::new(160, 65 * 1024 * 1024));
        assert_eq!(view.limit, Usage::new(510, 129 * 1024 * 1024));
        assert_eq!(view.volumes, 1);
        assert_eq!(view.volume_mounts, 1);
    }

    #[test]
    fn pod_without_limit_falls_back_to_node_allocatable() {
        let pod = pod("default", "p2", "n1", None);
        let view = build_pod_view(
            &pod,
            Some(Usage::new(50, 1024)),
            Some(Usage::new(900, 8192)),
            Some(Usage::new(1000, 4096)),
        );
        assert_eq!(view.cpu_capacity(), Capacity::NodeAllocatable(1000));
        assert_eq!(view.memory_capacity(), Capacity::NodeAllocatable(4096));
        assert_eq!(view.node_usage, Some(Usage::new(900, 8192)));
    }

    #[test]
    fn building_twice_gives_equal_views() {
        let pod = pod("default", "p1", "n1", Some(Usage::new(200, 1024)));
        let first = build_pod_view(&pod, Some(Usage::new(10, 20)), None, None);
        let second = build_pod_view(&pod, Some(Usage::new(10, 20)), None, None);
        assert_eq!(first, second);
    }

    #[test]
    fn node_view_folds_requests_of_its_pods() {
        let node = node("n1", true, Usage::new(4000, 8192));
        let pods = [
            build_pod_view(&pod("a", "p1", "n1", None), None, None, None),
            build_pod_view(&pod("a", "p2", "n1", None), None, None, None),
            build_pod_view(&pod("a", "p3", "n2", None), None, None, None),
        ];
        let view = build_node_view(&node, Some(Usage::new(100, 200)), &pods);
        assert_eq!(view.name, "n1");
        assert_eq!(view.status, "Ready");
        assert_eq!(view.roles, "control-plane");
        assert_eq!(view.pods, 2);
        assert_eq!(view.requested, Usage::new(200, 2 * 1024 * 1024));
        assert_eq!(view.allocatable, Usage::new(4000, 8192));
        assert_eq!(view.usage, Some(Usage::new(100, 200)));
    }

    #[test]
    fn summary_counts_absent_until_synced() {
        let inventory = Inventory {
            nodes: vec![
                Arc::new(node("n1", true, Usage::new(1000, 1024))),
                Arc::new(node("n2", false, Usage::new(1000, 1024))),
            ],
            pods: vec![Arc::new(pod("a", "p1", "n1", None))],
            namespaces: 3,
            deployments: Some(vec![
                Arc::new(deployment("ready", 2, 2)),
                Arc::new(deployment("short", 3, 1)),
            ]),
            ..Inventory::default()
        };
        let summary = build_cluster_summary(&inventory, None, false);

        assert_eq!(summary.nodes.ready, 1);
        assert_eq!(summary.nodes.total, 2);
        assert_eq!(summary.pods.total, 1);
        assert_eq!(summary.namespaces, 3);
        assert_eq!(summary.container_images, 1);
        assert_eq!(summary.allocatable, Usage::new(2000, 2048));
        assert_eq!(summary.requested, Usage::new(100, 1024 * 1024));
        let deployments = summary.deployments.unwrap();
        assert_eq!((deployments.ready, deployments.total), (1, 2));
        assert_eq!(summary.jobs, None);
        assert_eq!(summary.persistent_volume_claims, None);
        assert_eq!(summary.usage, None);
        assert!(!summary.metrics_available);
    }
}
