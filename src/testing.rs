//! In-memory store and metrics doubles plus object fixtures for unit tests.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, sleep};

use crate::error::{MetricsError, StoreError};
use crate::model::{PodRef, ResourceKind, Usage, pod_key};
use crate::source::{MetricsSource, ResourceStore, StoreResult};

pub fn pod_from_json(value: Value) -> Pod {
    serde_json::from_value(value).unwrap()
}

/// A running, ready pod with one container requesting `100m` and `1Mi`.
pub fn pod(namespace: &str, name: &str, node: &str, limit: Option<Usage>) -> Pod {
    let mut resources = json!({ "requests": { "cpu": "100m", "memory": "1Mi" } });
    if let Some(limit) = limit {
        resources["limits"] = json!({
            "cpu": format!("{}m", limit.cpu_millis),
            "memory": limit.memory_bytes.to_string(),
        });
    }
    pod_from_json(json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "creationTimestamp": "2024-01-01T00:00:00Z"
        },
        "spec": {
            "nodeName": node,
            "containers": [{ "name": "app", "image": "registry/app:1", "resources": resources }]
        },
        "status": {
            "phase": "Running",
            "podIP": "10.0.0.1",
            "conditions": [{ "type": "Ready", "status": "True" }],
            "containerStatuses": [{
                "name": "app", "image": "registry/app:1", "imageID": "",
                "ready": true, "restartCount": 0, "state": { "running": {} }
            }]
        }
    }))
}

pub fn node(name: &str, ready: bool, allocatable: Usage) -> Node {
    let ready = if ready { "True" } else { "False" };
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "creationTimestamp": "2023-06-01T00:00:00Z",
            "labels": { "node-role.kubernetes.io/control-plane": "" }
        },
        "status": {
            "conditions": [{ "type": "Ready", "status": ready }],
            "allocatable": {
                "cpu": format!("{}m", allocatable.cpu_millis),
                "memory": allocatable.memory_bytes.to_string(),
            },
            "capacity": {
                "cpu": format!("{}m", allocatable.cpu_millis),
                "memory": allocatable.memory_bytes.to_string(),
            }
        }
    }))
    .unwrap()
}

pub fn namespace(name: &str) -> Namespace {
    serde_json::from_value(json!({ "metadata": { "name": name } })).unwrap()
}

pub fn deployment(name: &str, desired: i32, ready: i32) -> Deployment {
    serde_json::from_value(json!({
        "metadata": { "name": name, "namespace": "default" },
        "spec": {
            "replicas": desired,
            "selector": {},
            "template": {}
        },
        "status": { "readyReplicas": ready }
    }))
    .unwrap()
}

#[derive(Default)]
pub struct FakeStore {
    pub pods: Vec<Arc<Pod>>,
    pub nodes: Vec<Arc<Node>>,
    pub namespaces: Vec<Arc<Namespace>>,
    pub deployments: Vec<Arc<Deployment>>,
    unsynced: HashSet<ResourceKind>,
    failing: Mutex<HashSet<ResourceKind>>,
}

impl FakeStore {
    pub fn new(pods: Vec<Pod>, nodes: Vec<Node>) -> Self {
        Self {
            pods: pods.into_iter().map(Arc::new).collect(),
            nodes: nodes.into_iter().map(Arc::new).collect(),
            namespaces: vec![Arc::new(namespace("default"))],
            ..Self::default()
        }
    }

    pub fn unsynced(mut self, kind: ResourceKind) -> Self {
        self.unsynced.insert(kind);
        self
    }

    pub fn set_failing(&self, kind: ResourceKind, failing: bool) {
        let mut guard = self.failing.lock().unwrap();
        if failing {
            guard.insert(kind);
        } else {
            guard.remove(&kind);
        }
    }

    fn list<K>(&self, kind: ResourceKind, items: &[Arc<K>]) -> StoreResult<K> {
        if self.unsynced.contains(&kind) {
            return Err(StoreError::NotSynced(kind));
        }
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(StoreError::Unavailable {
                kind,
                reason: "injected failure".to_string(),
            });
        }
        Ok(items.to_vec())
    }
}

impl ResourceStore for FakeStore {
    fn has_synced(&self, kind: ResourceKind) -> bool {
        !self.unsynced.contains(&kind)
    }

    fn pods(&self) -> StoreResult<Pod> {
        self.list(ResourceKind::Pods, &self.pods)
    }

    fn nodes(&self) -> StoreResult<Node> {
        self.list(ResourceKind::Nodes, &self.nodes)
    }

    fn node(&self, name: &str) -> Result<Option<Arc<Node>>, StoreError> {
        Ok(self
            .list(ResourceKind::Nodes, &self.nodes)?
            .into_iter()
            .find(|node| node.metadata.name.as_deref() == Some(name)))
    }

    fn namespaces(&self) -> StoreResult<Namespace> {
        self.list(ResourceKind::Namespaces, &self.namespaces)
    }

    fn deployments(&self) -> StoreResult<Deployment> {
        self.list(ResourceKind::Deployments, &self.deployments)
    }

    fn replica_sets(&self) -> StoreResult<ReplicaSet> {
        self.list(ResourceKind::ReplicaSets, &[])
    }

    fn daemon_sets(&self) -> StoreResult<DaemonSet> {
        self.list(ResourceKind::DaemonSets, &[])
    }

    fn stateful_sets(&self) -> StoreResult<StatefulSet> {
        self.list(ResourceKind::StatefulSets, &[])
    }

    fn jobs(&self) -> StoreResult<Job> {
        self.list(ResourceKind::Jobs, &[])
    }

    fn cron_jobs(&self) -> StoreResult<CronJob> {
        self.list(ResourceKind::CronJobs, &[])
    }

    fn persistent_volumes(&self) -> StoreResult<PersistentVolume> {
        self.list(ResourceKind::PersistentVolumes, &[])
    }

    fn persistent_volume_claims(&self) -> StoreResult<PersistentVolumeClaim> {
        self.list(ResourceKind::PersistentVolumeClaims, &[])
    }
}

/// Metrics double. Pods marked as hanging never answer.
pub struct FakeMetrics {
    available: bool,
    pods: Mutex<HashMap<String, Usage>>,
    nodes: Mutex<HashMap<String, Usage>>,
    hanging: HashSet<String>,
    hang_nodes: bool,
    latency: Duration,
    calls: AtomicUsize,
}

impl Default for FakeMetrics {
    fn default() -> Self {
        Self {
            available: true,
            pods: Mutex::default(),
            nodes: Mutex::default(),
            hanging: HashSet::new(),
            hang_nodes: false,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn with_pod(self, namespace: &str, name: &str, usage: Usage) -> Self {
        self.set_pod(namespace, name, usage);
        self
    }

    pub fn with_node(self, name: &str, usage: Usage) -> Self {
        self.nodes.lock().unwrap().insert(name.to_string(), usage);
        self
    }

    pub fn hanging(mut self, namespace: &str, name: &str) -> Self {
        self.hanging.insert(pod_key(namespace, name));
        self
    }

    pub fn hanging_nodes(mut self) -> Self {
        self.hang_nodes = true;
        self
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_pod(&self, namespace: &str, name: &str, usage: Usage) {
        self.pods
            .lock()
            .unwrap()
            .insert(pod_key(namespace, name), usage);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    fn available(&self) -> bool {
        self.available
    }

    async fn pod_metrics(&self, pod: &PodRef) -> Result<Usage, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.latency).await;
        let key = pod.key();
        if self.hanging.contains(&key) {
            std::future::pending::<()>().await;
        }
        if !self.available {
            return Err(MetricsError::Unavailable);
        }
        let usage = self.pods.lock().unwrap().get(&key).copied();
        usage.ok_or(MetricsError::Unavailable)
    }

    async fn node_metrics(&self, node: &str) -> Result<Usage, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.latency).await;
        if self.hang_nodes {
            std::future::pending::<()>().await;
        }
        if !self.available {
            return Err(MetricsError::Unavailable);
        }
        let usage = self.nodes.lock().unwrap().get(node).copied();
        usage.ok_or(MetricsError::Unavailable)
    }
}
