use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::{self, Config as WatchConfig, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Config};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, info, warn};

use crate::error::{MetricsError, StoreError};
use crate::model::{NamespaceScope, PodRef, ResourceKind, Usage, pod_key};
use crate::quantity::{parse_cpu_millicores, parse_memory_bytes};
use crate::refresh::Shutdown;
use crate::source::{MetricsSource, ResourceStore, StoreResult};

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    cluster: String,
    user: String,
    default_namespace: String,
}

impl KubeGateway {
    /// Builds a client from kubeconfig, optionally pinned to `context`, and
    /// falls back to in-cluster configuration when no kubeconfig exists.
    pub async fn connect(context: Option<String>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            let options = KubeConfigOptions {
                context: context.clone(),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig_value, &options)
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            if context.is_some() {
                anyhow::bail!("kubeconfig not found; --context cannot be used in this environment");
            }
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let cluster = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;

        let context = context
            .or_else(|| {
                kubeconfig
                    .as_ref()
                    .and_then(|cfg| cfg.current_context.clone())
            })
            .unwrap_or_else(|| "in-cluster".to_string());
        let user = kubeconfig
            .as_ref()
            .and_then(|cfg| context_user(cfg, &context))
            .unwrap_or_else(|| "-".to_string());

        Ok(Self {
            client,
            context,
            cluster,
            user,
            default_namespace,
        })
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

fn context_user(kubeconfig: &Kubeconfig, context: &str) -> Option<String> {
    kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == context)
        .and_then(|named| named.context.as_ref())
        .and_then(|context| context.user.clone())
}

struct Cache<K>
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    kind: ResourceKind,
    reader: Store<K>,
    synced: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl<K> Cache<K>
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn readable(&self) -> Result<(), StoreError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable {
                kind: self.kind,
                reason: "watch stopped".to_string(),
            });
        }
        if !self.synced.load(Ordering::Acquire) {
            return Err(StoreError::NotSynced(self.kind));
        }
        Ok(())
    }

    fn list(&self) -> StoreResult<K> {
        self.readable()?;
        Ok(self.reader.state())
    }

    fn get(&self, name: &str) -> Result<Option<Arc<K>>, StoreError>
    where
        K::DynamicType: Default,
    {
        self.readable()?;
        Ok(self.reader.get(&ObjectRef::new(name)))
    }

    async fn wait_until_ready(&self) -> Result<()> {
        self.reader
            .wait_until_ready()
            .await
            .with_context(|| format!("{} watcher stopped before syncing", self.kind))
    }
}

/// Watch-backed local caches, one reflector task per kind.
pub struct KubeStore {
    namespaces: Cache<Namespace>,
    nodes: Cache<Node>,
    pods: Cache<Pod>,
    persistent_volumes: Cache<PersistentVolume>,
    persistent_volume_claims: Cache<PersistentVolumeClaim>,
    deployments: Cache<Deployment>,
    daemon_sets: Cache<DaemonSet>,
    replica_sets: Cache<ReplicaSet>,
    stateful_sets: Cache<StatefulSet>,
    jobs: Cache<Job>,
    cron_jobs: Cache<CronJob>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KubeStore {
    /// Starts watching every kind. Namespaced kinds follow `scope`.
    pub fn start(client: Client, scope: &NamespaceScope, shutdown: &Shutdown) -> Self {
        let mut tasks = Vec::with_capacity(ResourceKind::ALL.len());
        let namespaces = watch(Api::all(client.clone()), ResourceKind::Namespaces, shutdown, &mut tasks);
        let nodes = watch(Api::all(client.clone()), ResourceKind::Nodes, shutdown, &mut tasks);
        let persistent_volumes = watch(
            Api::all(client.clone()),
            ResourceKind::PersistentVolumes,
            shutdown,
            &mut tasks,
        );

        let pods = watch(scoped_api(&client, scope), ResourceKind::Pods, shutdown, &mut tasks);
        let persistent_volume_claims = watch(
            scoped_api(&client, scope),
            ResourceKind::PersistentVolumeClaims,
            shutdown,
            &mut tasks,
        );
        let deployments = watch(
            scoped_api(&client, scope),
            ResourceKind::Deployments,
            shutdown,
            &mut tasks,
        );
        let daemon_sets = watch(
            scoped_api(&client, scope),
            ResourceKind::DaemonSets,
            shutdown,
            &mut tasks,
        );
        let replica_sets = watch(
            scoped_api(&client, scope),
            ResourceKind::ReplicaSets,
            shutdown,
            &mut tasks,
        );
        let stateful_sets = watch(
            scoped_api(&client, scope),
            ResourceKind::StatefulSets,
            shutdown,
            &mut tasks,
        );
        let jobs = watch(scoped_api(&client, scope), ResourceKind::Jobs, shutdown, &mut tasks);
        let cron_jobs = watch(
            scoped_api(&client, scope),
            ResourceKind::CronJobs,
            shutdown,
            &mut tasks,
        );

        Self {
            namespaces,
            nodes,
            pods,
            persistent_volumes,
            persistent_volume_claims,
            deployments,
            daemon_sets,
            replica_sets,
            stateful_sets,
            jobs,
            cron_jobs,
            tasks: Mutex::new(tasks),
        }
    }

    /// Waits for namespaces, nodes and pods to finish their initial list.
    pub async fn wait_for_core(&self, sync_timeout: Duration) -> Result<()> {
        let synced = async {
            self.namespaces.wait_until_ready().await?;
            self.nodes.wait_until_ready().await?;
            self.pods.wait_until_ready().await
        };
        match timeout(sync_timeout, synced).await {
            Ok(result) => result,
            Err(_) => {
                let pending = ResourceKind::CORE
                    .iter()
                    .filter(|kind| !self.has_synced(**kind))
                    .map(|kind| kind.title())
                    .collect::<Vec<_>>();
                anyhow::bail!(
                    "core resources failed to sync within {}s [{}]",
                    sync_timeout.as_secs(),
                    pending.join(", ")
                )
            }
        }
    }

    /// Awaits the watch tasks. They exit once shutdown is signalled.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(error) = task.await {
                warn!("watch task failed: {error}");
            }
        }
    }
}

fn scoped_api<K>(client: &Client, scope: &NamespaceScope) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match scope {
        NamespaceScope::All => Api::all(client.clone()),
        NamespaceScope::Named(namespace) => Api::namespaced(client.clone(), namespace),
    }
}

fn watch<K>(
    api: Api<K>,
    kind: ResourceKind,
    shutdown: &Shutdown,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Cache<K>
where
    K: kube::Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    let (reader, writer) = reflector::store::<K>();
    let synced = Arc::new(AtomicBool::new(false));
    let stopped = Arc::new(AtomicBool::new(false));
    let task_synced = Arc::clone(&synced);
    let task_stopped = Arc::clone(&stopped);
    let shutdown = shutdown.clone();

    tasks.push(tokio::spawn(async move {
        let mut events = watcher(api, WatchConfig::default())
            .default_backoff()
            .reflect(writer)
            .boxed();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.try_next() => match event {
                    Ok(Some(watcher::Event::InitDone)) => {
                        if !task_synced.swap(true, Ordering::AcqRel) {
                            debug!("{kind} cache synced");
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(error) => warn!("watch stream error for {kind}: {error}"),
                },
            }
        }
        task_stopped.store(true, Ordering::Release);
        debug!("{kind} watch stopped");
    }));

    Cache {
        kind,
        reader,
        synced,
        stopped,
    }
}

impl ResourceStore for KubeStore {
    fn has_synced(&self, kind: ResourceKind) -> bool {
        let flag = match kind {
            ResourceKind::Namespaces => &self.namespaces.synced,
            ResourceKind::Nodes => &self.nodes.synced,
            ResourceKind::Pods => &self.pods.synced,
            ResourceKind::PersistentVolumes => &self.persistent_volumes.synced,
            ResourceKind::PersistentVolumeClaims => &self.persistent_volume_claims.synced,
            ResourceKind::Deployments => &self.deployments.synced,
            ResourceKind::DaemonSets => &self.daemon_sets.synced,
            ResourceKind::ReplicaSets => &self.replica_sets.synced,
            ResourceKind::StatefulSets => &self.stateful_sets.synced,
            ResourceKind::Jobs => &self.jobs.synced,
            ResourceKind::CronJobs => &self.cron_jobs.synced,
        };
        flag.load(Ordering::Acquire)
    }

    fn pods(&self) -> StoreResult<Pod> {
        self.pods.list()
    }

    fn nodes(&self) -> StoreResult<Node> {
        self.nodes.list()
    }

    fn node(&self, name: &str) -> Result<Option<Arc<Node>>, StoreError> {
        self.nodes.get(name)
    }

    fn namespaces(&self) -> StoreResult<Namespace> {
        self.namespaces.list()
    }

    fn deployments(&self) -> StoreResult<Deployment> {
        self.deployments.list()
    }

    fn replica_sets(&self) -> StoreResult<ReplicaSet> {
        self.replica_sets.list()
    }

    fn daemon_sets(&self) -> StoreResult<DaemonSet> {
        self.daemon_sets.list()
    }

    fn stateful_sets(&self) -> StoreResult<StatefulSet> {
        self.stateful_sets.list()
    }

    fn jobs(&self) -> StoreResult<Job> {
        self.jobs.list()
    }

    fn cron_jobs(&self) -> StoreResult<CronJob> {
        self.cron_jobs.list()
    }

    fn persistent_volumes(&self) -> StoreResult<PersistentVolume> {
        self.persistent_volumes.list()
    }

    fn persistent_volume_claims(&self) -> StoreResult<PersistentVolumeClaim> {
        self.persistent_volume_claims.list()
    }
}

/// How long one metrics list answers lookups before the next lookup lists again.
const SNAPSHOT_TTL: Duration = Duration::from_secs(1);

type MetricsEntry = fn(&DynamicObject) -> Option<(String, Usage)>;

/// One list of a metrics kind, indexed by object key.
#[derive(Debug)]
struct MetricsSnapshot {
    taken: Instant,
    usage: Result<HashMap<String, Usage>, String>,
}

impl MetricsSnapshot {
    async fn list(api: &Api<DynamicObject>, entry: MetricsEntry) -> Self {
        let usage = match api.list(&ListParams::default()).await {
            Ok(list) => Ok(index_metrics(&list.items, entry)),
            Err(error) => {
                debug!("metrics list failed: {error}");
                Err(error.to_string())
            }
        };
        Self {
            taken: Instant::now(),
            usage,
        }
    }

    fn is_fresh(&self) -> bool {
        self.taken.elapsed() < SNAPSHOT_TTL
    }

    fn lookup(&self, key: &str) -> Result<Usage, MetricsError> {
        match &self.usage {
            Ok(usage) => usage.get(key).copied().ok_or(MetricsError::Unavailable),
            Err(reason) => Err(MetricsError::Transient(reason.clone())),
        }
    }
}

fn index_metrics(objects: &[DynamicObject], entry: MetricsEntry) -> HashMap<String, Usage> {
    objects.iter().filter_map(entry).collect()
}

fn pod_entry(object: &DynamicObject) -> Option<(String, Usage)> {
    let namespace = object.metadata.namespace.as_deref()?;
    let name = object.metadata.name.as_deref()?;
    Some((pod_key(namespace, name), pod_metrics_usage(&object.data)?))
}

fn node_entry(object: &DynamicObject) -> Option<(String, Usage)> {
    let name = object.metadata.name.clone()?;
    Some((name, object.data.get("usage").map(usage_from_value)?))
}

/// `metrics.k8s.io/v1beta1` reader. Availability is decided once by
/// [`KubeMetrics::probe`]. Lookups are answered from a list of the whole kind,
/// taken at most once per [`SNAPSHOT_TTL`].
pub struct KubeMetrics {
    available: bool,
    pods_api: Api<DynamicObject>,
    nodes_api: Api<DynamicObject>,
    pods: AsyncMutex<Option<MetricsSnapshot>>,
    nodes: AsyncMutex<Option<MetricsSnapshot>>,
}

impl KubeMetrics {
    pub async fn probe(client: Client, scope: &NamespaceScope, probe_timeout: Duration) -> Self {
        let pod_gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let node_gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "NodeMetrics");
        let pod_resource = ApiResource::from_gvk_with_plural(&pod_gvk, "pods");
        let node_resource = ApiResource::from_gvk_with_plural(&node_gvk, "nodes");

        let pods_api = match scope {
            NamespaceScope::All => Api::all_with(client.clone(), &pod_resource),
            NamespaceScope::Named(namespace) => {
                Api::namespaced_with(client.clone(), namespace, &pod_resource)
            }
        };
        let nodes_api: Api<DynamicObject> = Api::all_with(client, &node_resource);

        let available = match timeout(probe_timeout, nodes_api.list(&ListParams::default().limit(1))).await {
            Ok(Ok(_)) => {
                info!("metrics API available");
                true
            }
            Ok(Err(error)) => {
                info!("metrics API unavailable: {error}");
                false
            }
            Err(_) => {
                info!("metrics API probe timed out after {}s", probe_timeout.as_secs());
                false
            }
        };

        Self {
            available,
            pods_api,
            nodes_api,
            pods: AsyncMutex::new(None),
            nodes: AsyncMutex::new(None),
        }
    }

    /// Concurrent callers wait on the slot, so a stale snapshot is listed once.
    async fn lookup(
        slot: &AsyncMutex<Option<MetricsSnapshot>>,
        api: &Api<DynamicObject>,
        entry: MetricsEntry,
        key: &str,
    ) -> Result<Usage, MetricsError> {
        let mut slot = slot.lock().await;
        if let Some(snapshot) = &*slot
            && snapshot.is_fresh()
        {
            return snapshot.lookup(key);
        }
        let snapshot = MetricsSnapshot::list(api, entry).await;
        let result = snapshot.lookup(key);
        *slot = Some(snapshot);
        result
    }
}

#[async_trait]
impl MetricsSource for KubeMetrics {
    fn available(&self) -> bool {
        self.available
    }

    async fn pod_metrics(&self, pod: &PodRef) -> Result<Usage, MetricsError> {
        if !self.available {
            return Err(MetricsError::Unavailable);
        }
        Self::lookup(&self.pods, &self.pods_api, pod_entry, &pod.key()).await
    }

    async fn node_metrics(&self, node: &str) -> Result<Usage, MetricsError> {
        if !self.available {
            return Err(MetricsError::Unavailable);
        }
        Self::lookup(&self.nodes, &self.nodes_api, node_entry, node).await
    }
}

/// Sums container usage. `None` when the sample lists no containers.
fn pod_metrics_usage(data: &Value) -> Option<Usage> {
    let containers = data.get("containers").and_then(Value::as_array)?;
    if containers.is_empty() {
        return None;
    }

    Some(containers.iter().fold(Usage::default(), |total, container| {
        let usage = container
            .get("usage")
            .map(usage_from_value)
            .unwrap_or_default();
        total.saturating_add(usage)
    }))
}

fn usage_from_value(value: &Value) -> Usage {
    Usage {
        cpu_millis: value
            .get("cpu")
            .and_then(Value::as_str)
            .and_then(parse_cpu_millicores)
            .unwrap_or(0),
        memory_bytes: value
            .get("memory")
            .and_then(Value::as_str)
            .and_then(parse_memory_bytes)
            .unwrap_or(0),
    }
}
