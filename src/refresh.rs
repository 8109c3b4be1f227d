//! Per-family refresh schedulers.
//!
//! Each family (pods, nodes, summary) runs in its own task: one cycle at start,
//! then one per tick. A cycle builds fresh view models from the cache and the
//! metrics source, records peaks, and hands the collection to the registered
//! callback. Every await inside a cycle is raced against the shared shutdown
//! signal and the cycle deadline.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::{StreamExt, stream};
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, trace, warn};

use crate::builder::{Inventory, build_cluster_summary, build_node_view, build_pod_view, node_allocatable};
use crate::error::{CycleError, MetricsError, StoreError};
use crate::model::{
    ClusterSummaryView, NodeView, PeakKey, PodRef, PodView, ResourceFamily, ResourceKind, Usage,
};
use crate::peaks::PeakTracker;
use crate::redraw::RedrawSignal;
use crate::sort::{SortDirection, SortField, SortState, sort_pods};
use crate::source::{MetricsSource, ResourceStore, StoreResult};

pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(5);
/// Metrics lookups in flight per cycle.
const METRICS_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Intervals {
    pub pods: Duration,
    pub nodes: Duration,
    pub summary: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            pods: Duration::from_secs(3),
            nodes: Duration::from_secs(5),
            summary: Duration::from_secs(5),
        }
    }
}

impl Intervals {
    pub fn get(&self, family: ResourceFamily) -> Duration {
        match family {
            ResourceFamily::Pods => self.pods,
            ResourceFamily::Nodes => self.nodes,
            ResourceFamily::Summary => self.summary,
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of the process-wide stop signal. Dropping the trigger counts
/// as a shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Bounds one refresh cycle by a deadline and the shutdown signal.
#[derive(Debug, Clone)]
pub struct CycleGuard {
    deadline: Instant,
    shutdown: Shutdown,
}

impl CycleGuard {
    pub fn new(timeout: Duration, shutdown: Shutdown) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            shutdown,
        }
    }

    pub fn check(&self) -> Result<(), CycleError> {
        if self.shutdown.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(CycleError::TimedOut);
        }
        Ok(())
    }

    pub async fn run<F>(&self, future: F) -> Result<F::Output, CycleError>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CycleError::Cancelled),
            _ = sleep_until(self.deadline) => Err(CycleError::TimedOut),
            output = future => Ok(output),
        }
    }
}

#[derive(Debug)]
enum BuildError<T> {
    Cancelled,
    TimedOut { partial: T },
    Store(StoreError),
}

impl<T> From<StoreError> for BuildError<T> {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

fn interrupted<T>(error: CycleError, partial: T) -> BuildError<T> {
    match error {
        CycleError::Cancelled => BuildError::Cancelled,
        CycleError::TimedOut => BuildError::TimedOut { partial },
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CycleOutcome {
    Delivered { count: usize },
    Partial { count: usize },
    TimedOut,
    Cancelled,
    Failed(String),
}

impl Display for CycleOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delivered { count } => write!(f, "delivered {count}"),
            Self::Partial { count } => write!(f, "partial {count}"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

pub type OnRefresh<T> = Arc<dyn Fn(T) + Send + Sync>;

pub struct Controller {
    store: Arc<dyn ResourceStore>,
    metrics: Arc<dyn MetricsSource>,
    peaks: Arc<PeakTracker>,
    sort: SortState,
    intervals: Intervals,
    cycle_timeout: Duration,
    on_pods: Option<OnRefresh<Vec<PodView>>>,
    on_nodes: Option<OnRefresh<Vec<NodeView>>>,
    on_summary: Option<OnRefresh<ClusterSummaryView>>,
}

impl Controller {
    pub fn new(store: Arc<dyn ResourceStore>, metrics: Arc<dyn MetricsSource>) -> Self {
        Self {
            store,
            metrics,
            peaks: Arc::new(PeakTracker::new()),
            sort: SortState::default(),
            intervals: Intervals::default(),
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            on_pods: None,
            on_nodes: None,
            on_summary: None,
        }
    }

    pub fn with_intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    pub fn with_sort(mut self, sort: SortState) -> Self {
        self.sort = sort;
        self
    }

    pub fn on_pods(mut self, callback: impl Fn(Vec<PodView>) + Send + Sync + 'static) -> Self {
        self.on_pods = Some(Arc::new(callback));
        self
    }

    pub fn on_nodes(mut self, callback: impl Fn(Vec<NodeView>) + Send + Sync + 'static) -> Self {
        self.on_nodes = Some(Arc::new(callback));
        self
    }

    pub fn on_summary(
        mut self,
        callback: impl Fn(ClusterSummaryView) + Send + Sync + 'static,
    ) -> Self {
        self.on_summary = Some(Arc::new(callback));
        self
    }

    pub fn peaks(&self) -> &PeakTracker {
        &self.peaks
    }

    /// Spawns one scheduler task per family. Each runs until `shutdown` fires.
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> SchedulerSet {
        SchedulerSet {
            pods: self.spawn_scheduler(ResourceFamily::Pods, shutdown.clone()),
            nodes: self.spawn_scheduler(ResourceFamily::Nodes, shutdown.clone()),
            summary: self.spawn_scheduler(ResourceFamily::Summary, shutdown),
        }
    }

    fn spawn_scheduler(self: &Arc<Self>, family: ResourceFamily, shutdown: Shutdown) -> SchedulerHandle {
        let (force, force_rx) = ForceRefresh::channel();
        let state = Arc::new(AtomicU8::new(SchedulerState::Idle as u8));
        let controller = Arc::clone(self);
        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            controller
                .run_scheduler(family, force_rx, shutdown, task_state)
                .await;
        });
        SchedulerHandle {
            family,
            state,
            force,
            task,
        }
    }

    async fn run_scheduler(
        &self,
        family: ResourceFamily,
        mut force_rx: mpsc::Receiver<()>,
        shutdown: Shutdown,
        state: Arc<AtomicU8>,
    ) {
        state.store(SchedulerState::Running as u8, Ordering::SeqCst);
        let period = self.intervals.get(family);
        debug!(%family, ?period, "scheduler started");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = force_rx.recv() => {
                    debug!(%family, "forced refresh");
                }
            }
            self.refresh(family, &shutdown).await;
        }

        state.store(SchedulerState::Stopped as u8, Ordering::SeqCst);
        debug!(%family, "scheduler stopped");
    }

    /// Runs one cycle for `family` and delivers the result to its callback.
    pub async fn refresh(&self, family: ResourceFamily, shutdown: &Shutdown) -> CycleOutcome {
        let guard = CycleGuard::new(self.cycle_timeout, shutdown.clone());
        let outcome = match family {
            ResourceFamily::Pods => {
                let (field, direction) = self.sort.current();
                let result = match self.build_pods(&guard).await {
                    Ok(mut pods) => {
                        sort_pods(&mut pods, field, direction);
                        Ok(pods)
                    }
                    Err(BuildError::TimedOut { mut partial }) => {
                        sort_pods(&mut partial, field, direction);
                        Err(BuildError::TimedOut { partial })
                    }
                    Err(error) => Err(error),
                };
                deliver_list(family, result, self.on_pods.as_ref())
            }
            ResourceFamily::Nodes => {
                let result = self.build_nodes(&guard).await;
                deliver_list(family, result, self.on_nodes.as_ref())
            }
            ResourceFamily::Summary => {
                let result = self.build_summary(&guard).await;
                deliver_summary(result, self.on_summary.as_ref())
            }
        };

        match &outcome {
            CycleOutcome::Failed(reason) => warn!("{family} refresh failed: {reason}"),
            CycleOutcome::TimedOut => warn!("{family} refresh timed out with nothing to show"),
            CycleOutcome::Partial { count } => {
                warn!("{family} refresh timed out, delivered {count} partial items")
            }
            outcome => debug!(%family, %outcome, peaks = self.peaks.len(), "refresh cycle"),
        }
        outcome
    }

    async fn build_pods(&self, guard: &CycleGuard) -> Result<Vec<PodView>, BuildError<Vec<PodView>>> {
        guard
            .check()
            .map_err(|error| interrupted(error, Vec::new()))?;
        let pods = self.store.pods()?;
        let metrics_on = self.metrics.available();

        let node_usage = if metrics_on {
            let hosts = pods
                .iter()
                .map(|pod| host_of(pod))
                .filter(|name| !name.is_empty())
                .collect::<HashSet<_>>();
            guard
                .run(self.node_usage(hosts))
                .await
                .map_err(|error| interrupted(error, Vec::new()))?
        } else {
            HashMap::new()
        };

        let refs = pods
            .iter()
            .map(|pod| PodRef {
                namespace: pod.metadata.namespace.clone().unwrap_or_default(),
                name: pod.metadata.name.clone().unwrap_or_default(),
            })
            .collect::<Vec<_>>();
        // Ordered, so a timeout still leaves a prefix of the pod list.
        let mut samples = stream::iter(&refs)
            .map(|pod_ref| self.metrics.pod_metrics(pod_ref))
            .buffered(METRICS_CONCURRENCY)
            .boxed();

        let mut node_alloc = HashMap::<&str, Option<Usage>>::new();
        let mut views = Vec::with_capacity(pods.len());
        for (pod, pod_ref) in pods.iter().zip(&refs) {
            let usage = if metrics_on {
                match guard.run(samples.next()).await {
                    Ok(Some(result)) => sample(result, pod_ref.key()),
                    Ok(None) => None,
                    Err(error) => return Err(interrupted(error, views)),
                }
            } else {
                None
            };

            let node_name = host_of(pod);
            let host_usage = node_usage.get(node_name).copied().flatten();
            let allocatable = *node_alloc
                .entry(node_name)
                .or_insert_with(|| self.host_allocatable(node_name));

            let mut view = build_pod_view(pod, usage, host_usage, allocatable);
            view.peak = self.track(&PeakKey::pod(&view.namespace, &view.name), usage);
            views.push(view);
        }
        Ok(views)
    }

    async fn build_nodes(&self, guard: &CycleGuard) -> Result<Vec<NodeView>, BuildError<Vec<NodeView>>> {
        guard
            .check()
            .map_err(|error| interrupted(error, Vec::new()))?;
        let nodes = self.store.nodes()?;
        let pods = self
            .store
            .pods()?
            .iter()
            .map(|pod| build_pod_view(pod, None, None, None))
            .collect::<Vec<_>>();
        let metrics_on = self.metrics.available();

        let names = nodes
            .iter()
            .map(|node| node.metadata.name.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        let mut samples = stream::iter(&names)
            .map(|name| self.metrics.node_metrics(name))
            .buffered(METRICS_CONCURRENCY)
            .boxed();

        let mut views = Vec::with_capacity(nodes.len());
        for (node, name) in nodes.iter().zip(&names) {
            let usage = if metrics_on {
                match guard.run(samples.next()).await {
                    Ok(Some(result)) => sample(result, name),
                    Ok(None) => None,
                    Err(error) => return Err(interrupted(error, views)),
                }
            } else {
                None
            };

            let mut view = build_node_view(node, usage, &pods);
            view.peak = self.track(&PeakKey::node(name), usage);
            views.push(view);
        }
        Ok(views)
    }

    async fn build_summary(
        &self,
        guard: &CycleGuard,
    ) -> Result<ClusterSummaryView, BuildError<ClusterSummaryView>> {
        guard
            .check()
            .map_err(|error| interrupted(error, ClusterSummaryView::default()))?;
        let store = self.store.as_ref();
        let inventory = Inventory {
            nodes: store.nodes()?,
            pods: store.pods()?,
            namespaces: store.namespaces()?.len(),
            deployments: self.optional(ResourceKind::Deployments, || store.deployments()),
            replica_sets: self.optional(ResourceKind::ReplicaSets, || store.replica_sets()),
            daemon_sets: self.optional(ResourceKind::DaemonSets, || store.daemon_sets()),
            stateful_sets: self.optional(ResourceKind::StatefulSets, || store.stateful_sets()),
            jobs: self.optional(ResourceKind::Jobs, || store.jobs()),
            cron_jobs: self.optional(ResourceKind::CronJobs, || store.cron_jobs()),
            persistent_volumes: self
                .optional(ResourceKind::PersistentVolumes, || store.persistent_volumes()),
            persistent_volume_claims: self.optional(ResourceKind::PersistentVolumeClaims, || {
                store.persistent_volume_claims()
            }),
        };

        let metrics_on = self.metrics.available();
        let mut summary = build_cluster_summary(&inventory, None, metrics_on);
        summary.peak = self.peaks.peak(&PeakKey::Cluster);
        if !metrics_on {
            return Ok(summary);
        }

        let names = inventory
            .nodes
            .iter()
            .filter_map(|node| node.metadata.name.as_deref())
            .collect::<Vec<_>>();
        let samples = match guard.run(self.node_usage(names)).await {
            Ok(samples) => samples,
            Err(error) => return Err(interrupted(error, summary)),
        };
        let total = samples
            .into_values()
            .flatten()
            .reduce(Usage::saturating_add);

        summary.usage = total;
        summary.peak = self.track(&PeakKey::Cluster, total);
        Ok(summary)
    }

    /// Fetches node usage for every name, at most `METRICS_CONCURRENCY` at a time.
    async fn node_usage<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str, IntoIter: Send>,
    ) -> HashMap<&'a str, Option<Usage>> {
        stream::iter(names)
            .map(|name| async move { (name, sample(self.metrics.node_metrics(name).await, name)) })
            .buffer_unordered(METRICS_CONCURRENCY)
            .boxed()
            .collect()
            .await
    }

    /// Lists a non-core kind, or `None` while it is unsynced or unreadable.
    fn optional<K>(&self, kind: ResourceKind, list: impl FnOnce() -> StoreResult<K>) -> Option<Vec<Arc<K>>> {
        if !self.store.has_synced(kind) {
            return None;
        }
        match list() {
            Ok(items) => Some(items),
            Err(error) => {
                debug!("summary skipped {kind}: {error}");
                None
            }
        }
    }

    fn host_allocatable(&self, node_name: &str) -> Option<Usage> {
        if node_name.is_empty() {
            return None;
        }
        match self.store.node(node_name) {
            Ok(node) => node.map(|node| node_allocatable(&node)),
            Err(error) => {
                debug!("node {node_name} lookup failed: {error}");
                None
            }
        }
    }

    /// Records a fresh sample, or reads the existing record when there is none.
    fn track(&self, key: &PeakKey, usage: Option<Usage>) -> Option<Usage> {
        match usage {
            Some(usage) => Some(self.peaks.record(key, usage)),
            None => self.peaks.peak(key),
        }
    }
}

fn host_of(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .unwrap_or_default()
}

fn sample(result: Result<Usage, MetricsError>, key: impl Display) -> Option<Usage> {
    match result {
        Ok(usage) => Some(usage),
        Err(MetricsError::Unavailable) => {
            trace!("no metrics for {key}");
            None
        }
        Err(MetricsError::Transient(reason)) => {
            debug!("metrics for {key} failed: {reason}");
            None
        }
    }
}

fn deliver_list<T>(
    family: ResourceFamily,
    result: Result<Vec<T>, BuildError<Vec<T>>>,
    callback: Option<&OnRefresh<Vec<T>>>,
) -> CycleOutcome {
    let deliver = |items: Vec<T>| {
        if let Some(callback) = callback {
            callback(items);
        }
    };
    match result {
        Ok(items) => {
            let count = items.len();
            deliver(items);
            CycleOutcome::Delivered { count }
        }
        Err(BuildError::TimedOut { partial }) if !partial.is_empty() => {
            let count = partial.len();
            deliver(partial);
            CycleOutcome::Partial { count }
        }
        Err(BuildError::TimedOut { .. }) => CycleOutcome::TimedOut,
        Err(BuildError::Cancelled) => {
            trace!("{family} cycle cancelled");
            CycleOutcome::Cancelled
        }
        Err(BuildError::Store(error)) => CycleOutcome::Failed(error.to_string()),
    }
}

fn deliver_summary(
    result: Result<ClusterSummaryView, BuildError<ClusterSummaryView>>,
    callback: Option<&OnRefresh<ClusterSummaryView>>,
) -> CycleOutcome {
    let deliver = |summary: ClusterSummaryView| {
        if let Some(callback) = callback {
            callback(summary);
        }
    };
    match result {
        Ok(summary) => {
            deliver(summary);
            CycleOutcome::Delivered { count: 1 }
        }
        Err(BuildError::TimedOut { partial }) => {
            deliver(partial);
            CycleOutcome::Partial { count: 1 }
        }
        Err(BuildError::Cancelled) => CycleOutcome::Cancelled,
        Err(BuildError::Store(error)) => CycleOutcome::Failed(error.to_string()),
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Requests one extra cycle. At most one request is pending; extra requests
/// are dropped.
#[derive(Debug, Clone)]
pub struct ForceRefresh {
    tx: mpsc::Sender<()>,
}

impl ForceRefresh {
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Returns false when a request was already pending or the scheduler is gone.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

#[derive(Debug)]
pub struct SchedulerHandle {
    family: ResourceFamily,
    state: Arc<AtomicU8>,
    force: ForceRefresh,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn force(&self) -> ForceRefresh {
        self.force.clone()
    }

    pub async fn join(self) {
        if let Err(error) = self.task.await {
            warn!("{} scheduler task failed: {error}", self.family);
        }
    }
}

#[derive(Debug)]
pub struct SchedulerSet {
    pub pods: SchedulerHandle,
    pub nodes: SchedulerHandle,
    pub summary: SchedulerHandle,
}

impl SchedulerSet {
    pub async fn join(self) {
        self.pods.join().await;
        self.nodes.join().await;
        self.summary.join().await;
    }
}

/// Applies a sort key press: update the sort, re-run the pod cycle, redraw.
#[derive(Debug, Clone)]
pub struct SortTrigger {
    sort: SortState,
    force: ForceRefresh,
    redraw: RedrawSignal,
}

impl SortTrigger {
    pub fn new(sort: SortState, force: ForceRefresh, redraw: RedrawSignal) -> Self {
        Self {
            sort,
            force,
            redraw,
        }
    }

    pub fn trigger(&self, field: SortField) -> (SortField, SortDirection) {
        let current = self.sort.set_field(field);
        if !self.force.request() {
            trace!("pod refresh already pending");
        }
        self.redraw.request();
        current
    }
}
