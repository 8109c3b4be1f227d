use std::fmt::{Display, Formatter};

/// Kinds of objects held by the resource cache.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Namespaces,
    Nodes,
    Pods,
    PersistentVolumes,
    PersistentVolumeClaims,
    Deployments,
    DaemonSets,
    ReplicaSets,
    StatefulSets,
    Jobs,
    CronJobs,
}

impl ResourceKind {
    /// Kinds that must be synced before the dashboard can start.
    pub const CORE: [Self; 3] = [Self::Namespaces, Self::Nodes, Self::Pods];

    pub const ALL: [Self; 11] = [
        Self::Namespaces,
        Self::Nodes,
        Self::Pods,
        Self::PersistentVolumes,
        Self::PersistentVolumeClaims,
        Self::Deployments,
        Self::DaemonSets,
        Self::ReplicaSets,
        Self::StatefulSets,
        Self::Jobs,
        Self::CronJobs,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Namespaces => "Namespaces",
            Self::Nodes => "Nodes",
            Self::Pods => "Pods",
            Self::PersistentVolumes => "PersistentVolumes",
            Self::PersistentVolumeClaims => "PVC",
            Self::Deployments => "Deployments",
            Self::DaemonSets => "DaemonSets",
            Self::ReplicaSets => "ReplicaSets",
            Self::StatefulSets => "StatefulSets",
            Self::Jobs => "Jobs",
            Self::CronJobs => "CronJobs",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// A family of view models refreshed by one scheduler.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResourceFamily {
    Pods,
    Nodes,
    Summary,
}

impl ResourceFamily {
    pub fn title(self) -> &'static str {
        match self {
            Self::Pods => "pods",
            Self::Nodes => "nodes",
            Self::Summary => "summary",
        }
    }
}

impl Display for ResourceFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl NamespaceScope {
    pub fn label(&self) -> String {
        match self {
            Self::All => "(all)".to_string(),
            Self::Named(namespace) => namespace.clone(),
        }
    }
}

impl Display for NamespaceScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Named(namespace) => write!(f, "{namespace}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum UsageKind {
    Cpu,
    Memory,
}

/// CPU in millicores and memory in bytes.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Usage {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

impl Usage {
    pub fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }

    pub fn get(self, kind: UsageKind) -> u64 {
        match kind {
            UsageKind::Cpu => self.cpu_millis,
            UsageKind::Memory => self.memory_bytes,
        }
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
        }
    }
}

/// Denominator used for a usage ratio.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Capacity {
    /// The entity's own limit.
    Limit(u64),
    /// The host node's allocatable amount, used when no limit is set.
    NodeAllocatable(u64),
    Unknown,
}

impl Capacity {
    pub fn value(self) -> Option<u64> {
        match self {
            Self::Limit(value) | Self::NodeAllocatable(value) => Some(value),
            Self::Unknown => None,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, Self::NodeAllocatable(_))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn key(&self) -> String {
        pod_key(&self.namespace, &self.name)
    }
}

pub fn pod_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Identity of a peak record. Pods, nodes and the cluster total never share
/// a record, whatever their names.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum PeakKey {
    Pod(String),
    Node(String),
    Cluster,
}

impl PeakKey {
    pub fn pod(namespace: &str, name: &str) -> Self {
        Self::Pod(pod_key(namespace, name))
    }

    pub fn node(name: &str) -> Self {
        Self::Node(name.to_string())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PodView {
    pub namespace: String,
    pub name: String,
    pub key: String,
    pub status: String,
    pub node: String,
    pub ip: String,
    pub created_at: Option<i64>,
    pub ready_containers: usize,
    pub total_containers: usize,
    pub restarts: i32,
    pub volumes: usize,
    pub volume_mounts: usize,
    pub requested: Usage,
    pub limit: Usage,
    pub usage: Option<Usage>,
    pub node_allocatable: Option<Usage>,
    pub node_usage: Option<Usage>,
    pub peak: Option<Usage>,
}

impl PodView {
    pub fn cpu_capacity(&self) -> Capacity {
        capacity_for(
            self.limit.cpu_millis,
            self.node_allocatable.map(|alloc| alloc.cpu_millis),
        )
    }

    pub fn memory_capacity(&self) -> Capacity {
        capacity_for(
            self.limit.memory_bytes,
            self.node_allocatable.map(|alloc| alloc.memory_bytes),
        )
    }

    pub fn ready_ratio(&self) -> f64 {
        if self.total_containers == 0 {
            return 0.0;
        }
        self.ready_containers as f64 / self.total_containers as f64
    }
}

fn capacity_for(limit: u64, node_allocatable: Option<u64>) -> Capacity {
    if limit > 0 {
        return Capacity::Limit(limit);
    }
    match node_allocatable {
        Some(value) if value > 0 => Capacity::NodeAllocatable(value),
        _ => Capacity::Unknown,
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct NodeView {
    pub name: String,
    pub status: String,
    pub roles: String,
    pub created_at: Option<i64>,
    pub kubelet_version: String,
    pub os_image: String,
    pub architecture: String,
    pub internal_ip: String,
    pub pods: usize,
    pub container_images: usize,
    pub allocatable: Usage,
    pub capacity: Usage,
    pub requested: Usage,
    pub usage: Option<Usage>,
    pub peak: Option<Usage>,
}

impl NodeView {
    pub fn is_ready(&self) -> bool {
        self.status == "Ready"
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ReadyCount {
    pub ready: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ClusterSummaryView {
    pub oldest_node_created_at: Option<i64>,
    pub nodes: ReadyCount,
    pub pods: ReadyCount,
    pub namespaces: usize,
    pub container_images: usize,
    pub deployments: Option<ReadyCount>,
    pub replica_sets: Option<ReadyCount>,
    pub daemon_sets: Option<ReadyCount>,
    pub stateful_sets: Option<ReadyCount>,
    pub jobs: Option<usize>,
    pub cron_jobs: Option<usize>,
    pub persistent_volumes: Option<usize>,
    pub persistent_volume_bytes: u64,
    pub persistent_volume_claims: Option<usize>,
    pub persistent_volume_claim_bytes: u64,
    pub requested: Usage,
    pub allocatable: Usage,
    pub usage: Option<Usage>,
    pub peak: Option<Usage>,
    pub metrics_available: bool,
}

/// One refreshed collection, tagged by the family that produced it.
#[derive(Debug, Clone)]
pub enum Refreshed {
    Pods(Vec<PodView>),
    Nodes(Vec<NodeView>),
    Summary(ClusterSummaryView),
}

impl Refreshed {
    pub fn family(&self) -> ResourceFamily {
        match self {
            Self::Pods(_) => ResourceFamily::Pods,
            Self::Nodes(_) => ResourceFamily::Nodes,
            Self::Summary(_) => ResourceFamily::Summary,
        }
    }
}
