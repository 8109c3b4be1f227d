//! Seams between the refresh layer and the cluster.
//!
//! `ResourceStore` is a read-only view over locally cached objects and never
//! touches the network. `MetricsSource` may, so it is async.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use std::sync::Arc;

use crate::error::{MetricsError, StoreError};
use crate::model::{PodRef, ResourceKind, Usage};

pub type StoreResult<K> = Result<Vec<Arc<K>>, StoreError>;

pub trait ResourceStore: Send + Sync {
    fn has_synced(&self, kind: ResourceKind) -> bool;

    fn pods(&self) -> StoreResult<Pod>;
    fn nodes(&self) -> StoreResult<Node>;
    fn node(&self, name: &str) -> Result<Option<Arc<Node>>, StoreError>;
    fn namespaces(&self) -> StoreResult<Namespace>;
    fn deployments(&self) -> StoreResult<Deployment>;
    fn replica_sets(&self) -> StoreResult<ReplicaSet>;
    fn daemon_sets(&self) -> StoreResult<DaemonSet>;
    fn stateful_sets(&self) -> StoreResult<StatefulSet>;
    fn jobs(&self) -> StoreResult<Job>;
    fn cron_jobs(&self) -> StoreResult<CronJob>;
    fn persistent_volumes(&self) -> StoreResult<PersistentVolume>;
    fn persistent_volume_claims(&self) -> StoreResult<PersistentVolumeClaim>;
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Whether the metrics API answered the startup probe.
    fn available(&self) -> bool;

    /// Usage summed over all containers of the pod.
    async fn pod_metrics(&self, pod: &PodRef) -> Result<Usage, MetricsError>;

    async fn node_metrics(&self, node: &str) -> Result<Usage, MetricsError>;
}
