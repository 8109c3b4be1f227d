use thiserror::Error;

use crate::model::ResourceKind;

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum MetricsError {
    /// No sample exists, or the metrics API is not served at all.
    #[error("metrics unavailable")]
    Unavailable,
    #[error("metrics request failed: {0}")]
    Transient(String),
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("{0} cache has not synced")]
    NotSynced(ResourceKind),
    #[error("{kind} cache unavailable: {reason}")]
    Unavailable { kind: ResourceKind, reason: String },
}

#[derive(Debug, Clone, Copy, Error, Eq, PartialEq)]
pub enum CycleError {
    #[error("refresh cycle cancelled")]
    Cancelled,
    #[error("refresh cycle deadline exceeded")]
    TimedOut,
}
