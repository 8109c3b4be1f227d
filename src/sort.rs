use std::cmp::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use crate::model::PodView;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SortField {
    Namespace,
    Name,
    Status,
    Age,
    Node,
    Ready,
    Restarts,
    Cpu,
    Memory,
    Ip,
    Volumes,
}

impl SortField {
    pub const ALL: [Self; 11] = [
        Self::Namespace,
        Self::Name,
        Self::Status,
        Self::Age,
        Self::Node,
        Self::Ready,
        Self::Restarts,
        Self::Cpu,
        Self::Memory,
        Self::Ip,
        Self::Volumes,
    ];

    /// Column header for the field in the pods table.
    pub fn title(self) -> &'static str {
        match self {
            Self::Namespace => "NAMESPACE",
            Self::Name => "POD",
            Self::Status => "STATUS",
            Self::Age => "AGE",
            Self::Node => "NODE",
            Self::Ready => "READY",
            Self::Restarts => "RESTARTS",
            Self::Cpu => "CPU",
            Self::Memory => "MEMORY",
            Self::Ip => "IP",
            Self::Volumes => "VOLS",
        }
    }

    /// Maps the letter of a Shift+key sort binding to its field.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'n' => Some(Self::Namespace),
            'p' => Some(Self::Name),
            's' => Some(Self::Status),
            'a' => Some(Self::Age),
            'o' => Some(Self::Node),
            'r' => Some(Self::Ready),
            't' => Some(Self::Restarts),
            'c' => Some(Self::Cpu),
            'm' => Some(Self::Memory),
            'i' => Some(Self::Ip),
            'v' => Some(Self::Volumes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            Self::Ascending => "↑",
            Self::Descending => "↓",
        }
    }
}

/// The active `(field, direction)` for the pods view. Clones share one state.
#[derive(Debug, Clone)]
pub struct SortState {
    inner: Arc<Mutex<(SortField, SortDirection)>>,
}

impl Default for SortState {
    fn default() -> Self {
        Self::new(SortField::Namespace, SortDirection::Ascending)
    }
}

impl SortState {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self {
            inner: Arc::new(Mutex::new((field, direction))),
        }
    }

    pub fn current(&self) -> (SortField, SortDirection) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-selecting the active field flips the direction; any other field
    /// starts ascending.
    pub fn set_field(&self, field: SortField) -> (SortField, SortDirection) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *state = if state.0 == field {
            (field, state.1.flipped())
        } else {
            (field, SortDirection::Ascending)
        };
        *state
    }
}

pub fn sort_pods(items: &mut [PodView], field: SortField, direction: SortDirection) {
    items.sort_by(|left, right| {
        let ordering = compare_field(left, right, field)
            .then_with(|| left.name.cmp(&right.name))
            .then_with(|| left.namespace.cmp(&right.namespace));
        match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

// Ascending order for each field. `Option` orders `None` first, which puts
// pods without metrics ahead in ascending and behind in descending order.
fn compare_field(left: &PodView, right: &PodView, field: SortField) -> Ordering {
    match field {
        SortField::Namespace => left.namespace.cmp(&right.namespace),
        SortField::Name => Ordering::Equal,
        SortField::Status => left.status.cmp(&right.status),
        // older first: earlier creation time sorts ahead
        SortField::Age => left.created_at.cmp(&right.created_at),
        SortField::Node => left.node.cmp(&right.node),
        SortField::Ready => left.ready_ratio().total_cmp(&right.ready_ratio()),
        SortField::Restarts => left.restarts.cmp(&right.restarts),
        SortField::Cpu => left
            .usage
            .map(|usage| usage.cpu_millis)
            .cmp(&right.usage.map(|usage| usage.cpu_millis)),
        SortField::Memory => left
            .usage
            .map(|usage| usage.memory_bytes)
            .cmp(&right.usage.map(|usage| usage.memory_bytes)),
        SortField::Ip => left.ip.cmp(&right.ip),
        SortField::Volumes => left.volumes.cmp(&right.volumes),
    }
}

#[cfg(test)]
mod tests {
    use super::{SortDirection, SortField, SortState, sort_pods};
    use crate::model::{PodView, Usage};

    fn pod(namespace: &str, name: &str, cpu: Option<u64>) -> PodView {
        PodView {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: format!("{namespace}/{name}"),
            usage: cpu.map(|cpu| Usage::new(cpu, cpu * 1024)),
            ..PodView::default()
        }
    }

    fn names(pods: &[PodView]) -> Vec<&str> {
        pods.iter().map(|pod| pod.name.as_str()).collect()
    }

    #[test]
    fn selecting_same_field_flips_direction() {
        let state = SortState::default();
        assert_eq!(
            state.current(),
            (SortField::Namespace, SortDirection::Ascending)
        );
        state.set_field(SortField::Cpu);
        assert_eq!(state.current(), (SortField::Cpu, SortDirection::Ascending));
        state.set_field(SortField::Cpu);
        assert_eq!(state.current(), (SortField::Cpu, SortDirection::Descending));
        state.set_field(SortField::Cpu);
        assert_eq!(state.current(), (SortField::Cpu, SortDirection::Ascending));
    }

    #[test]
    fn selecting_new_field_resets_to_ascending() {
        let state = SortState::new(SortField::Cpu, SortDirection::Descending);
        let handle = state.clone();
        handle.set_field(SortField::Memory);
        assert_eq!(
            state.current(),
            (SortField::Memory, SortDirection::Ascending)
        );
    }

    #[test]
    fn missing_metrics_sort_first_ascending_and_last_descending() {
        let mut pods = vec![
            pod("a", "with-high", Some(300)),
            pod("a", "none-b", None),
            pod("a", "with-low", Some(10)),
            pod("a", "none-a", None),
        ];

        sort_pods(&mut pods, SortField::Cpu, SortDirection::Ascending);
        assert_eq!(names(&pods), ["none-a", "none-b", "with-low", "with-high"]);

        sort_pods(&mut pods, SortField::Memory, SortDirection::Descending);
        assert_eq!(names(&pods), ["with-high", "with-low", "none-b", "none-a"]);
    }

    #[test]
    fn zero_usage_is_not_treated_as_missing() {
        let mut pods = vec![pod("a", "zero", Some(0)), pod("a", "none", None)];
        sort_pods(&mut pods, SortField::Cpu, SortDirection::Ascending);
        assert_eq!(names(&pods), ["none", "zero"]);
    }

    #[test]
    fn sorting_twice_yields_identical_order() {
        let mut pods = vec![
            pod("b", "p3", Some(50)),
            pod("a", "p1", Some(50)),
            pod("a", "p2", Some(50)),
            pod("b", "p1", Some(50)),
        ];
        sort_pods(&mut pods, SortField::Cpu, SortDirection::Ascending);
        let first = pods.clone();
        sort_pods(&mut pods, SortField::Cpu, SortDirection::Ascending);
        assert_eq!(first, pods);
        assert_eq!(
            pods.iter().map(|pod| pod.key.as_str()).collect::<Vec<_>>(),
            ["a/p1", "b/p1", "a/p2", "b/p3"]
        );
    }

    #[test]
    fn descending_reverses_ties_by_name() {
        let mut pods = vec![
            pod("a", "p1", Some(50)),
            pod("a", "p3", Some(50)),
            pod("a", "p2", Some(50)),
        ];
        sort_pods(&mut pods, SortField::Cpu, SortDirection::Descending);
        assert_eq!(names(&pods), ["p3", "p2", "p1"]);
    }

    #[test]
    fn namespace_sort_breaks_ties_by_name() {
        let mut pods = vec![
            pod("kube-system", "dns", None),
            pod("default", "web", None),
            pod("default", "api", None),
        ];
        sort_pods(&mut pods, SortField::Namespace, SortDirection::Ascending);
        assert_eq!(names(&pods), ["api", "web", "dns"]);
    }

    #[test]
    fn age_ascending_lists_oldest_first() {
        let mut old = pod("a", "old", None);
        old.created_at = Some(1_000);
        let mut young = pod("a", "young", None);
        young.created_at = Some(5_000);
        let unknown = pod("a", "unknown", None);
        let mut pods = vec![young, unknown, old];
        sort_pods(&mut pods, SortField::Age, SortDirection::Ascending);
        assert_eq!(names(&pods), ["unknown", "old", "young"]);

        sort_pods(&mut pods, SortField::Age, SortDirection::Descending);
        assert_eq!(names(&pods), ["young", "old", "unknown"]);
    }

    #[test]
    fn sort_keys_map_to_fields() {
        assert_eq!(SortField::from_key('C'), Some(SortField::Cpu));
        assert_eq!(SortField::from_key('t'), Some(SortField::Restarts));
        assert_eq!(SortField::from_key('z'), None);
        assert_eq!(SortField::ALL.len(), 11);
    }
}
