use crate::input::Action;
use crate::model::{
    ClusterSummaryView, NamespaceScope, NodeView, PodView, Refreshed, ResourceFamily,
};
use crate::refresh::Intervals;
use crate::sort::{SortDirection, SortField, SortState};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    None,
    Sort(SortField),
}

/// Latest view models delivered by the refresh schedulers.
#[derive(Debug, Clone, Default)]
pub struct Views {
    pub pods: Vec<PodView>,
    pub nodes: Vec<NodeView>,
    pub summary: Option<ClusterSummaryView>,
    pub updated: HashMap<ResourceFamily, DateTime<Local>>,
}

impl Views {
    pub fn apply(&mut self, refreshed: Refreshed) {
        self.updated.insert(refreshed.family(), Local::now());
        match refreshed {
            Refreshed::Pods(pods) => self.pods = pods,
            Refreshed::Nodes(nodes) => self.nodes = nodes,
            Refreshed::Summary(summary) => self.summary = Some(summary),
        }
    }
}

/// Hand-off point between scheduler callbacks and the render loop.
#[derive(Debug, Clone, Default)]
pub struct SharedViews {
    inner: Arc<Mutex<Views>>,
}

impl SharedViews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, refreshed: Refreshed) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(refreshed);
    }

    pub fn snapshot(&self) -> Views {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct App {
    running: bool,
    status: String,
    cluster: String,
    context: String,
    user: String,
    namespace_scope: NamespaceScope,
    metrics_available: bool,
    intervals: Intervals,
    sort: SortState,
    views: Views,
    selected: usize,
    table_page_size: usize,
}

impl App {
    pub fn new(
        cluster: String,
        context: String,
        user: String,
        namespace_scope: NamespaceScope,
        sort: SortState,
    ) -> Self {
        Self {
            running: true,
            status: "Waiting for first refresh".to_string(),
            cluster,
            context,
            user,
            namespace_scope,
            metrics_available: false,
            intervals: Intervals::default(),
            sort,
            views: Views::default(),
            selected: 0,
            table_page_size: 10,
        }
    }

    pub fn with_intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_metrics_available(mut self, available: bool) -> Self {
        self.metrics_available = available;
        self
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
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

    pub fn namespace_scope(&self) -> &NamespaceScope {
        &self.namespace_scope
    }

    pub fn metrics_available(&self) -> bool {
        self.metrics_available
    }

    pub fn intervals(&self) -> Intervals {
        self.intervals
    }

    pub fn sort(&self) -> (SortField, SortDirection) {
        self.sort.current()
    }

    pub fn views(&self) -> &Views {
        &self.views
    }

    pub fn selected_index(&self) -> Option<usize> {
        if self.views.pods.is_empty() {
            None
        } else {
            Some(self.selected)
        }
    }

    pub fn set_table_page_size(&mut self, rows: usize) {
        self.table_page_size = rows.max(1);
    }

    /// Replaces the displayed views and keeps the selection inside the list.
    pub fn sync_views(&mut self, views: Views) {
        self.views = views;
        self.clamp_selection();
        if let Some(updated) = self.views.updated.values().max() {
            self.status = format!("Updated {}", updated.format("%H:%M:%S"));
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::Down => {
                self.move_selection(1);
                AppCommand::None
            }
            Action::Up => {
                self.move_selection(-1);
                AppCommand::None
            }
            Action::PageDown => {
                self.move_selection(self.table_page_size as isize);
                AppCommand::None
            }
            Action::PageUp => {
                self.move_selection(-(self.table_page_size as isize));
                AppCommand::None
            }
            Action::Top => {
                self.selected = 0;
                AppCommand::None
            }
            Action::Bottom => {
                self.selected = self.views.pods.len().saturating_sub(1);
                AppCommand::None
            }
            Action::Sort(field) => AppCommand::Sort(field),
        }
    }

    /// Records the sort state returned by the sort trigger.
    pub fn sort_applied(&mut self, field: SortField, direction: SortDirection) {
        self.status = format!("Sorting by {} {}", field.title(), direction.arrow());
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.views.pods.len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        let next = self.selected as isize + delta;
        self.selected = next.clamp(0, len as isize - 1) as usize;
    }

    fn clamp_selection(&mut self) {
        self.selected = self.selected.min(self.views.pods.len().saturating_sub(1));
    }
}
