use chrono::Utc;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState};
use std::time::Duration;

use crate::app::App;
use crate::model::{Capacity, ClusterSummaryView, NodeView, PodView, ReadyCount, ResourceFamily};
use crate::quantity::{format_bytes_compact, format_cpu_millicores, format_elapsed_seconds, percent};
use crate::sort::SortField;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const PL_D: Color = Color::Rgb(82, 24, 124);

const NODE_ROWS_MAX: u16 = 8;

pub fn render(frame: &mut Frame, app: &mut App) {
    let node_rows = (app.views().nodes.len() as u16).clamp(1, NODE_ROWS_MAX);
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(6),
            Constraint::Length(node_rows + 3),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_summary(frame, root[1], app);
    render_nodes(frame, root[2], app);
    app.set_table_page_size(table_rows_visible(root[3]));
    render_pods(frame, root[3], app);
    render_footer(frame, root[4], app);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    push_powerline_segment(
        &mut spans,
        format!(" API {} ", display_cluster_endpoint(app.cluster())),
        Color::White,
        PL_A,
        PL_B,
    );
    push_powerline_segment(
        &mut spans,
        format!(" ctx {} ", app.context()),
        Color::White,
        PL_B,
        PL_C,
    );
    push_powerline_segment(
        &mut spans,
        format!(" user {} ", app.user()),
        Color::White,
        PL_C,
        PL_D,
    );
    let (metrics_label, metrics_bg) = if app.metrics_available() {
        (" metrics: connected ", ACCENT)
    } else {
        (" metrics: not connected ", WARN)
    };
    push_powerline_segment(
        &mut spans,
        format!(" ns {} ", app.namespace_scope().label()),
        Color::White,
        PL_D,
        metrics_bg,
    );
    push_powerline_segment(&mut spans, metrics_label, Color::Black, metrics_bg, BG);

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG).fg(Color::White)),
        area,
    );
}

fn panel_block(title: String) -> Block<'static> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .style(Style::default().bg(PANEL))
}

fn refresh_suffix(app: &App, family: ResourceFamily) -> String {
    format!("every {}", format_interval(app.intervals().get(family)))
}

fn render_summary(frame: &mut Frame, area: Rect, app: &App) {
    let block = panel_block(format!(
        " Cluster · {} ",
        refresh_suffix(app, ResourceFamily::Summary)
    ));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(summary) = app.views().summary.as_ref() else {
        frame.render_widget(
            Paragraph::new("Loading cluster summary…").style(Style::default().fg(MUTED)),
            inner,
        );
        return;
    };

    let split = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(inner);

    let lines = summary_lines(summary, Utc::now().timestamp())
        .into_iter()
        .map(|line| Line::from(Span::styled(line, Style::default().fg(Color::White))))
        .collect::<Vec<_>>();
    frame.render_widget(Paragraph::new(lines), split[0]);

    let gauges = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Min(0)])
        .split(split[1]);
    let (cpu, memory) = summary_gauges(summary);
    render_metric_gauge(frame, gauges[0], &cpu);
    render_metric_gauge(frame, gauges[1], &memory);
}

fn summary_lines(summary: &ClusterSummaryView, now: i64) -> Vec<String> {
    let uptime = summary
        .oldest_node_created_at
        .map(|created| format_elapsed_seconds(now.saturating_sub(created)))
        .unwrap_or_else(|| "-".to_string());
    let ready = |count: Option<ReadyCount>| {
        count
            .map(|count| format!("{}/{}", count.ready, count.total))
            .unwrap_or_else(|| "-".to_string())
    };
    let total = |count: Option<usize>| {
        count
            .map(|count| count.to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    vec![
        format!(
            "uptime {uptime}  nodes {}/{}  pods {}/{}  namespaces {}",
            summary.nodes.ready,
            summary.nodes.total,
            summary.pods.ready,
            summary.pods.total,
            summary.namespaces,
        ),
        format!(
            "deploy {}  rs {}  ds {}  sts {}",
            ready(summary.deployments),
            ready(summary.replica_sets),
            ready(summary.daemon_sets),
            ready(summary.stateful_sets),
        ),
        format!(
            "jobs {}  cronjobs {}  images {}",
            total(summary.jobs),
            total(summary.cron_jobs),
            summary.container_images,
        ),
        format!(
            "pv {} ({})  pvc {} ({})",
            total(summary.persistent_volumes),
            format_bytes_compact(summary.persistent_volume_bytes),
            total(summary.persistent_volume_claims),
            format_bytes_compact(summary.persistent_volume_claim_bytes),
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GaugeBar {
    label: &'static str,
    value: String,
    percent: u64,
    color: Color,
}

fn summary_gauges(summary: &ClusterSummaryView) -> (GaugeBar, GaugeBar) {
    let (used, basis) = match summary.usage {
        Some(usage) => (usage, "used"),
        None => (summary.requested, "requested"),
    };
    let bar = |label, used: u64, total: u64, format: fn(u64) -> String| {
        let percent = percent(used, total).unwrap_or(0);
        GaugeBar {
            label,
            value: format!("{}/{} {basis}", format(used), format(total)),
            percent,
            color: load_color(percent),
        }
    };
    (
        bar(
            "CPU",
            used.cpu_millis,
            summary.allocatable.cpu_millis,
            format_cpu_millicores,
        ),
        bar(
            "MEM",
            used.memory_bytes,
            summary.allocatable.memory_bytes,
            format_bytes_compact,
        ),
    )
}

fn load_color(percent: u64) -> Color {
    if percent >= 90 {
        ERROR
    } else if percent >= 70 {
        WARN
    } else {
        ACCENT
    }
}

fn render_metric_gauge(frame: &mut Frame, area: Rect, bar: &GaugeBar) {
    if area.height == 0 || area.width == 0 {
        return;
    }

    let split = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let percent = bar.percent.min(100);
    let label = format!("{} {}", bar.label, bar.value);
    let text = Paragraph::new(compact_text(
        &label,
        split[0].width.saturating_sub(1).max(1) as usize,
    ))
    .style(Style::default().fg(Color::Rgb(94, 234, 212)));
    frame.render_widget(text, split[0]);

    let bar_width = split[1].width as usize;
    if bar_width == 0 {
        return;
    }

    let mut filled = bar_width.saturating_mul(percent as usize) / 100;
    if percent > 0 && filled == 0 {
        filled = 1;
    }
    let meter_chars = format!("{percent:>3}%").chars().collect::<Vec<_>>();
    let text_start = bar_width.saturating_sub(meter_chars.len()) / 2;
    let text_end = text_start.saturating_add(meter_chars.len());

    let spans = (0..bar_width)
        .map(|idx| {
            let is_filled = idx < filled;
            let bg = if is_filled {
                bar.color
            } else {
                Color::Rgb(30, 41, 59)
            };
            let fg = if is_filled {
                BG
            } else {
                Color::Rgb(148, 163, 184)
            };
            let is_text_cell = idx >= text_start && idx < text_end;
            let ch = if is_text_cell {
                meter_chars[idx - text_start]
            } else {
                ' '
            };
            let mut style = Style::default().fg(fg).bg(bg);
            if is_text_cell {
                style = style.add_modifier(Modifier::BOLD);
            }
            Span::styled(ch.to_string(), style)
        })
        .collect::<Vec<_>>();
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(PANEL)),
        split[1],
    );
}

fn header_row(headers: Vec<String>) -> Row<'static> {
    Row::new(headers.into_iter().map(|header| {
        Cell::from(header).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT))
}

fn render_nodes(frame: &mut Frame, area: Rect, app: &App) {
    let nodes = &app.views().nodes;
    let now = Utc::now().timestamp();
    let headers = ["NAME", "STATUS", "ROLES", "AGE", "VERSION", "PODS", "CPU", "MEMORY"]
        .map(str::to_string)
        .to_vec();
    let rows = nodes.iter().map(|node| {
        let status_color = if node.is_ready() { ACCENT } else { ERROR };
        Row::new(vec![
            Cell::from(node.name.clone()),
            Cell::from(node.status.clone()).style(Style::default().fg(status_color)),
            Cell::from(node.roles.clone()),
            Cell::from(age_cell(node.created_at, now)),
            Cell::from(node.kubelet_version.clone()),
            Cell::from(node.pods.to_string()),
            Cell::from(node_ratio_cell(node, true, app.metrics_available())),
            Cell::from(node_ratio_cell(node, false, app.metrics_available())),
        ])
        .style(Style::default().fg(Color::White))
    });

    let constraints = [
        Constraint::Percentage(20),
        Constraint::Percentage(8),
        Constraint::Percentage(10),
        Constraint::Percentage(6),
        Constraint::Percentage(10),
        Constraint::Percentage(6),
        Constraint::Percentage(20),
        Constraint::Percentage(20),
    ];
    let table = Table::new(rows, constraints)
        .header(header_row(headers))
        .block(panel_block(format!(
            " Nodes ({}) · {} ",
            nodes.len(),
            refresh_suffix(app, ResourceFamily::Nodes)
        )))
        .column_spacing(1);
    frame.render_widget(table, area);
}

fn render_pods(frame: &mut Frame, area: Rect, app: &App) {
    let pods = &app.views().pods;
    let now = Utc::now().timestamp();
    let (sort_field, sort_direction) = app.sort();
    let headers = SortField::ALL
        .iter()
        .map(|field| {
            if *field == sort_field {
                format!("{}{}", field.title(), sort_direction.arrow())
            } else {
                field.title().to_string()
            }
        })
        .collect::<Vec<_>>();

    let rows = pods.iter().map(|pod| {
        Row::new(vec![
            Cell::from(pod.namespace.clone()),
            Cell::from(pod.name.clone()),
            Cell::from(pod.status.clone()).style(Style::default().fg(pod_status_color(pod))),
            Cell::from(age_cell(pod.created_at, now)),
            Cell::from(pod.node.clone()),
            Cell::from(format!("{}/{}", pod.ready_containers, pod.total_containers)),
            Cell::from(pod.restarts.to_string()),
            Cell::from(pod_ratio_cell(pod, true, app.metrics_available())),
            Cell::from(pod_ratio_cell(pod, false, app.metrics_available())),
            Cell::from(pod.ip.clone()),
            Cell::from(format!("{}/{}", pod.volumes, pod.volume_mounts)),
        ])
        .style(Style::default().fg(Color::White))
    });

    let constraints = [
        Constraint::Percentage(10),
        Constraint::Percentage(17),
        Constraint::Percentage(8),
        Constraint::Percentage(5),
        Constraint::Percentage(10),
        Constraint::Percentage(5),
        Constraint::Percentage(5),
        Constraint::Percentage(14),
        Constraint::Percentage(14),
        Constraint::Percentage(8),
        Constraint::Percentage(4),
    ];
    let table = Table::new(rows, constraints)
        .header(header_row(headers))
        .block(panel_block(format!(
            " Pods ({}) · sort {} {} · {} ",
            pods.len(),
            sort_field.title(),
            sort_direction.arrow(),
            refresh_suffix(app, ResourceFamily::Pods)
        )))
        .column_spacing(1)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut state = TableState::default();
    state.select(app.selected_index());
    frame.render_stateful_widget(table, area, &mut state);
}

fn pod_status_color(pod: &PodView) -> Color {
    match pod.status.as_str() {
        "Running" | "Succeeded" | "Completed" => ACCENT,
        "Pending" | "ContainerCreating" | "PodInitializing" => WARN,
        _ => ERROR,
    }
}

fn age_cell(created_at: Option<i64>, now: i64) -> String {
    created_at
        .map(|created| format_elapsed_seconds(now.saturating_sub(created).max(0)))
        .unwrap_or_else(|| "-".to_string())
}

/// Formats `used/capacity pct%` plus the peak. A `*` marks node allocatable
/// standing in for a missing limit.
fn ratio_cell(
    used: Option<u64>,
    capacity: Capacity,
    peak: Option<u64>,
    metrics_available: bool,
    format: fn(u64) -> String,
) -> String {
    if !metrics_available {
        return "unavailable".to_string();
    }
    let Some(used) = used else {
        return "n/a".to_string();
    };

    let mut out = match capacity.value() {
        Some(total) => {
            let marker = if capacity.is_fallback() { "*" } else { "" };
            let pct = percent(used, total).unwrap_or(0);
            format!("{}/{}{marker} {pct}%", format(used), format(total))
        }
        None => format(used),
    };
    if let Some(peak) = peak {
        out.push_str(&format!(" ^{}", format(peak)));
    }
    out
}

fn pod_ratio_cell(pod: &PodView, cpu: bool, metrics_available: bool) -> String {
    if cpu {
        ratio_cell(
            pod.usage.map(|usage| usage.cpu_millis),
            pod.cpu_capacity(),
            pod.peak.map(|peak| peak.cpu_millis),
            metrics_available,
            format_cpu_millicores,
        )
    } else {
        ratio_cell(
            pod.usage.map(|usage| usage.memory_bytes),
            pod.memory_capacity(),
            pod.peak.map(|peak| peak.memory_bytes),
            metrics_available,
            format_bytes_compact,
        )
    }
}

fn node_ratio_cell(node: &NodeView, cpu: bool, metrics_available: bool) -> String {
    let capacity = |value: u64| {
        if value > 0 {
            Capacity::Limit(value)
        } else {
            Capacity::Unknown
        }
    };
    if cpu {
        ratio_cell(
            node.usage.map(|usage| usage.cpu_millis),
            capacity(node.allocatable.cpu_millis),
            node.peak.map(|peak| peak.cpu_millis),
            metrics_available,
            format_cpu_millicores,
        )
    } else {
        ratio_cell(
            node.usage.map(|usage| usage.memory_bytes),
            capacity(node.allocatable.memory_bytes),
            node.peak.map(|peak| peak.memory_bytes),
            metrics_available,
            format_bytes_compact,
        )
    }
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(app.status(), 48)),
        Color::White,
        PL_B,
        BG,
    );
    spans.push(Span::styled(
        " q quit  ↑↓ PgUp/PgDn Home/End scroll  Shift+N/P/S/A/O/R/T/C/M/I/V sort",
        Style::default().fg(MUTED).bg(BG),
    ));
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn table_rows_visible(area: Rect) -> usize {
    area.height.saturating_sub(3).max(1) as usize
}

fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn display_cluster_endpoint(cluster: &str) -> String {
    let trimmed = cluster.trim().trim_end_matches('/');
    trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{
        display_cluster_endpoint, pod_ratio_cell, render, summary_gauges, summary_lines,
    };
    use crate::app::{App, SharedViews};
    use crate::model::{ClusterSummaryView, NamespaceScope, PodView, ReadyCount, Refreshed, Usage};
    use crate::sort::{SortDirection, SortField, SortState};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn ratio_uses_limit_or_marks_node_fallback() {
        let limited = PodView {
            limit: Usage::new(500, 0),
            usage: Some(Usage::new(250, 0)),
            ..PodView::default()
        };
        assert_eq!(pod_ratio_cell(&limited, true, true), "250m/500m 50%");

        let fallback = PodView {
            node_allocatable: Some(Usage::new(2000, 0)),
            usage: Some(Usage::new(500, 0)),
            peak: Some(Usage::new(900, 0)),
            ..PodView::default()
        };
        assert_eq!(
            pod_ratio_cell(&fallback, true, true),
            "500m/2c* 25% ^900m"
        );
    }

    #[test]
    fn missing_metrics_render_as_na_or_unavailable() {
        let pod = PodView::default();
        assert_eq!(pod_ratio_cell(&pod, true, true), "n/a");
        assert_eq!(pod_ratio_cell(&pod, false, false), "unavailable");
    }

    #[test]
    fn gauges_fall_back_to_requested_without_usage() {
        let summary = ClusterSummaryView {
            requested: Usage::new(1000, 0),
            allocatable: Usage::new(4000, 1024),
            ..ClusterSummaryView::default()
        };
        let (cpu, _) = summary_gauges(&summary);
        assert_eq!(cpu.percent, 25);
        assert!(cpu.value.ends_with("requested"));

        let summary = ClusterSummaryView {
            usage: Some(Usage::new(3000, 512)),
            ..summary
        };
        let (cpu, memory) = summary_gauges(&summary);
        assert_eq!(cpu.percent, 75);
        assert_eq!(memory.percent, 50);
        assert!(memory.value.ends_with("used"));
    }

    #[test]
    fn summary_lines_show_dash_for_unsynced_kinds() {
        let summary = ClusterSummaryView {
            oldest_node_created_at: Some(0),
            nodes: ReadyCount { ready: 2, total: 3 },
            deployments: Some(ReadyCount { ready: 1, total: 1 }),
            ..ClusterSummaryView::default()
        };
        let lines = summary_lines(&summary, 2 * 86_400);
        assert!(lines[0].starts_with("uptime 2d  nodes 2/3"));
        assert_eq!(lines[1], "deploy 1/1  rs -  ds -  sts -");
    }

    #[test]
    fn endpoint_drops_scheme() {
        assert_eq!(
            display_cluster_endpoint("https://10.0.0.1:6443/"),
            "10.0.0.1:6443"
        );
    }

    #[test]
    fn renders_header_and_sorted_pods_title() {
        let shared = SharedViews::new();
        shared.apply(Refreshed::Pods(vec![PodView {
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            status: "Running".to_string(),
            ..PodView::default()
        }]));

        let mut app = App::new(
            "https://cluster:6443".to_string(),
            "prod".to_string(),
            "admin".to_string(),
            NamespaceScope::All,
            SortState::new(SortField::Cpu, SortDirection::Descending),
        );
        app.sync_views(shared.snapshot());

        let mut terminal = Terminal::new(TestBackend::new(160, 40)).unwrap();
        terminal.draw(|frame| render(frame, &mut app)).unwrap();

        let text = screen_text(&terminal);
        assert!(text.contains("metrics: not connected"));
        assert!(text.contains("ctx prod"));
        assert!(text.contains("sort CPU ↓"));
        assert!(text.contains("web-0"));
        assert!(text.contains("unavailable"));
    }
}
