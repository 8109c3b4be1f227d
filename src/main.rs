mod app;
mod builder;
mod cli;
mod config;
mod error;
mod input;
mod k8s;
mod model;
mod peaks;
mod quantity;
mod redraw;
mod refresh;
mod sort;
mod source;
#[cfg(test)]
mod testing;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppCommand, SharedViews};
use clap::Parser;
use cli::CliArgs;
use config::Settings;
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use futures::StreamExt;
use k8s::{KubeGateway, KubeMetrics, KubeStore};
use model::{NamespaceScope, Refreshed};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use redraw::{RedrawReceiver, RedrawSignal, redraw_channel};
use refresh::{Controller, SortTrigger, shutdown_channel};
use sort::SortState;
use source::MetricsSource;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const METRICS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const UI_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    if let Err(error) = start(args).await {
        eprintln!("ktop: {}", compact_error(&error));
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(io::sink).try_init();
        }
    }

    Ok(())
}

fn resolve_namespace_scope(args: &CliArgs, default_namespace: &str) -> NamespaceScope {
    if args.all_namespaces {
        NamespaceScope::All
    } else if let Some(namespace) = &args.namespace {
        NamespaceScope::Named(namespace.clone())
    } else {
        NamespaceScope::Named(default_namespace.to_string())
    }
}

async fn start(args: CliArgs) -> Result<()> {
    let settings = Settings::load(&args)?;
    if let Some(source) = &settings.source {
        info!("loaded config from {}", source.display());
    }

    let gateway = KubeGateway::connect(args.context.clone()).await?;
    let namespace_scope = resolve_namespace_scope(&args, gateway.default_namespace());
    if args.all_namespaces && args.namespace.is_some() {
        warn!("both --all-namespaces and --namespace were provided, using all namespaces");
    }
    info!(
        context = gateway.context(),
        scope = %namespace_scope,
        "connected to {}",
        gateway.cluster()
    );

    let (shutdown_trigger, shutdown) = shutdown_channel();
    let store = Arc::new(KubeStore::start(gateway.client(), &namespace_scope, &shutdown));
    if let Err(error) = store.wait_for_core(settings.sync_timeout).await {
        shutdown_trigger.shutdown();
        store.join().await;
        return Err(error);
    }
    let metrics = Arc::new(
        KubeMetrics::probe(gateway.client(), &namespace_scope, METRICS_PROBE_TIMEOUT).await,
    );
    let metrics_available = metrics.available();

    let views = SharedViews::new();
    let (redraw, mut redraw_rx) = redraw_channel();
    let sort = SortState::default();

    let controller = Arc::new(
        Controller::new(store.clone(), metrics)
            .with_intervals(settings.intervals)
            .with_cycle_timeout(settings.cycle_timeout)
            .with_sort(sort.clone())
            .on_pods(deliver(&views, &redraw, Refreshed::Pods))
            .on_nodes(deliver(&views, &redraw, Refreshed::Nodes))
            .on_summary(deliver(&views, &redraw, Refreshed::Summary)),
    );
    let schedulers = controller.start(shutdown.clone());
    let sort_trigger = SortTrigger::new(sort.clone(), schedulers.pods.force(), redraw.clone());

    let mut app = App::new(
        gateway.cluster().to_string(),
        gateway.context().to_string(),
        gateway.user().to_string(),
        namespace_scope,
        sort,
    )
    .with_intervals(settings.intervals)
    .with_metrics_available(metrics_available);

    let result = run(&mut app, &views, &mut redraw_rx, &sort_trigger).await;

    shutdown_trigger.shutdown();
    schedulers.join().await;
    store.join().await;
    debug!("dropped {} coalesced redraw requests", redraw.dropped());
    result
}

/// Builds a scheduler callback that publishes the views and asks for a redraw.
fn deliver<T: 'static>(
    views: &SharedViews,
    redraw: &RedrawSignal,
    wrap: fn(T) -> Refreshed,
) -> impl Fn(T) + Send + Sync + 'static {
    let views = views.clone();
    let redraw = redraw.clone();
    move |items| {
        views.apply(wrap(items));
        redraw.request();
    }
}

async fn run(
    app: &mut App,
    views: &SharedViews,
    redraw_rx: &mut RedrawReceiver,
    sort_trigger: &SortTrigger,
) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, views, redraw_rx, sort_trigger).await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    views: &SharedViews,
    redraw_rx: &mut RedrawReceiver,
    sort_trigger: &SortTrigger,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut ticker = interval(UI_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(key) {
                            debug!("action={action:?}");
                            if let AppCommand::Sort(field) = app.apply_action(action) {
                                let (field, direction) = sort_trigger.trigger(field);
                                app.sort_applied(field, direction);
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            Some(()) = redraw_rx.recv() => {
                app.sync_views(views.snapshot());
            }
            _ = ticker.tick() => {}
        }
    }

    Ok(())
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("\n")
}
