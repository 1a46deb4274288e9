//! fOS Tune - demo driver
//!
//! Builds a synthetic long chat page, installs the engine on it and drives
//! a session: typing in the composer, scrolling through history, idling
//! past a cleanup interval, then hiding the tab.

mod demo;
mod probe;

use anyhow::{Context, Result};
use clap::Parser;
use demo::ChatPage;
use fos_page::headless::FRAME_INTERVAL;
use fos_page::{
    Event, HandlerError, HeapSnapshot, Listener, ListenerOptions, Target, VisibilityState,
};
use fos_tune::{ConfigResolver, Engine};
use probe::ProcessHeapProbe;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Text typed into the composer, one input event per character
const PROMPT: &str = "How do I keep a long conversation responsive?";

/// Delay between keystrokes
const KEYSTROKE: Duration = Duration::from_millis(5);

/// Requests the page tries to send during the session.
const OUTGOING: &[&str] = &[
    "https://chat.example/backend-api/conversation",
    "https://chat.example/ces/v1/t",
    "https://browser-intake-datadoghq.com/api/v2/rum",
    "https://o33249.ingest.sentry.io/api/4/envelope/",
    "https://chat.example/backend-api/models",
];

#[derive(Parser, Debug)]
#[command(name = "fos-tune", version, about = "Run the fOS Tune engine on a synthetic chat page")]
struct Cli {
    /// Overrides file (TOML or JSON) instead of the per-user one
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ignore any overrides file and run with defaults
    #[arg(long, conflicts_with = "config")]
    no_overrides: bool,

    /// Number of conversation turns on the page
    #[arg(long, default_value_t = 120)]
    messages: usize,

    /// Scroll steps from the bottom of the conversation to the top
    #[arg(long, default_value_t = 40)]
    scroll_steps: usize,

    /// Report a fixed heap usage ratio in (0, 1] instead of this process's RSS
    #[arg(long, value_name = "RATIO", value_parser = parse_heap_ratio)]
    heap_ratio: Option<f64>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Debug logging with targets
    #[arg(short, long)]
    verbose: bool,
}

fn parse_heap_ratio(value: &str) -> std::result::Result<f64, String> {
    let ratio: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if ratio > 0.0 && ratio <= 1.0 {
        Ok(ratio)
    } else {
        Err(format!("{ratio} is not in (0, 1]"))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .compact()
        .init();

    let mut resolver = ConfigResolver::new();
    if let Some(path) = &cli.config {
        resolver = resolver.with_overrides_path(path);
    } else if cli.no_overrides {
        resolver = resolver.without_overrides();
    }
    let config = resolver.resolve().context("Failed to resolve configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
        return Ok(());
    }

    let tuning = config.tuning().clone();
    let chat = ChatPage::build(cli.messages).context("Failed to build chat page")?;
    let page = &chat.page;
    info!("Built chat page with {} turns, {:.0}px tall", cli.messages, page.content_height());

    let host = match cli.heap_ratio {
        Some(ratio) => {
            page.set_heap(Some(HeapSnapshot::new((ratio * 1000.0).round() as u64, 1000)));
            page.host()
        }
        None => page.host_builder().heap(Rc::new(ProcessHeapProbe::new())).build(),
    };

    // Land on the latest message before the engine arrives
    page.scroll_to(chat.bottom());
    let engine = Engine::install(&host, config)?;

    // The page's own composer handler, registered after install
    let handled = Rc::new(Cell::new(0u64));
    let counter = handled.clone();
    let on_input: Listener = Rc::new(move |_: &Event| -> Result<(), HandlerError> {
        counter.set(counter.get() + 1);
        Ok(())
    });
    let composer = Target::Node(chat.composer);
    host.add_event_listener(composer, "input", on_input, ListenerOptions::default());

    let mut typed = String::new();
    for ch in PROMPT.chars() {
        typed.push(ch);
        page.dispatch(composer, Event::new("input", composer).with_data(typed.clone()));
        page.advance(KEYSTROKE);
    }
    page.advance(tuning.throttle_window());

    let mut peak_collapsed = 0;
    let steps = cli.scroll_steps.max(1);
    for step in 0..=steps {
        let y = chat.bottom() * (1.0 - step as f32 / steps as f32);
        page.scroll_to(y);
        page.advance(FRAME_INTERVAL);
        if let Some(virtualizer) = engine.virtualizer() {
            peak_collapsed = peak_collapsed.max(virtualizer.collapsed_count());
        }
    }

    page.advance(tuning.janitor_interval());
    page.set_visibility(VisibilityState::Hidden);

    let blocked = OUTGOING.iter().filter(|url| page.would_block(url)).count();

    println!("fOS Tune: {}", engine.status().summary());
    println!(
        "  input:      {} events, {} handler calls",
        PROMPT.chars().count(),
        handled.get()
    );
    if let Some(virtualizer) = engine.virtualizer() {
        let stats = virtualizer.stats();
        println!(
            "  virtualize: {} tracked, peak {} collapsed, {} collapses, {} expansions",
            virtualizer.tracked_count(),
            peak_collapsed,
            stats.collapses,
            stats.expansions
        );
    }
    if let Some(janitor) = engine.janitor() {
        let stats = janitor.stats();
        println!("  janitor:    {} nodes removed in {} sweeps", stats.removed, stats.sweeps);
    }
    if let Some(lazy) = engine.lazy_render() {
        println!(
            "  code:       {} of {} blocks rendered",
            lazy.rendered_count(),
            lazy.registered_count()
        );
    }
    if let Some(images) = engine.images() {
        println!("  images:     {} marked lazy", images.optimized_count());
    }
    if let Some(memory) = engine.memory() {
        let stats = memory.stats();
        println!(
            "  memory:     {} checks, {} mitigations, {} images released",
            stats.checks, stats.mitigations, stats.released
        );
    }
    println!("  requests:   {} of {} refused", blocked, OUTGOING.len());
    if page.uncaught_errors() > 0 {
        println!("  errors:     {} uncaught", page.uncaught_errors());
    }

    Ok(())
}
