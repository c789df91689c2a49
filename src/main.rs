use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};
use simplelog::{Config, WriteLogger};

use pagerat::render::{PageId, RenderEvent, RenderManager, ScrollDirection, VisibleSet};
use pagerat::settings::{self, Overrides, ScrollMode, Settings, SpreadMode};
use pagerat::synthetic::{Raster, SyntheticBackend, SyntheticPage};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Scroll through a synthetic document and report what the render scheduler does
#[derive(Parser, Debug)]
#[command(name = "pagerat", version, about)]
struct Cli {
    /// Number of pages in the simulated document
    #[arg(long, default_value_t = 40)]
    pages: u32,

    /// Pages visible at once
    #[arg(long, default_value_t = 3)]
    viewport: u32,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use an odd spread layout
    #[arg(long)]
    spread: bool,

    /// Scroll horizontally
    #[arg(long)]
    horizontal: bool,

    /// Override the minimum page cache size
    #[arg(long)]
    cache_size: Option<usize>,

    /// Page whose backing object fails to load (repeatable)
    #[arg(long = "fail-page")]
    fail_pages: Vec<PageId>,

    /// Simulated render time per page
    #[arg(long, default_value_t = 0)]
    render_delay_ms: u64,

    /// Do not wait for renders to catch up between scroll steps
    #[arg(long)]
    fling: bool,

    #[arg(long, default_value = "pagerat.log")]
    log_file: PathBuf,

    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.pages == 0 || cli.viewport == 0 {
        bail!("--pages and --viewport must be at least 1");
    }

    let config_path = cli.config.clone().or_else(settings::default_config_path);
    let file_settings = match &config_path {
        Some(path) => Settings::load_or_default(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let overrides = Overrides {
        base_cache_size: cli.cache_size,
        spread_mode: cli.spread.then_some(SpreadMode::Odd),
        scroll_mode: cli.horizontal.then_some(ScrollMode::Horizontal),
        log_level: cli.log_level.clone(),
    };
    let resolved = settings::resolve(&file_settings, &overrides)?;

    WriteLogger::init(
        resolved.log_level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?,
    )?;
    info!("Starting pagerat simulation: {cli:?}");

    let mut backend = SyntheticBackend::new(cli.pages)
        .with_render_delay(Duration::from_millis(cli.render_delay_ms));
    for page in &cli.fail_pages {
        backend = backend.with_broken_page(*page);
    }

    let mut manager = RenderManager::new(resolved.render.clone(), backend)
        .context("starting render worker")?;
    manager.set_document(cli.pages);
    let events = manager.subscribe();

    println!(
        "document: {} pages, viewport {} pages, base cache {}, pre-render extra {}",
        cli.pages, cli.viewport, resolved.render.base_cache_size, resolved.render.pre_render_extra
    );

    let last_first = cli.pages.saturating_sub(cli.viewport) + 1;
    let forward: Vec<PageId> = (1..=last_first).collect();
    let backward: Vec<PageId> = (1..=last_first).rev().collect();

    for (direction, firsts) in [
        (ScrollDirection::Forward, forward),
        (ScrollDirection::Backward, backward),
    ] {
        for first in firsts {
            let last = (first + cli.viewport - 1).min(cli.pages);
            let visible = VisibleSet::from_ids(first..=last, direction)?;
            manager.update(visible);
            if cli.fling {
                manager.poll_responses();
            } else {
                settle(&mut manager);
            }
            report(&manager, first, last);
        }
    }

    settle(&mut manager);
    manager.cleanup();

    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for event in events.drain() {
        let kind = match event {
            RenderEvent::PageRendered { .. } => "rendered",
            RenderEvent::PageRenderFailed { .. } => "failed",
            RenderEvent::PageCancelled { .. } => "cancelled",
            RenderEvent::RenderCleanup => "cleanup",
            RenderEvent::Idle => "idle",
        };
        *counts.entry(kind).or_default() += 1;
    }
    let mut summary: Vec<_> = counts.into_iter().collect();
    summary.sort_unstable();
    println!("events: {summary:?}");

    manager.shutdown();
    info!("Simulation finished");
    Ok(())
}

/// Pump until the scheduler has nothing left to start
fn settle(manager: &mut RenderManager<SyntheticPage, Raster>) {
    while manager.force_rendering(None) {
        if !manager.wait_for_response(RESPONSE_TIMEOUT) {
            warn!("No render response within {RESPONSE_TIMEOUT:?}, moving on");
            break;
        }
    }
}

fn report(manager: &RenderManager<SyntheticPage, Raster>, first: PageId, last: PageId) {
    let states: Vec<String> = (first..=last)
        .map(|id| {
            let state = manager
                .page_state(id)
                .map_or("?", |state| state.as_str());
            format!("{id}:{state}")
        })
        .collect();
    println!(
        "visible {first:>3}-{last:<3} [{}] cached {:?}",
        states.join(" "),
        manager.cached_pages()
    );
}
