//! Plantwatch - industrial asset-monitoring ingest
//!
//! Replays telemetry, anomaly and inspection events into the primary store,
//! batches them per domain into the search index and the live channel, and
//! writes a dashboard KPI report.
//!
//! Exit codes:
//!   0 - Success (including a graceful Ctrl-C shutdown)
//!   1 - Runtime error (config, store, unreadable input, etc.)

mod analysis;
mod batch;
mod broadcast;
mod cli;
mod config;
mod index;
mod models;
mod pipeline;
mod report;
mod source;
mod store;

use anyhow::{Context, Result};
use broadcast::{Broadcaster, LiveUpdate};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use index::SearchIndex;
use indicatif::{ProgressBar, ProgressStyle};
use models::{Domain, IngestStats};
use pipeline::{DomainSink, Pipeline};
use source::{EventReader, SourceItem, SourceSpec};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::EventStore;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Assets listed in the "most affected" table.
const TOP_ASSETS: usize = 10;

/// Parsed lines buffered between the reader thread and the pipeline.
const REPLAY_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config decides the default verbosity, so it is read before logging starts
    let (config, config_origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, &config);

    info!("Plantwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_origin);
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("Ingest failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .plantwatch.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to tune batch thresholds, the data directory, and more.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` overrides the verbosity flags.
fn init_logging(args: &Args, config: &Config) {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from file or use defaults, then apply CLI overrides.
///
/// Returns the config and a description of where it came from.
fn load_config(args: &Args) -> Result<(Config, String)> {
    let (mut config, origin) = if let Some(ref config_path) = args.config {
        (
            Config::load(config_path)?,
            format!("loaded from {}", config_path.display()),
        )
    } else {
        match Config::load_default()? {
            Some(config) => (config, format!("loaded from {}", CONFIG_FILE)),
            None => (Config::default(), "defaults (no config file found)".to_string()),
        }
    };

    config.merge_with_args(args);
    config.validate()?;
    Ok((config, origin))
}

/// Run the complete ingest workflow.
async fn run(args: Args, config: Config) -> Result<()> {
    let start_time = Instant::now();

    let spec = SourceSpec::resolve(args.input_path())?;

    // Handle --dry-run: parse and validate, persist nothing
    if args.dry_run {
        return handle_dry_run(spec);
    }

    println!("🗄️  Opening event store: {}", config.store.data_dir.display());
    let store = Arc::new(EventStore::open(
        config.store.data_dir.clone(),
        config.store.sync_writes,
    )?);
    let index = Arc::new(SearchIndex::new(config.index.max_documents));
    let broadcaster = Broadcaster::new(config.broadcast.capacity);

    let live_printer = args.live.then(|| spawn_live_printer(broadcaster.subscribe()));
    debug!("Live subscribers: {}", broadcaster.subscriber_count());

    let sink = DomainSink::new(Arc::clone(&index), broadcaster.clone());
    let mut pipeline = Pipeline::new(&config, Arc::clone(&store), sink)?;

    println!("📡 Replaying events from {}", describe_source(&spec));
    if args.rate > 0 {
        println!("   Pacing: {} events/s", args.rate);
    }

    let replayed = replay(&mut pipeline, spec, args.rate, !args.quiet).await;

    // Flush whatever is buffered even if the replay stopped on an error
    println!("\n💾 Flushing buffered batches...");
    let stats = pipeline.shutdown().await;
    let interrupted = replayed?;

    // All senders are gone once the broadcaster drops, which ends the printer
    drop(broadcaster);
    if let Some(task) = live_printer {
        if let Err(e) = task.await {
            warn!("Live output task failed: {}", e);
        }
    }

    println!("📝 Generating report...");
    let summary = analysis::summarize(&index, &stats, TOP_ASSETS);
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&summary)?,
        OutputFormat::Markdown => report::generate_markdown_report(&summary),
    };

    std::fs::write(&config.general.output, &output)
        .with_context(|| format!("Failed to write report to {}", config.general.output))?;

    // Print summary
    println!("\n📊 Ingest Summary:");
    print_ingest_stats(&stats);
    println!("   Indexed documents: {}", index.len());
    for domain in Domain::ALL {
        debug!("{} log: {}", domain, store.log_path(domain).display());
    }
    println!("   Assets: {}", summary.asset_count);
    println!(
        "   Anomalies - 🔴 Critical: {} | 🟠 High: {}",
        summary
            .anomalies_by_severity
            .get(&models::Severity::Critical)
            .copied()
            .unwrap_or(0),
        summary
            .anomalies_by_severity
            .get(&models::Severity::High)
            .copied()
            .unwrap_or(0)
    );
    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());

    if interrupted {
        println!("\n⏹️  Interrupted; buffered batches were flushed before exit.");
    }
    println!("\n✅ Ingest complete! Report saved to: {}", config.general.output);

    Ok(())
}

/// Feed the source into the pipeline until it is exhausted or Ctrl-C arrives.
///
/// Returns `true` when the replay was interrupted.
async fn replay(
    pipeline: &mut Pipeline,
    spec: SourceSpec,
    rate: u64,
    show_progress: bool,
) -> Result<bool> {
    // Reading files or stdin blocks, so it runs off the async workers
    let (tx, mut rx) = mpsc::channel::<Result<SourceItem>>(REPLAY_BUFFER);
    let reader = tokio::task::spawn_blocking(move || {
        for item in EventReader::open(spec) {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });

    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} events {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut pacer = (rate > 0).then(|| tokio::time::interval(Duration::from_secs_f64(1.0 / rate as f64)));

    let feed = async {
        while let Some(item) = rx.recv().await {
            if let Some(ref mut pacer) = pacer {
                pacer.tick().await;
            }

            match item? {
                SourceItem::Event(event) => {
                    pipeline.ingest(event)?;
                }
                SourceItem::Malformed { origin, line } => pipeline.record_malformed(&origin, line),
            }

            progress.inc(1);
            progress.set_message(format!(
                "({} buffered, {} rejected)",
                pipeline.pending(),
                pipeline.stats().rejected
            ));
        }
        anyhow::Ok(())
    };

    let interrupted = tokio::select! {
        result = feed => {
            result?;
            false
        }
        _ = interrupt() => {
            warn!("Interrupt received, shutting down");
            true
        }
    };

    progress.finish_and_clear();

    // An interrupted reader may be parked on stdin; it stops on its next send
    drop(rx);
    if !interrupted {
        reader.await.context("Event reader task failed")?;
    }

    Ok(interrupted)
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Handle --dry-run: parse and validate every event, print counts, exit.
fn handle_dry_run(spec: SourceSpec) -> Result<()> {
    println!(
        "\n🔍 Dry run: validating events from {} (nothing is persisted)...\n",
        describe_source(&spec)
    );

    let mut stats = IngestStats::default();
    for item in EventReader::open(spec) {
        match item? {
            SourceItem::Event(event) => match event.validate() {
                Ok(()) => stats.record_accepted(event.domain()),
                Err(reason) => {
                    warn!("Invalid {} event for asset '{}': {}", event.domain(), event.asset_id(), reason);
                    stats.rejected += 1;
                }
            },
            SourceItem::Malformed { origin, line } => stats.record_malformed(&origin, line),
        }
    }

    print_ingest_stats(&stats);
    println!("\n✅ Dry run complete. Nothing was written.");
    Ok(())
}

/// Print each live update as it is broadcast.
fn spawn_live_printer(mut updates: tokio::sync::broadcast::Receiver<LiveUpdate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => println!(
                    "   📣 [{}] {}: {} records",
                    update.emitted_at.format("%H:%M:%S%.3f"),
                    update.domain,
                    update.count
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Live output fell behind; {} updates skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn describe_source(spec: &SourceSpec) -> String {
    match spec {
        SourceSpec::Stdin => "stdin".to_string(),
        SourceSpec::Files(files) => format!("{} file(s)", files.len()),
    }
}

fn print_ingest_stats(stats: &IngestStats) {
    for domain in Domain::ALL {
        let count = stats.accepted.get(&domain).copied().unwrap_or(0);
        println!("   {}: {}", domain, count);
    }
    println!("   Accepted: {}", stats.total_accepted());
    if stats.rejected > 0 || stats.malformed > 0 {
        println!("   ⚠️  Rejected: {} | Malformed: {}", stats.rejected, stats.malformed);
        if let Some(ref first) = stats.first_malformed {
            println!("   First malformed line: {}", first);
        }
    }
}
