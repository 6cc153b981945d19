//! Glitch Logger CLI
//!
//! Trigger-driven capture of monitored channels.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glitch_logger::{
    acquisition::FeedSource,
    config::{Config, TriggerConfig},
    core::{Engine, NoHeartbeat, TickOutcome},
    stats::{create_shared_stats_with_persistence, RunStats},
    storage::{JsonlSink, MemorySink, WindowSink},
    VERSION,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glitch-logger")]
#[command(version = VERSION)]
#[command(about = "Trigger-driven circular-buffer capture logger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the logger until quitting time, end of feed or Ctrl+C
    Run {
        /// Configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Replay a recorded JSON-lines frame file instead of reading stdin
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Page file (overrides the configuration)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Run ticks back to back instead of on the sampling interval
        #[arg(long)]
        fast: bool,

        /// Keep pages in memory and only report them
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a configuration and show its layout
    Check {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Print an example configuration
    Config {
        /// Write the example here instead of printing it
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show cumulative statistics
    Status {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            replay,
            output,
            fast,
            dry_run,
        } => cmd_run(config, replay, output, fast, dry_run),
        Commands::Check { config } => cmd_check(config),
        Commands::Config { output } => cmd_config(output),
        Commands::Status { config } => cmd_status(config),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(Config::default_path);
    let config = Config::from_path(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    Ok((config, path))
}

fn cmd_run(
    config: Option<PathBuf>,
    replay: Option<PathBuf>,
    output: Option<PathBuf>,
    fast: bool,
    dry_run: bool,
) -> Result<()> {
    let (mut config, config_path) = load_config(config)?;
    if let Some(output) = output {
        config.output = output;
    }

    println!("Glitch Logger v{VERSION}");
    println!();
    println!("Configuration: {}", config_path.display());
    println!(
        "  Datasets: {}, triggers: {}",
        config.datasets.len(),
        config.triggers.len()
    );
    println!("  Interval: {:?}", config.interval);

    let source = match replay {
        Some(ref path) => {
            println!("  Source: replay of {}", path.display());
            FeedSource::replay_file(path)?
        }
        None => {
            println!("  Source: frames on stdin");
            FeedSource::from_reader(std::io::BufReader::new(std::io::stdin()), "stdin".to_string())
        }
    };

    if dry_run {
        println!("  Output: none (dry run)");
        let sink = run_engine(&config, source, MemorySink::new(), fast)?;
        println!();
        println!("Captured pages:");
        for page in sink.pages() {
            println!(
                "  {} at step {}: {} rows ({} post-event), {:?}",
                page.dataset,
                page.anchor_step,
                page.rows.len(),
                page.post_event_rows(),
                page.reason
            );
        }
    } else {
        println!("  Output: {}", config.output.display());
        let sink = JsonlSink::new(&config.output);
        println!("  Run id: {}", sink.run_id());
        run_engine(&config, source, sink, fast)?;
    }

    Ok(())
}

fn run_engine<W: WindowSink>(config: &Config, source: FeedSource, sink: W, fast: bool) -> Result<W> {
    let stats_path = config.stats_path();
    let stats = create_shared_stats_with_persistence(stats_path.clone());
    let mut engine = Engine::new(config, source, sink, stats.clone())?;
    engine.set_paced(!fast);

    let shutdown = engine.shutdown_handle();
    ctrlc::set_handler(move || shutdown.request()).expect("Error setting Ctrl+C handler");

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let outcome = engine.run(&mut NoHeartbeat);

    let left = engine.unpersisted_pages();
    println!();
    println!("{}", stats.summary());
    if let Err(e) = stats.save() {
        eprintln!("Warning: could not save statistics to {}: {e}", stats_path.display());
    }

    match outcome? {
        TickOutcome::Stopped => println!("Stopped."),
        _ => println!("Finished."),
    }
    if left > 0 {
        bail!("{left} captured pages could not be written");
    }
    Ok(engine.into_sink())
}

fn cmd_check(config: Option<PathBuf>) -> Result<()> {
    let (config, path) = load_config(config)?;
    let registry = config.channel_registry()?;

    println!("{} is valid", path.display());
    println!();
    println!("Channels ({}):", registry.len());
    for spec in &registry {
        if spec.is_scalar() {
            println!("  {}", spec.name);
        } else {
            println!("  {} [{}]", spec.name, spec.elements);
        }
    }
    println!();
    println!("Datasets:");
    for ds in &config.datasets {
        println!(
            "  {}: {} channels, {} before / {} after ({} ring nodes)",
            ds.name,
            ds.channels.len(),
            ds.before,
            ds.after,
            ds.before + 1 + ds.after
        );
    }
    println!();
    println!("Triggers:");
    for trigger in &config.triggers {
        let kind = match trigger {
            TriggerConfig::Glitch { delta, .. } => format!("glitch (delta {delta})"),
            TriggerConfig::Level {
                level, direction, ..
            } => format!("level ({direction:?} through {level})"),
            TriggerConfig::Alarm { severities, .. } => format!("alarm ({severities:?})"),
        };
        println!(
            "  {} -> {}: {}, holdoff {:?}",
            trigger.channel(),
            trigger.dataset(),
            kind,
            trigger.holdoff()
        );
    }
    if !config.conditions.channels.is_empty() {
        println!();
        println!("Conditions ({:?}):", config.conditions.mode);
        for c in &config.conditions.channels {
            println!("  {} in [{}, {})", c.channel, c.lower, c.upper);
        }
    }
    if let Some(ref inhibit) = config.inhibit {
        println!();
        println!("Inhibit: {inhibit}");
    }
    Ok(())
}

fn cmd_config(output: Option<PathBuf>) -> Result<()> {
    let example = Config::example();
    match output {
        Some(path) => {
            example.save(&path)?;
            println!("Example configuration written to {}", path.display());
        }
        None => {
            println!("{}", serde_json::to_string_pretty(&example)?);
            println!();
            println!("Default location: {}", Config::default_path().display());
        }
    }
    Ok(())
}

fn cmd_status(config: Option<PathBuf>) -> Result<()> {
    let (config, _) = load_config(config)?;
    let stats_path = config.stats_path();

    println!("Glitch Logger Status");
    println!("====================");
    println!();
    println!("Output: {}", config.output.display());

    if !stats_path.exists() {
        println!("No previous run data found.");
        return Ok(());
    }

    let stats = RunStats::read(&stats_path)
        .with_context(|| format!("reading {}", stats_path.display()))?;
    println!("Cumulative Statistics:");
    println!("  Ticks: {}", stats.ticks);
    println!("  Inhibited ticks: {}", stats.inhibited_ticks);
    println!("  Conditions failures: {}", stats.conditions_failures);
    println!("  Stale readings: {}", stats.acquisition_errors);
    println!("  Triggers fired: {}", stats.triggers_fired);
    println!("  Captures opened: {}", stats.captures_opened);
    println!(
        "  Pages written: {} ({} rows)",
        stats.pages_written, stats.rows_written
    );
    println!("  Persist failures: {}", stats.persist_failures);
    println!("  Last updated: {}", stats.last_updated);
    Ok(())
}
