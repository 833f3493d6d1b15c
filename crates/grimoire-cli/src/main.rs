use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grimoire_host::{setup_reload_signal, ReloadTrigger, ScriptScanner};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use grimoire_cli::{host_builder, logging, AppConfig, World};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file (default: <config dir>/grimoire/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the script directory from the config
    #[arg(short, long)]
    scripts: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the simulated world until Ctrl+C
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Load every script once and report the result
    Check,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => AppConfig::default_path().context("Failed to determine config directory")?,
    };

    let mut config = AppConfig::load_or_create(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(scripts) = &cli.scripts {
        config.scripting.script_dir = Some(scripts.clone());
    }
    Ok(config)
}

fn check(config: AppConfig) -> Result<()> {
    let host = host_builder()
        .with_config(config.scripting)
        .build()
        .context("Failed to load scripts")?;

    println!(
        "Loaded {} scripts from {}",
        host.scripts().len(),
        host.config().script_dir().display()
    );
    for script in host.scripts().scripts() {
        println!("  {:<24} {}", script.name, script.path.display());
    }

    host.shutdown();
    Ok(())
}

async fn run(config: AppConfig, max_ticks: Option<u64>) -> Result<()> {
    let host = host_builder()
        .with_config(config.scripting.clone())
        .build()
        .context("Failed to load scripts")?;

    let mut world = World::new(host, &config.world);
    world.start(&config.world.players)?;

    let mut signal_rx = setup_reload_signal();
    let (trigger, mut manual_rx) = ReloadTrigger::new();
    let mut scanner = config.scripting.hot_reload.then(|| {
        ScriptScanner::with_interval(
            config.scripting.script_dir(),
            Duration::from_millis(config.scripting.hot_reload_interval_ms),
        )
    });

    let tick_interval = Duration::from_millis(config.world.tick_ms.max(1));
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    info!(
        "World running with {} maps, tick every {}ms",
        config.world.maps.len(),
        tick_interval.as_millis()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let diff = last_tick.elapsed().as_millis() as u64;
                last_tick = Instant::now();
                world.tick(diff);

                if let Some(scanner) = scanner.as_mut() {
                    if scanner.poll() {
                        info!("Script changes detected, reloading");
                        trigger.request();
                    }
                }

                if max_ticks.is_some_and(|max| world.stats().ticks >= max) {
                    break;
                }
            }
            Ok(()) = signal_rx.changed() => {
                signal_rx.borrow_and_update();
                if let Err(e) = world.reload() {
                    error!("Reload failed: {}", e);
                }
            }
            Ok(()) = manual_rx.changed() => {
                manual_rx.borrow_and_update();
                if let Err(e) = world.reload() {
                    error!("Reload failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    let stats = world.shutdown();
    println!(
        "{} ticks, {} creatures spawned, {} killed, {} chat lines ({} suppressed), {} reloads",
        stats.ticks,
        stats.spawned,
        stats.killed,
        stats.chat_lines,
        stats.chat_suppressed,
        stats.reloads
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let _log_guard = logging::init_logging(cli.debug, config.logging.file)
        .context("Failed to initialize logging")?;

    match cli.command.unwrap_or(Command::Run { ticks: None }) {
        Command::Run { ticks } => run(config, ticks).await,
        Command::Check => check(config),
    }
}
