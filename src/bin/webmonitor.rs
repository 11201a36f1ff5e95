use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use web_monitoring::{
    actors::{
        fleet::{Fleet, FleetSettings},
        sink::SinkHandle,
    },
    config::load_config,
    probe::{HttpProbe, Probe},
    registry::{Registry, read_target_file},
    storage::{FallbackLog, open_store},
};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Config file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Target list, one `url,interval[,pattern]` per line
    #[arg(short, long)]
    urls: PathBuf,

    /// Additionally write logs to this file
    #[arg(short, long)]
    logfile: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(args: &Args) -> anyhow::Result<()> {
    let filter = filter::Targets::new().with_targets(vec![
        ("web_monitoring", args.log_level),
        ("webmonitor", args.log_level),
    ]);

    let file_layer = match &args.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(&args)?;
    trace!("started with args: {args:?}");

    let config = load_config(&args.config)?;
    debug!("effective config: {config:?}");

    let load = Registry::load(read_target_file(&args.urls)?);
    for rejection in &load.rejections {
        warn!("skipping target {rejection}");
    }
    if load.registry.is_empty() {
        anyhow::bail!("no valid targets in {}", args.urls.display());
    }
    info!(
        "{} targets loaded, {} rejected",
        load.registry.len(),
        load.rejections.len()
    );

    let store = open_store(&config.storage).await?;
    let sink = SinkHandle::spawn(
        store.clone(),
        FallbackLog::new(&config.sink.fallback_path),
        &config.sink,
    );
    let probe: Arc<dyn Probe> = Arc::new(HttpProbe::new(config.probe.clone())?);

    let fleet = Fleet::start(
        &load.registry,
        probe,
        sink.clone(),
        FleetSettings::from(&config.fleet),
    );

    wait_for_shutdown_signal().await?;

    let report = fleet.stop().await;
    let stats = sink.shutdown(config.sink.flush_timeout()).await;
    info!(
        "shutdown complete: {} aborted probes, {} outcomes received, {} persisted, {} diverted",
        report.aborted, stats.received, stats.persisted, stats.diverted
    );

    store.close().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C")?,
        _ = terminate.recv() => info!("received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")
}
