//! # galdexd
//!
//! Daemon for the galdex curation engine. Boot order mirrors the write
//! path's trust chain: configuration sandbox first, then journal recovery
//! (before any write API exists), then the watcher and scheduler.
//!
//! Exit codes: `0` on clean shutdown, non-zero when the configuration
//! sandbox cannot be acquired or the journal refuses its directory. A
//! recovery failure does NOT exit — it engages the in-process read-only
//! fuse and the daemon keeps serving reads.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use galdex_config::Settings;
use galdex_core::{
    BackupManager, ClusterEngine, Database, DecisionService, Journal,
    LibraryReadView, Organizer, ReadOnlyFuse, ScanService, SchedulerConfig,
    Sentinel, SentinelConfig, TaskScheduler, TxEngine,
};
use galdex_core::organizer::GalgameStandard;
use galdex_core::txfs::run_recovery;
use galdex_model::ScannerMode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "galdexd", version, about = "galdex curation daemon")]
struct Cli {
    /// Override the config directory (GALGAME_CONFIG_DIR).
    #[arg(long)]
    config_dir: Option<std::path::PathBuf>,

    /// Override the scanner mode for this run.
    #[arg(long, value_parser = parse_mode)]
    mode: Option<ScannerMode>,

    /// Run recovery and exit without starting background services.
    #[arg(long)]
    check: bool,
}

fn parse_mode(value: &str) -> Result<ScannerMode, String> {
    value.parse().map_err(|e| format!("{e}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(dir) = &cli.config_dir {
        // The loader reads the environment; the flag is sugar for it.
        unsafe {
            std::env::set_var(galdex_config::loader::ENV_CONFIG_DIR, dir);
        }
    }

    let mut settings = match galdex_config::load() {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "failed to resolve configuration");
            return ExitCode::from(2);
        }
    };
    if let Some(mode) = cli.mode {
        settings.scanner.mode = mode;
    }

    if let Err(err) = settings.ensure_directories() {
        error!(%err, "failed to acquire configuration sandbox");
        return ExitCode::from(2);
    }

    match run(settings, cli.check).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings, check_only: bool) -> anyhow::Result<()> {
    // The journal refuses unsafe config dirs; there is no fallback.
    let journal = Arc::new(Journal::open(&settings.config_dir)?);
    // A transaction engine is bound to one root; destructive work (trash,
    // organizer) runs against the primary root. Watching covers them all.
    let library_root = settings.library_roots[0].clone();
    let engine = TxEngine::new(Arc::clone(&journal), &library_root)?;

    // Recovery runs before any write API exists. Failure flips the fuse;
    // the process stays up, read-only.
    let fuse = ReadOnlyFuse::new();
    match run_recovery(&engine, &fuse) {
        Ok(report) => info!(
            rolled_back = report.rolled_back,
            active = report.active.len(),
            "recovery complete"
        ),
        Err(err) => {
            error!(%err, "recovery failed; continuing in read-only mode");
        }
    }

    if check_only {
        info!("check mode: recovery done, exiting");
        return Ok(());
    }

    let db = Database::open(&settings.database_path()).await?;

    let cluster_engine = Arc::new(ClusterEngine::with_defaults(db.clone()));
    let scan_service = Arc::new(ScanService::new(
        db.clone(),
        cluster_engine,
        fuse.clone(),
    ));
    let decisions = DecisionService::new(db.clone(), fuse.clone());
    let library = LibraryReadView::new(db.clone());
    let organizer = Organizer::new(
        engine.clone(),
        fuse.clone(),
        Arc::new(GalgameStandard),
    );

    let sentinel = Arc::new(Sentinel::new(
        settings.library_roots.clone(),
        scan_service.directory_sink(),
        SentinelConfig {
            stability_threshold: Duration::from_secs(
                settings.scanner.stability_threshold_secs,
            ),
            coalesce_window: Duration::from_secs(
                settings.scanner.coalesce_window_secs,
            ),
            poll_interval: Duration::from_secs(
                settings.scanner.poll_interval_secs,
            ),
            scheduled_time: settings.scanner.scheduled_time.clone(),
            ..SentinelConfig::default()
        },
    ));
    sentinel.configure(settings.scanner.mode);
    sentinel.start();

    let backup = Arc::new(
        BackupManager::new(&settings.config_dir, &settings.database_path())
            .with_keep(settings.scheduler.backup_keep),
    );
    let scheduler = TaskScheduler::new(
        Arc::clone(&sentinel),
        engine.clone(),
        backup,
        fuse.clone(),
        SchedulerConfig {
            scan_interval_min: settings.scheduler.scan_interval_min,
            backup_time: settings.scheduler.backup_time.clone(),
            ..SchedulerConfig::default()
        },
    );
    scheduler.start();

    info!(
        roots = settings.library_roots.len(),
        mode = settings.scanner.mode.as_str(),
        read_only = fuse.is_engaged(),
        "galdexd is up"
    );

    // These handles stay alive for the daemon's lifetime; command
    // transports (IPC, HTTP) attach to them from the outside.
    let _surfaces = (decisions, library, organizer, scan_service);

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    scheduler.shutdown();
    sentinel.stop();
    db.close().await;
    info!("clean shutdown");
    Ok(())
}
