use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use shiptrack::carrier::SpedisciOnlineClient;
use shiptrack::channel;
use shiptrack::config;
use shiptrack::db;
use shiptrack::dispatcher::{spawn_dispatch_worker, NotificationDispatcher};
use shiptrack::store::SqliteStore;
use shiptrack::tracking::{SyncOptions, TrackingSyncEngine};

#[derive(Debug, Parser)]
#[command(author, version, about = "Periodic tracking sync with notification dispatch")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        store.clone(),
        store.clone(),
        channel::from_config(&cfg)?,
        cfg.notifications.dedup_window(),
    ));
    let (dispatch, dispatch_worker) = spawn_dispatch_worker(dispatcher);

    let carrier = Arc::new(SpedisciOnlineClient::from_config(&cfg)?);
    let engine = TrackingSyncEngine::new(store, carrier, cfg.tracking.clone()).with_dispatch(dispatch);
    let options = SyncOptions::from_config(&cfg.tracking);

    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.app.sync_interval_seconds));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        interval_seconds = cfg.app.sync_interval_seconds,
        "starting tracking sync loop"
    );
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let metrics = engine.sync_batch(options).await;
                if metrics.errors > 0 {
                    warn!(errors = metrics.errors, total = metrics.total, "sync cycle finished with errors");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    // Dropping the engine closes the queue; let queued notifications drain.
    drop(engine);
    if let Err(err) = dispatch_worker.await {
        warn!(?err, "dispatch worker ended abnormally");
    }
    Ok(())
}
