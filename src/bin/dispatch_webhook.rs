use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use shiptrack::channel;
use shiptrack::config;
use shiptrack::db;
use shiptrack::dispatcher::NotificationDispatcher;
use shiptrack::model::TrackingWebhook;
use shiptrack::store::{SqliteStore, TrackingStore};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Dispatch notifications for a carrier webhook payload read from a file"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSON webhook body
    #[arg(long)]
    payload: PathBuf,

    /// Local shipment id; resolved from the tracking number when omitted
    #[arg(long)]
    shipment_id: Option<String>,
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

    let raw = tokio::fs::read_to_string(&args.payload)
        .await
        .with_context(|| format!("failed to read {}", args.payload.display()))?;
    let payload: TrackingWebhook =
        serde_json::from_str(&raw).context("invalid webhook payload")?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let shipment_id = match args.shipment_id {
        Some(id) => id,
        None => store
            .find_shipment_by_tracking_number(&payload.data.tracking_number)
            .await?
            .with_context(|| {
                format!("no shipment with tracking number {}", payload.data.tracking_number)
            })?,
    };

    let dispatcher = NotificationDispatcher::new(
        store.clone(),
        store.clone(),
        store,
        channel::from_config(&cfg)?,
        cfg.notifications.dedup_window(),
    );
    info!(%shipment_id, event = payload.event.as_str(), "dispatching webhook");
    let outcome = dispatcher.dispatch(&payload, &shipment_id).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
