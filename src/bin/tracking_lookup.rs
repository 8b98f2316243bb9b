use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use shiptrack::carrier::SpedisciOnlineClient;
use shiptrack::config;
use shiptrack::db;
use shiptrack::store::SqliteStore;
use shiptrack::tracking::TrackingSyncEngine;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print the tracking snapshot of one shipment as JSON")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long, conflicts_with = "tracking_number")]
    shipment_id: Option<String>,

    #[arg(long)]
    tracking_number: Option<String>,

    /// Ignore the cache TTL (delivered shipments are still served from cache)
    #[arg(long)]
    force: bool,
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
    let carrier = Arc::new(SpedisciOnlineClient::from_config(&cfg)?);
    let engine = TrackingSyncEngine::new(store, carrier, cfg.tracking.clone());

    let snapshot = match (args.shipment_id.as_deref(), args.tracking_number.as_deref()) {
        (Some(id), _) => engine.get_tracking(id, args.force).await?,
        (None, Some(tn)) => engine.get_tracking_by_number(tn, args.force).await?,
        (None, None) => bail!("pass --shipment-id or --tracking-number"),
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
