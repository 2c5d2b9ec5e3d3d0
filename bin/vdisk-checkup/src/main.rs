//! vdisk-checkup - snapshot retention and MDS safety passes
//!
//! Loads a cluster state file (persisted entities plus the contents of a
//! simulated volume driver), runs one engine pass and prints its report as
//! JSON on stdout. Logs go to stderr.

mod state;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use state::ClusterState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vdisk_client::{ClientPool, EngineContext, MemoryVolumeDriver};
use vdisk_common::{EngineConfig, StorageDriverId, SystemClock};
use vdisk_mds::{LoadPair, SafetyEngine};
use vdisk_model::{MdsService, MemoryStore};
use vdisk_retention::RetentionEngine;

#[derive(Parser, Debug)]
#[command(name = "vdisk-checkup")]
#[command(about = "Snapshot retention and MDS safety checkups")]
#[command(version)]
struct Args {
    /// Engine configuration file; defaults apply when it does not exist
    #[arg(
        short,
        long,
        env = "VDISK_CHECKUP_CONFIG",
        default_value = "/etc/vdisk-ops/engine.toml"
    )]
    config: PathBuf,

    /// Cluster state file (JSON)
    #[arg(short, long, env = "VDISK_CHECKUP_STATE")]
    state: PathBuf,

    /// Write the updated cluster state back to the state file
    #[arg(long)]
    write_state: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply snapshot retention to the vDisks of one StorageDriver
    Retention {
        /// StorageDriver id
        #[arg(long)]
        storagedriver: String,
        /// Reference time in unix seconds; defaults to now
        #[arg(long)]
        now: Option<i64>,
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply snapshot retention on every StorageDriver
    RetentionAll {
        /// Reference time in unix seconds; defaults to now
        #[arg(long)]
        now: Option<i64>,
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Bring one vDisk to its MDS safety
    Mds {
        /// vDisk guid
        #[arg(long)]
        vdisk: String,
    },
    /// Check the MDS safety of every vDisk of a vPool, or of all vPools
    MdsCheckup {
        /// vPool guid
        #[arg(long)]
        vpool: Option<String>,
    },
    /// Rewrite the stored MDS junctions of a vDisk from the volume driver
    SyncMds {
        /// vDisk guid
        #[arg(long)]
        vdisk: String,
    },
    /// Show the least loaded MDS service of a vPool on a StorageRouter
    PreferredMds {
        /// StorageRouter guid
        #[arg(long)]
        storagerouter: String,
        /// vPool guid
        #[arg(long)]
        vpool: String,
    },
}

fn init_logging(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| args.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Least loaded service as printed by `preferred-mds`
#[derive(Serialize)]
struct PreferredMds {
    service: MdsService,
    load: LoadPair,
}

async fn run(
    command: Commands,
    ctx: EngineContext,
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<Value> {
    let value = match command {
        Commands::Retention {
            storagedriver,
            now,
            dry_run,
        } => {
            let engine = RetentionEngine::new(ctx, config).with_cancellation(cancel);
            let now = now.unwrap_or_else(|| engine.now());
            let storagedriver: StorageDriverId = storagedriver.into();
            let report = if dry_run {
                engine.plan_for_storagedriver(&storagedriver, now).await?
            } else {
                engine
                    .delete_snapshots_for_storagedriver(&storagedriver, now)
                    .await?
            };
            serde_json::to_value(report)?
        }
        Commands::RetentionAll { now, dry_run } => {
            let engine = RetentionEngine::new(ctx, config).with_cancellation(cancel);
            let now = now.unwrap_or_else(|| engine.now());
            let reports = if dry_run {
                engine.plan_snapshots(now).await?
            } else {
                engine.delete_snapshots(now).await?
            };
            serde_json::to_value(reports)?
        }
        Commands::Mds { vdisk } => {
            let engine = SafetyEngine::new(ctx, config).with_cancellation(cancel);
            serde_json::to_value(engine.ensure_safety_for_vdisk(&vdisk.into()).await?)?
        }
        Commands::MdsCheckup { vpool } => {
            let engine = SafetyEngine::new(ctx, config).with_cancellation(cancel);
            let report = match vpool {
                Some(vpool) => engine.mds_checkup(&vpool.into()).await?,
                None => engine.mds_checkup_all().await?,
            };
            serde_json::to_value(report)?
        }
        Commands::SyncMds { vdisk } => {
            let engine = SafetyEngine::new(ctx, config);
            serde_json::to_value(engine.sync_vdisk_to_reality(&vdisk.into()).await?)?
        }
        Commands::PreferredMds {
            storagerouter,
            vpool,
        } => {
            let engine = SafetyEngine::new(ctx, config);
            let preferred = engine
                .get_preferred_mds(&storagerouter.into(), &vpool.into())
                .await?;
            serde_json::to_value(
                preferred.map(|(service, load)| PreferredMds { service, load }),
            )?
        }
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = EngineConfig::load(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    let state = ClusterState::load(&args.state)?;
    info!(
        "Loaded {} vdisk(s) and {} volume(s) from {}",
        state.model.vdisks.len(),
        state.volumes.volumes.len(),
        args.state.display()
    );

    let store = Arc::new(MemoryStore::from_model(state.model));
    let driver = Arc::new(MemoryVolumeDriver::from_state(state.volumes));
    let ctx = EngineContext::new(
        store.clone(),
        ClientPool::shared(driver.clone()),
        Arc::new(SystemClock),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current call");
            on_signal.cancel();
        }
    });

    let result = run(args.command, ctx, &config, cancel).await;

    // Whatever the volume driver acknowledged is kept, even when the pass failed
    if args.write_state {
        ClusterState {
            model: store.model(),
            volumes: driver.state(),
        }
        .save(&args.state)?;
        info!("Wrote state to {}", args.state.display());
    }

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
