//! `tessera-node`: runs the peer-to-peer layer and the pending pool
//! against an in-memory ledger until interrupted.

mod cli;
mod config;

use {
    crate::{cli::CliArgs, config::NodeConfig},
    log::{error, info},
    std::{error::Error, process::ExitCode, sync::Arc, time::Duration},
    tessera_ledger_api::{Key, Ledger, MemoryLedger},
    tessera_p2p::{
        ChannelManager, LoggingConsensus, LoggingSync, P2pConfig, P2pService, Relay, Sinks,
    },
    tessera_pending_pool::{PendingPool, PoolConfig, TransactionRelay},
};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> ExitCode {
    let matches = cli::app().get_matches();
    let args = CliArgs::from_matches(&matches);
    match &args.log_filter {
        Some(filter) => tessera_logger::setup_with(filter),
        None => tessera_logger::setup_with_default(cli::DEFAULT_LOG_FILTER),
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs) -> Result<(), Box<dyn Error>> {
    let mut config = NodeConfig::load(&args.config_path)?;
    args.apply(&mut config);

    let network = config.network()?;
    let p2p_config = config.p2p_config(network)?;
    let pool_config = config.pool_config(network)?;
    let key = Arc::new(config.identity()?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tesseraNode")
        .enable_all()
        .build()?;
    runtime.block_on(serve(p2p_config, pool_config, key))
}

async fn serve(
    p2p_config: P2pConfig,
    pool_config: PoolConfig,
    key: Arc<Key>,
) -> Result<(), Box<dyn Error>> {
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    let channel_manager = Arc::new(ChannelManager::for_node(
        &p2p_config,
        &key,
        ledger.clone(),
    ));
    let relay: Arc<dyn TransactionRelay> = Arc::new(Relay::new(
        channel_manager.clone(),
        p2p_config.relay_redundancy,
    ));
    // The in-memory ledger never commits blocks on its own. A ledger that
    // does must forward each `BlockCommit` to `pool.on_block_committed`.
    let pool = Arc::new(PendingPool::new(pool_config, ledger.clone(), Some(relay))?);

    let sinks = Sinks {
        consensus: Arc::new(LoggingConsensus),
        sync: Arc::new(LoggingSync),
        transactions: pool.clone(),
    };
    let service = P2pService::start(p2p_config, key, ledger, channel_manager, sinks).await?;
    info!(
        "tessera node v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        service.local_addr()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    // The first tick completes immediately.
    status.tick().await;
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("interrupt received, shutting down");
                break;
            }
            _ = status.tick() => {
                let cm = service.channel_manager();
                info!(
                    "peers: {} active ({} in / {} out), pending: {}, queued: {}",
                    cm.active_count(),
                    cm.inbound_count(),
                    cm.outbound_count(),
                    pool.pending_len(),
                    pool.queue_len(),
                );
            }
        }
    }

    service.shutdown().await;
    pool.stop()?;
    Ok(())
}
