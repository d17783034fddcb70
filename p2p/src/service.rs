//! Top-level handle that wires the listener, the node manager and the
//! shared registries together.

use {
    crate::{
        channel_manager::ChannelManager,
        config::P2pConfig,
        error::Result,
        limiter::ConnectionLimiter,
        node_manager::{Dialer, DnsSeedResolver, NodeManager, SeedResolver},
        packet::PacketIdGenerator,
        peer::{Node, Peer},
        server::{accept_loop, connect, TcpDialer},
        session::NodeContext,
        sinks::{ConsensusSink, SyncSink, TransactionSink},
    },
    log::{info, warn},
    std::{net::SocketAddr, sync::Arc, time::Duration},
    tessera_ledger_api::{Key, Ledger},
    tokio::{net::TcpListener, task::JoinHandle},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
};

/// How long [`P2pService::shutdown`] waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators that receive application traffic.
pub struct Sinks {
    pub consensus: Arc<dyn ConsensusSink>,
    pub sync: Arc<dyn SyncSink>,
    pub transactions: Arc<dyn TransactionSink>,
}

/// A running P2P node.
pub struct P2pService {
    ctx: Arc<NodeContext>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl P2pService {
    /// Bind the listener and start accepting, dialing and fetching seeds.
    ///
    /// `channel_manager` is passed in so that components built before the
    /// service (such as the transaction relay) can share it. If the config
    /// advertises port 0, the bound port is advertised instead.
    pub async fn start(
        config: P2pConfig,
        key: Arc<Key>,
        ledger: Arc<dyn Ledger>,
        channel_manager: Arc<ChannelManager>,
        sinks: Sinks,
    ) -> Result<Self> {
        let resolver = Arc::new(DnsSeedResolver);
        Self::start_with_resolver(config, key, ledger, channel_manager, sinks, resolver).await
    }

    /// Like [`P2pService::start`] with a custom seed resolver.
    pub async fn start_with_resolver(
        mut config: P2pConfig,
        key: Arc<Key>,
        ledger: Arc<dyn Ledger>,
        channel_manager: Arc<ChannelManager>,
        sinks: Sinks,
        resolver: Arc<dyn SeedResolver>,
    ) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        if config.advertised_port == 0 {
            config.advertised_port = local_addr.port();
        }
        info!(
            "p2p listening on {local_addr} as {} ({})",
            key.address(),
            config.network
        );

        let node_manager = Arc::new(NodeManager::new(&config, channel_manager.clone()));
        let limiter = ConnectionLimiter::new(
            config.max_inbound_connections_per_ip,
            config.max_inbound_connections,
        );
        let ctx = Arc::new(NodeContext {
            config,
            key,
            ledger,
            channel_manager,
            node_manager: node_manager.clone(),
            consensus: sinks.consensus,
            sync: sinks.sync,
            transactions: sinks.transactions,
            packet_ids: PacketIdGenerator::new(),
            connections: TaskTracker::new(),
        });

        let cancel = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(accept_loop(
            listener,
            ctx.clone(),
            limiter,
            cancel.clone(),
        ))];
        let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::new(ctx.clone(), cancel.clone()));
        tasks.extend(node_manager.start(dialer, resolver, cancel.clone()));

        Ok(Self {
            ctx,
            local_addr,
            cancel,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn channel_manager(&self) -> &Arc<ChannelManager> {
        &self.ctx.channel_manager
    }

    pub fn node_manager(&self) -> &Arc<NodeManager> {
        &self.ctx.node_manager
    }

    /// Active peers with their latency.
    pub fn active_peers(&self) -> Vec<Peer> {
        self.ctx.channel_manager.active_peers()
    }

    /// Dial `node` right away, bypassing the node manager's queue.
    pub fn connect(&self, node: Node) -> JoinHandle<Result<()>> {
        self.ctx
            .connections
            .spawn(connect(self.ctx.clone(), node, self.cancel.child_token()))
    }

    /// Stop accepting and dialing, close every channel and wait (bounded)
    /// for background and connection tasks to finish.
    pub async fn shutdown(self) {
        info!("p2p shutting down");
        self.cancel.cancel();
        self.ctx.channel_manager.close_all();
        let connections = self.ctx.connections.clone();
        connections.close();
        let join = async move {
            futures::future::join_all(self.tasks).await;
            connections.wait().await;
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, join).await.is_err() {
            warn!("p2p tasks did not stop within {SHUTDOWN_TIMEOUT:?}");
        }
    }
}
