//! Accepting inbound connections and dialing outbound ones.

use {
    crate::{
        channel::Direction,
        connection::{reject, run_connection},
        error::{P2pError, Result},
        limiter::ConnectionLimiter,
        message::ReasonCode,
        node_manager::Dialer,
        peer::Node,
        session::NodeContext,
    },
    log::{debug, error, info, warn},
    std::sync::Arc,
    tokio::net::{TcpListener, TcpStream},
    tokio_util::sync::CancellationToken,
};

/// Accept loop. Runs until `cancel` fires.
///
/// A connection is refused before any session is set up if its address is
/// filtered or already connected, if its IP holds too many inbound
/// connections, or (with a `TooManyPeers` DISCONNECT) if the node is at its
/// inbound ceiling.
pub async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<NodeContext>,
    limiter: ConnectionLimiter,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept error: {e}");
                continue;
            }
        };

        if !ctx.channel_manager.is_acceptable(&addr) {
            debug!("refusing connection from {addr}");
            continue;
        }
        if ctx.channel_manager.inbound_count() >= ctx.config.max_inbound_connections {
            debug!("refusing connection from {addr}: too many peers");
            let ctx = ctx.clone();
            let rejecting = ctx.clone();
            ctx.connections.spawn(async move {
                reject(&rejecting, stream, ReasonCode::TooManyPeers).await
            });
            continue;
        }
        let Some(permit) = limiter.acquire(addr.ip()) else {
            debug!("refusing connection from {addr}: per-ip limit reached");
            continue;
        };

        debug!("accepted connection from {addr}");
        let channel_cancel = cancel.child_token();
        let connection = run_connection(
            ctx.clone(),
            stream,
            Direction::Inbound,
            channel_cancel,
            Some(permit),
        );
        ctx.connections.spawn(async move {
            let _ = connection.await;
        });
    }
    info!("p2p listener stopped");
}

/// Dial `node` and run the connection until it closes.
pub async fn connect(ctx: Arc<NodeContext>, node: Node, cancel: CancellationToken) -> Result<()> {
    let Some(addr) = node.socket_addr() else {
        warn!("cannot dial {node}: not an ip address");
        return Ok(());
    };
    let stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = tokio::time::timeout(ctx.config.connect_timeout, TcpStream::connect(addr)) => {
            connected.map_err(|_| P2pError::ConnectTimeout(addr))??
        }
    };
    debug!("connected to {node}");
    run_connection(ctx, stream, Direction::Outbound, cancel, None).await
}

/// [`Dialer`] that spawns a [`connect`] task per node.
pub struct TcpDialer {
    ctx: Arc<NodeContext>,
    cancel: CancellationToken,
}

impl TcpDialer {
    pub fn new(ctx: Arc<NodeContext>, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }
}

impl Dialer for TcpDialer {
    fn dial(&self, node: Node) {
        let ctx = self.ctx.clone();
        let cancel = self.cancel.child_token();
        self.ctx.connections.spawn(async move {
            if let Err(e) = connect(ctx, node.clone(), cancel).await {
                debug!("connection to {node} ended: {e}");
            }
        });
    }
}
