//! Where decoded application messages go.
//!
//! Sessions hand consensus, sync and transaction traffic to these
//! collaborators. The logging implementations stand in when a node runs
//! without a consensus engine or block sync attached.

use {
    crate::{message::Message, peer::Peer},
    log::{debug, trace},
    tessera_ledger_api::Transaction,
    tessera_pending_pool::PendingPool,
};

/// Receives BFT traffic from active peers.
pub trait ConsensusSink: Send + Sync {
    /// A peer became active; `height` is the height it is about to work on.
    fn on_new_height(&self, peer: &Peer, height: u64);

    /// `BFT_NEW_HEIGHT`, `BFT_NEW_VIEW`, `BFT_PROPOSAL` or `BFT_VOTE`.
    fn on_message(&self, peer: &Peer, message: Message);
}

/// Receives block sync traffic from active peers.
pub trait SyncSink: Send + Sync {
    /// A peer became active advertising `latest_block_number`.
    fn on_peer_height(&self, peer: &Peer, latest_block_number: u64);

    /// `BLOCK` or `BLOCK_HEADER`.
    fn on_message(&self, peer: &Peer, message: Message);
}

/// Receives transactions gossiped by peers.
pub trait TransactionSink: Send + Sync {
    fn submit(&self, tx: Transaction);
}

impl TransactionSink for PendingPool {
    fn submit(&self, tx: Transaction) {
        self.add_transaction(tx);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingConsensus;

impl ConsensusSink for LoggingConsensus {
    fn on_new_height(&self, peer: &Peer, height: u64) {
        debug!("peer {} at height {height}", peer.peer_id);
    }

    fn on_message(&self, peer: &Peer, message: Message) {
        trace!("{} from {}", message.kind(), peer.peer_id);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSync;

impl SyncSink for LoggingSync {
    fn on_peer_height(&self, peer: &Peer, latest_block_number: u64) {
        debug!("peer {} reports block {latest_block_number}", peer.peer_id);
    }

    fn on_message(&self, peer: &Peer, message: Message) {
        trace!("{} from {}", message.kind(), peer.peer_id);
    }
}
