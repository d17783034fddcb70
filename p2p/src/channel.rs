//! A single connection to a remote node, as seen by the rest of the node.
//!
//! A [`Channel`] owns the bounded outbound queue drained by the
//! connection's writer task, the remote [`Peer`] once the handshake is
//! done, and the cancellation token that tears the connection down.

use {
    crate::{
        error::{P2pError, Result},
        message::{Message, ReasonCode},
        peer::Peer,
    },
    log::{debug, warn},
    parking_lot::{Mutex, RwLock},
    std::{
        fmt,
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        time::Instant,
    },
    tokio::sync::mpsc::{self, error::TrySendError},
    tokio_util::sync::CancellationToken,
};

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Receiving end of a channel's outbound queue, owned by the writer task.
pub struct MessageQueueReceiver {
    rx: mpsc::Receiver<Message>,
    queued: Arc<AtomicUsize>,
}

impl MessageQueueReceiver {
    pub async fn recv(&mut self) -> Option<Message> {
        let message = self.rx.recv().await?;
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        Some(message)
    }
}

pub struct Channel {
    id: u64,
    direction: Direction,
    remote_addr: SocketAddr,
    peer: RwLock<Option<Peer>>,
    active: AtomicBool,
    closed: AtomicBool,
    queue: mpsc::Sender<Message>,
    queued: Arc<AtomicUsize>,
    /// Reason to send in the final DISCONNECT, if we initiated the close.
    disconnect_reason: Mutex<Option<ReasonCode>>,
    /// Timestamp and send time of the ping awaiting its pong.
    outstanding_ping: Mutex<Option<(u64, Instant)>>,
    cancel: CancellationToken,
}

impl Channel {
    /// Create a channel and the receiving end of its outbound queue.
    pub fn new(
        id: u64,
        direction: Direction,
        remote_addr: SocketAddr,
        queue_size: usize,
        cancel: CancellationToken,
    ) -> (Arc<Self>, MessageQueueReceiver) {
        let (queue, rx) = mpsc::channel(queue_size.max(1));
        let queued = Arc::new(AtomicUsize::new(0));
        let channel = Arc::new(Self {
            id,
            direction,
            remote_addr,
            peer: RwLock::new(None),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            queue,
            queued: queued.clone(),
            disconnect_reason: Mutex::new(None),
            outstanding_ping: Mutex::new(None),
            cancel,
        });
        (channel, MessageQueueReceiver { rx, queued })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The handshaken peer, if any.
    pub fn peer(&self) -> Option<Peer> {
        self.peer.read().clone()
    }

    pub fn peer_id(&self) -> Option<String> {
        self.peer.read().as_ref().map(|p| p.peer_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the outbound queue is empty.
    pub fn is_idle(&self) -> bool {
        self.queued.load(Ordering::Acquire) == 0
    }

    /// Queue a message for the writer task.
    ///
    /// A full queue disconnects the peer with `MessageQueueFull`.
    pub fn send(&self, message: Message) -> Result<()> {
        if self.is_closed() || self.cancel.is_cancelled() {
            return Err(P2pError::ChannelClosed);
        }
        self.queued.fetch_add(1, Ordering::AcqRel);
        match self.queue.try_send(message) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self
                    .queued
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
                match e {
                    TrySendError::Full(_) => {
                        warn!("{self}: message queue full, disconnecting");
                        self.disconnect(ReasonCode::MessageQueueFull);
                        Err(P2pError::QueueFull)
                    }
                    TrySendError::Closed(_) => Err(P2pError::ChannelClosed),
                }
            }
        }
    }

    /// Close the connection, telling the peer why. Only the first reason
    /// is sent.
    pub fn disconnect(&self, reason: ReasonCode) {
        {
            let mut slot = self.disconnect_reason.lock();
            if slot.is_none() && !self.cancel.is_cancelled() {
                debug!("{self}: disconnecting ({reason:?})");
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    /// Close the connection without a DISCONNECT message.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn disconnect_reason(&self) -> Option<ReasonCode> {
        *self.disconnect_reason.lock()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Mark the channel active for `peer`. Returns `false` if it already
    /// was, leaving the first peer in place, or if it is shutting down.
    pub(crate) fn set_active(&self, peer: Peer) -> bool {
        let mut slot = self.peer.write();
        if self.is_closed()
            || self.cancel.is_cancelled()
            || self.active.swap(true, Ordering::AcqRel)
        {
            return false;
        }
        *slot = Some(peer);
        true
    }

    /// Clear the active flag. Returns `true` only for the call that
    /// actually cleared it.
    pub(crate) fn set_inactive(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Mark closed and cancel the connection. Returns `true` only the
    /// first time.
    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.cancel.cancel();
        first
    }

    /// Remember a ping we are about to send.
    pub fn record_ping(&self, timestamp: u64) {
        *self.outstanding_ping.lock() = Some((timestamp, Instant::now()));
    }

    /// Match a pong against the outstanding ping and update the peer's
    /// latency. Returns the measured latency in milliseconds.
    pub fn on_pong(&self, timestamp: u64) -> Option<u64> {
        let sent = {
            let mut outstanding = self.outstanding_ping.lock();
            match *outstanding {
                Some((ts, sent)) if ts == timestamp => {
                    *outstanding = None;
                    sent
                }
                _ => return None,
            }
        };
        let latency = u64::try_from(sent.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Some(peer) = self.peer.write().as_mut() {
            peer.latency_ms = latency;
        }
        Some(latency)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        };
        write!(f, "channel#{}({dir} {})", self.id, self.remote_addr)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("remote_addr", &self.remote_addr)
            .field("peer_id", &self.peer_id())
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::peer::CapabilitySet,
        assert_matches::assert_matches,
        tessera_ledger_api::Network,
    };

    pub(crate) fn test_peer(peer_id: &str, ip: &str) -> Peer {
        Peer {
            network: Network::Devnet,
            network_version: 1,
            ip: ip.to_string(),
            port: 5161,
            client_id: "test".to_string(),
            peer_id: peer_id.to_string(),
            capabilities: CapabilitySet::for_network(Network::Devnet),
            latest_block_number: 0,
            latency_ms: 0,
        }
    }

    pub(crate) fn test_channel(id: u64, addr: &str, queue: usize) -> (Arc<Channel>, MessageQueueReceiver) {
        Channel::new(
            id,
            Direction::Inbound,
            addr.parse().unwrap(),
            queue,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_queue_tracks_idle() {
        let (channel, mut rx) = test_channel(1, "10.0.0.1:4000", 4);
        assert!(channel.is_idle());
        channel.send(Message::GetNodes).unwrap();
        assert!(!channel.is_idle());
        assert_eq!(rx.recv().await, Some(Message::GetNodes));
        assert!(channel.is_idle());
    }

    #[test]
    fn test_full_queue_disconnects() {
        let (channel, _rx) = test_channel(1, "10.0.0.1:4000", 1);
        channel.send(Message::GetNodes).unwrap();
        assert_matches!(channel.send(Message::GetNodes), Err(P2pError::QueueFull));
        assert_eq!(channel.disconnect_reason(), Some(ReasonCode::MessageQueueFull));
        assert!(channel.cancel_token().is_cancelled());
        assert_matches!(channel.send(Message::GetNodes), Err(P2pError::ChannelClosed));
    }

    #[test]
    fn test_first_disconnect_reason_wins() {
        let (channel, _rx) = test_channel(1, "10.0.0.1:4000", 1);
        channel.disconnect(ReasonCode::BadPeer);
        channel.disconnect(ReasonCode::TooManyPeers);
        assert_eq!(channel.disconnect_reason(), Some(ReasonCode::BadPeer));
    }

    #[test]
    fn test_activate_and_close_once() {
        let (channel, _rx) = test_channel(1, "10.0.0.1:4000", 1);
        assert!(channel.set_active(test_peer(&"aa".repeat(20), "10.0.0.1")));
        assert!(!channel.set_active(test_peer(&"bb".repeat(20), "10.0.0.1")));
        assert_eq!(channel.peer_id(), Some("aa".repeat(20)));

        assert!(channel.close());
        assert!(!channel.close());
        assert!(channel.set_inactive());
        assert!(!channel.set_inactive());
    }

    #[test]
    fn test_pong_must_match_outstanding_ping() {
        let (channel, _rx) = test_channel(1, "10.0.0.1:4000", 1);
        channel.set_active(test_peer(&"aa".repeat(20), "10.0.0.1"));
        assert_eq!(channel.on_pong(5), None);
        channel.record_ping(7);
        assert_eq!(channel.on_pong(6), None);
        assert!(channel.on_pong(7).is_some());
        assert_eq!(channel.on_pong(7), None);
    }
}
