//! Registry of every open channel.
//!
//! The [`ChannelManager`] is the single source of truth for "who are we
//! connected to?". One mutex guards both indexes so that every mutation,
//! and in particular the check-and-insert performed on activation, is
//! atomic as a whole.

use {
    crate::{
        channel::{Channel, Direction},
        config::P2pConfig,
        ip_filter::IpFilter,
        message::ReasonCode,
        peer::{Node, Peer},
    },
    log::{debug, info},
    parking_lot::Mutex,
    rand::seq::SliceRandom,
    std::{
        collections::HashMap,
        net::{IpAddr, SocketAddr},
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
    tessera_ledger_api::{Key, Ledger, Network},
};

#[derive(Default)]
struct Registry {
    /// Every registered channel, by remote socket address.
    channels: HashMap<SocketAddr, Arc<Channel>>,
    /// Active channels, by peer id.
    active: HashMap<String, Arc<Channel>>,
}

pub struct ChannelManager {
    registry: Mutex<Registry>,
    own_peer_id: String,
    network: Network,
    ip_filter: IpFilter,
    ledger: Arc<dyn Ledger>,
    next_id: AtomicU64,
}

impl ChannelManager {
    pub fn new(own_peer_id: String, network: Network, ip_filter: IpFilter, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            own_peer_id,
            network,
            ip_filter,
            ledger,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registry for a node identified by `key`, using the network and IP
    /// filter from `config`.
    pub fn for_node(config: &P2pConfig, key: &Key, ledger: Arc<dyn Ledger>) -> Self {
        Self::new(
            key.address().to_hex(),
            config.network,
            config.ip_filter.clone(),
            ledger,
        )
    }

    pub fn own_peer_id(&self) -> &str {
        &self.own_peer_id
    }

    pub fn next_channel_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Whether a new inbound connection from `addr` may be set up.
    pub fn is_acceptable(&self, addr: &SocketAddr) -> bool {
        if !self.ip_filter.is_accepted(&addr.ip()) {
            debug!("{addr} refused by ip filter");
            return false;
        }
        !self.is_connected(addr)
    }

    /// Register a fresh channel. Returns `false` if another channel is
    /// already registered for the same address.
    pub fn add(&self, channel: Arc<Channel>) -> bool {
        let mut registry = self.registry.lock();
        let addr = channel.remote_addr();
        if registry.channels.contains_key(&addr) {
            return false;
        }
        registry.channels.insert(addr, channel);
        true
    }

    /// Unregister `channel`, deactivating it if needed. Entries that now
    /// belong to a different channel are left alone.
    pub fn remove(&self, channel: &Channel) {
        let mut registry = self.registry.lock();
        let addr = channel.remote_addr();
        if registry
            .channels
            .get(&addr)
            .is_some_and(|c| c.id() == channel.id())
        {
            registry.channels.remove(&addr);
        }
        if channel.set_inactive() {
            if let Some(peer_id) = channel.peer_id() {
                if registry
                    .active
                    .get(&peer_id)
                    .is_some_and(|c| c.id() == channel.id())
                {
                    registry.active.remove(&peer_id);
                    info!("peer {peer_id} disconnected ({channel})");
                }
            }
        }
    }

    /// Promote `channel` to active for `peer`.
    ///
    /// Refuses our own peer id, a peer id that is already active, a mainnet
    /// validator connecting from an IP that already has an active channel,
    /// and a channel that is already active.
    pub fn activate(&self, channel: &Arc<Channel>, peer: Peer) -> Result<(), ReasonCode> {
        let is_validator = self.network == Network::Mainnet
            && self.ledger.validators().iter().any(|v| *v == peer.peer_id);

        let mut registry = self.registry.lock();
        if peer.peer_id == self.own_peer_id || registry.active.contains_key(&peer.peer_id) {
            return Err(ReasonCode::DuplicatedPeerId);
        }
        if is_validator {
            let ip = channel.remote_addr().ip();
            if registry.active.values().any(|c| c.remote_addr().ip() == ip) {
                return Err(ReasonCode::ValidatorIpLimited);
            }
        }
        let peer_id = peer.peer_id.clone();
        let shown = peer.to_string();
        if !channel.set_active(peer) {
            return Err(ReasonCode::HandshakeExists);
        }
        registry.active.insert(peer_id, channel.clone());
        info!("peer {shown} active ({channel})");
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Whether any channel is registered for exactly this socket address.
    pub fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.registry.lock().channels.contains_key(addr)
    }

    /// Whether we have a channel to `node`, either dialed directly or an
    /// active peer listening there.
    pub fn is_connected_to(&self, node: &Node) -> bool {
        let registry = self.registry.lock();
        if node
            .socket_addr()
            .is_some_and(|addr| registry.channels.contains_key(&addr))
        {
            return true;
        }
        registry.active.values().any(|c| {
            c.peer()
                .is_some_and(|p| p.ip == node.ip && p.port == node.port)
        })
    }

    /// Whether some active channel comes from `ip`.
    pub fn is_active_ip(&self, ip: &IpAddr) -> bool {
        self.registry
            .lock()
            .active
            .values()
            .any(|c| c.remote_addr().ip() == *ip)
    }

    pub fn is_active_peer(&self, peer_id: &str) -> bool {
        self.registry.lock().active.contains_key(peer_id)
    }

    /// Active peers, with their last measured latency.
    pub fn active_peers(&self) -> Vec<Peer> {
        self.registry
            .lock()
            .active
            .values()
            .filter_map(|c| c.peer())
            .collect()
    }

    /// Listening addresses of active peers.
    pub fn active_addresses(&self) -> Vec<Node> {
        self.active_peers().iter().map(Peer::listen_node).collect()
    }

    pub fn active_channels(&self) -> Vec<Arc<Channel>> {
        self.registry.lock().active.values().cloned().collect()
    }

    /// Active channels whose outbound queue is empty.
    pub fn idle_channels(&self) -> Vec<Arc<Channel>> {
        self.registry
            .lock()
            .active
            .values()
            .filter(|c| c.is_idle())
            .cloned()
            .collect()
    }

    /// Up to `n` active channels picked at random.
    pub fn sample_active(&self, n: usize) -> Vec<Arc<Channel>> {
        let mut channels = self.active_channels();
        channels.shuffle(&mut rand::rng());
        channels.truncate(n);
        channels
    }

    /// Number of registered channels.
    pub fn size(&self) -> usize {
        self.registry.lock().channels.len()
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().active.len()
    }

    pub fn inbound_count(&self) -> usize {
        self.count(Direction::Inbound)
    }

    pub fn outbound_count(&self) -> usize {
        self.count(Direction::Outbound)
    }

    fn count(&self, direction: Direction) -> usize {
        self.registry
            .lock()
            .channels
            .values()
            .filter(|c| c.direction() == direction)
            .count()
    }

    /// Shut down every registered channel.
    pub fn close_all(&self) {
        let channels: Vec<_> = self.registry.lock().channels.values().cloned().collect();
        for channel in channels {
            channel.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            channel::tests::{test_channel, test_peer},
            ip_filter::{FilterAction, IpFilterRule},
        },
        std::thread,
        tessera_ledger_api::MemoryLedger,
    };

    fn manager(network: Network) -> (ChannelManager, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let manager = ChannelManager::new(
            "00".repeat(20),
            network,
            IpFilter::default(),
            ledger.clone(),
        );
        (manager, ledger)
    }

    #[test]
    fn test_duplicate_peer_refused_original_kept() {
        let (cm, _) = manager(Network::Devnet);
        let (a, _ra) = test_channel(1, "10.0.0.1:4000", 4);
        let (b, _rb) = test_channel(2, "10.0.0.2:4000", 4);
        assert!(cm.add(a.clone()));
        assert!(cm.add(b.clone()));

        let id = "ab".repeat(20);
        assert_eq!(cm.activate(&a, test_peer(&id, "10.0.0.1")), Ok(()));
        assert_eq!(
            cm.activate(&b, test_peer(&id, "10.0.0.2")),
            Err(ReasonCode::DuplicatedPeerId)
        );

        // Removing the refused channel leaves the original active.
        cm.remove(&b);
        assert!(cm.is_active_peer(&id));
        assert!(a.is_active());
        assert_eq!(cm.size(), 1);
    }

    #[test]
    fn test_own_peer_id_refused() {
        let (cm, _) = manager(Network::Devnet);
        let (a, _ra) = test_channel(1, "10.0.0.1:4000", 4);
        cm.add(a.clone());
        assert_eq!(
            cm.activate(&a, test_peer(&"00".repeat(20), "10.0.0.1")),
            Err(ReasonCode::DuplicatedPeerId)
        );
    }

    #[test]
    fn test_validator_ip_limit_on_mainnet() {
        let (cm, ledger) = manager(Network::Mainnet);
        let validator = "cd".repeat(20);
        ledger.set_validators(vec![validator.clone()]);

        let (a, _ra) = test_channel(1, "10.0.0.1:4000", 4);
        let (b, _rb) = test_channel(2, "10.0.0.1:4001", 4);
        cm.add(a.clone());
        cm.add(b.clone());
        cm.activate(&a, test_peer(&"ab".repeat(20), "10.0.0.1")).unwrap();
        assert_eq!(
            cm.activate(&b, test_peer(&validator, "10.0.0.1")),
            Err(ReasonCode::ValidatorIpLimited)
        );
    }

    #[test]
    fn test_second_activation_is_handshake_exists() {
        let (cm, _) = manager(Network::Devnet);
        let (a, _ra) = test_channel(1, "10.0.0.1:4000", 4);
        cm.add(a.clone());
        cm.activate(&a, test_peer(&"ab".repeat(20), "10.0.0.1")).unwrap();
        assert_eq!(
            cm.activate(&a, test_peer(&"ef".repeat(20), "10.0.0.1")),
            Err(ReasonCode::HandshakeExists)
        );
    }

    #[test]
    fn test_remove_is_idempotent_and_scoped() {
        let (cm, _) = manager(Network::Devnet);
        let (a, _ra) = test_channel(1, "10.0.0.1:4000", 4);
        cm.add(a.clone());
        cm.activate(&a, test_peer(&"ab".repeat(20), "10.0.0.1")).unwrap();
        cm.remove(&a);
        cm.remove(&a);
        assert_eq!(cm.size(), 0);
        assert_eq!(cm.active_count(), 0);

        // A stale channel with the same address does not evict its successor.
        let (fresh, _rf) = test_channel(2, "10.0.0.1:4000", 4);
        cm.add(fresh.clone());
        cm.remove(&a);
        assert!(cm.is_connected(&fresh.remote_addr()));
    }

    #[test]
    fn test_queries() {
        let (cm, _) = manager(Network::Devnet);
        let (a, _ra) = test_channel(1, "10.0.0.1:4000", 4);
        let (b, _rb) = test_channel(2, "10.0.0.2:4000", 4);
        cm.add(a.clone());
        cm.add(b.clone());
        cm.activate(&a, test_peer(&"ab".repeat(20), "10.0.0.1")).unwrap();

        assert_eq!(cm.size(), 2);
        assert_eq!(cm.inbound_count(), 2);
        assert_eq!(cm.outbound_count(), 0);
        assert!(cm.is_active_ip(&"10.0.0.1".parse().unwrap()));
        assert!(!cm.is_active_ip(&"10.0.0.2".parse().unwrap()));
        assert_eq!(cm.active_addresses(), vec![Node::new("10.0.0.1", 5161)]);
        assert!(cm.is_connected_to(&Node::new("10.0.0.1", 5161)));
        assert!(cm.is_connected_to(&Node::new("10.0.0.2", 4000)));
        assert!(!cm.is_connected_to(&Node::new("10.0.0.3", 5161)));
        assert_eq!(cm.idle_channels().len(), 1);
        assert_eq!(cm.sample_active(8).len(), 1);
        assert!(!cm.add(a.clone()));
    }

    #[test]
    fn test_ip_filter_applies_before_setup() {
        let ledger = Arc::new(MemoryLedger::new());
        let filter = IpFilter::new(vec![
            IpFilterRule::parse(FilterAction::Reject, "10.0.0.0/8").unwrap(),
        ]);
        let cm = ChannelManager::new("00".repeat(20), Network::Devnet, filter, ledger);
        assert!(!cm.is_acceptable(&"10.1.2.3:5000".parse().unwrap()));
        assert!(cm.is_acceptable(&"192.168.0.1:5000".parse().unwrap()));
    }

    #[test]
    fn test_concurrent_activation_admits_one() {
        let (cm, _) = manager(Network::Devnet);
        let cm = Arc::new(cm);
        let id = "ab".repeat(20);
        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let cm = cm.clone();
                let id = id.clone();
                thread::spawn(move || {
                    let (ch, rx) = test_channel(i, &format!("10.0.0.{}:4000", i + 1), 4);
                    cm.add(ch.clone());
                    let ok = cm.activate(&ch, test_peer(&id, "10.0.0.1")).is_ok();
                    (ok, ch, rx)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|(ok, ..)| *ok).count(), 1);
        assert_eq!(cm.active_count(), 1);
    }
}
