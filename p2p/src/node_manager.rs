//! Connection scheduler: decides which nodes to dial and when.
//!
//! Candidates come from static seeds, DNS seeds and `NODES` replies. They
//! sit in a bounded newest-first queue; a connect loop pops one per tick
//! and dials it unless it is ourselves, already connected, or was dialed
//! within the reconnect cool-down.

use {
    crate::{channel_manager::ChannelManager, config::P2pConfig, peer::Node},
    futures::future::BoxFuture,
    log::{debug, info, warn},
    lru::LruCache,
    parking_lot::Mutex,
    std::{
        collections::VecDeque,
        io,
        net::SocketAddr,
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
};

/// Delay before the connect loop's first tick.
const CONNECT_LOOP_DELAY: Duration = Duration::from_millis(100);

/// Capacity of the last-dial cache.
const LAST_CONNECT_CAPACITY: usize = 1024;

/// Opens an outbound connection to a node.
pub trait Dialer: Send + Sync {
    fn dial(&self, node: Node);
}

/// Resolves a seed name into node addresses.
pub trait SeedResolver: Send + Sync {
    fn resolve<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<SocketAddr>>>;
}

/// Resolves seed names through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsSeedResolver;

impl SeedResolver for DnsSeedResolver {
    fn resolve<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<SocketAddr>>> {
        Box::pin(async move { Ok(tokio::net::lookup_host(name).await?.collect()) })
    }
}

pub struct NodeManager {
    queue: Mutex<VecDeque<Node>>,
    last_connect: Mutex<LruCache<Node, Instant>>,
    channel_manager: Arc<ChannelManager>,
    /// Addresses that refer to ourselves.
    own_nodes: Vec<Node>,
    queue_capacity: usize,
    max_outbound: usize,
    reconnect_wait: Duration,
    connect_interval: Duration,
    fetch_interval: Duration,
    seed_nodes: Vec<SocketAddr>,
    dns_seeds: Vec<String>,
}

impl NodeManager {
    pub fn new(config: &P2pConfig, channel_manager: Arc<ChannelManager>) -> Self {
        let mut own_nodes = vec![Node::new(&config.advertised_ip, config.advertised_port)];
        if !config.listen_addr.ip().is_unspecified() {
            own_nodes.push(Node::from(config.listen_addr));
        }
        Self {
            queue: Mutex::new(VecDeque::new()),
            last_connect: Mutex::new(LruCache::new(LAST_CONNECT_CAPACITY)),
            channel_manager,
            own_nodes,
            queue_capacity: config.node_queue_capacity,
            max_outbound: config.max_outbound_connections,
            reconnect_wait: config.reconnect_wait,
            connect_interval: config.connect_interval,
            fetch_interval: config.fetch_interval,
            seed_nodes: config.seed_nodes.clone(),
            dns_seeds: config.dns_seeds.clone(),
        }
    }

    // ── Queue ───────────────────────────────────────────────────────────

    /// Queue a candidate at the front. The oldest candidates fall off the
    /// tail when the queue is full.
    pub fn add_node(&self, node: Node) {
        if !node.is_valid() {
            debug!("ignoring invalid node {node}");
            return;
        }
        let mut queue = self.queue.lock();
        queue.push_front(node);
        queue.truncate(self.queue_capacity);
    }

    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = Node>) {
        for node in nodes {
            self.add_node(node);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    fn is_own(&self, node: &Node) -> bool {
        self.own_nodes.contains(node)
    }

    // ── Loops ───────────────────────────────────────────────────────────

    /// One connect tick. Returns the node to dial, if any, and records
    /// `now` as its last dial time.
    pub fn do_connect(&self, now: Instant) -> Option<Node> {
        if self.channel_manager.outbound_count() >= self.max_outbound {
            return None;
        }
        loop {
            let node = self.queue.lock().pop_front()?;
            if self.is_own(&node) || self.channel_manager.is_connected_to(&node) {
                continue;
            }
            let mut last_connect = self.last_connect.lock();
            let cooling = last_connect
                .peek(&node)
                .is_some_and(|last| now.saturating_duration_since(*last) < self.reconnect_wait);
            if cooling {
                continue;
            }
            last_connect.put(node.clone(), now);
            return Some(node);
        }
    }

    /// Resolve every DNS seed and queue the results. Lookup failures are
    /// logged and skipped. Returns the number of nodes queued.
    pub async fn do_fetch(&self, resolver: &dyn SeedResolver) -> usize {
        let mut queued = 0usize;
        for name in &self.dns_seeds {
            match resolver.resolve(name).await {
                Ok(addrs) => {
                    debug!("seed {name} resolved to {} nodes", addrs.len());
                    queued = queued.saturating_add(addrs.len());
                    self.add_nodes(addrs.into_iter().map(Node::from));
                }
                Err(e) => warn!("failed to resolve seed {name}: {e}"),
            }
        }
        queued
    }

    /// Queue static seeds and spawn the connect and fetch loops.
    pub fn start(
        self: &Arc<Self>,
        dialer: Arc<dyn Dialer>,
        resolver: Arc<dyn SeedResolver>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.add_nodes(self.seed_nodes.iter().copied().map(Node::from));
        info!(
            "node manager started with {} seed nodes and {} dns seeds",
            self.seed_nodes.len(),
            self.dns_seeds.len()
        );

        let connect = {
            let manager = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(CONNECT_LOOP_DELAY) => {}
                }
                let mut interval = tokio::time::interval(manager.connect_interval);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            if let Some(node) = manager.do_connect(Instant::now()) {
                                debug!("dialing {node}");
                                dialer.dial(node);
                            }
                        }
                    }
                }
            })
        };

        let fetch = {
            let manager = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(manager.fetch_interval);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            manager.do_fetch(resolver.as_ref()).await;
                        }
                    }
                }
            })
        };

        vec![connect, fetch]
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            channel::tests::{test_channel, test_peer},
            ip_filter::IpFilter,
        },
        std::collections::HashMap,
        tessera_ledger_api::{MemoryLedger, Network},
    };

    fn setup(config: &P2pConfig) -> (NodeManager, Arc<ChannelManager>) {
        let cm = Arc::new(ChannelManager::new(
            "00".repeat(20),
            Network::Devnet,
            IpFilter::default(),
            Arc::new(MemoryLedger::new()),
        ));
        (NodeManager::new(config, cm.clone()), cm)
    }

    fn config() -> P2pConfig {
        P2pConfig {
            advertised_ip: "10.0.0.100".to_string(),
            advertised_port: 5161,
            reconnect_wait: Duration::from_secs(120),
            node_queue_capacity: 4,
            ..P2pConfig::dev_default()
        }
    }

    #[test]
    fn test_reconnect_backoff() {
        let (nm, _) = setup(&config());
        let node = Node::new("10.0.0.1", 5161);
        let t0 = Instant::now();

        nm.add_node(node.clone());
        assert_eq!(nm.do_connect(t0), Some(node.clone()));

        nm.add_node(node.clone());
        let early = t0.checked_add(Duration::from_secs(119)).unwrap();
        assert_eq!(nm.do_connect(early), None);
        assert_eq!(nm.queue_len(), 0);

        nm.add_node(node.clone());
        let later = t0.checked_add(Duration::from_secs(120)).unwrap();
        assert_eq!(nm.do_connect(later), Some(node));
    }

    #[test]
    fn test_skips_self_and_connected() {
        let (nm, cm) = setup(&config());
        let (ch, _rx) = test_channel(1, "10.0.0.2:7000", 4);
        cm.add(ch.clone());
        cm.activate(&ch, test_peer(&"ab".repeat(20), "10.0.0.2")).unwrap();

        let fresh = Node::new("10.0.0.3", 5161);
        nm.add_node(fresh.clone());
        nm.add_node(Node::new("10.0.0.2", 5161));
        nm.add_node(Node::new("10.0.0.100", 5161));

        assert_eq!(nm.do_connect(Instant::now()), Some(fresh));
    }

    #[test]
    fn test_one_dial_per_tick() {
        let (nm, _) = setup(&config());
        nm.add_node(Node::new("10.0.0.1", 1));
        nm.add_node(Node::new("10.0.0.2", 1));
        assert!(nm.do_connect(Instant::now()).is_some());
        assert_eq!(nm.queue_len(), 1);
    }

    #[test]
    fn test_outbound_ceiling() {
        let config = P2pConfig {
            max_outbound_connections: 0,
            ..config()
        };
        let (nm, _) = setup(&config);
        nm.add_node(Node::new("10.0.0.1", 1));
        assert_eq!(nm.do_connect(Instant::now()), None);
        assert_eq!(nm.queue_len(), 1);
    }

    #[test]
    fn test_queue_is_newest_first_and_bounded() {
        let (nm, _) = setup(&config());
        for port in 1..=6u16 {
            nm.add_node(Node::new("10.0.0.1", port));
        }
        nm.add_node(Node::new("not-an-ip", 1));
        assert_eq!(nm.queue_len(), 4);
        let now = Instant::now();
        let ports: Vec<u16> = std::iter::from_fn(|| nm.do_connect(now))
            .map(|n| n.port)
            .collect();
        assert_eq!(ports, vec![6, 5, 4, 3]);
    }

    struct StaticResolver(HashMap<String, Vec<SocketAddr>>);

    impl SeedResolver for StaticResolver {
        fn resolve<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<SocketAddr>>> {
            let result = self
                .0
                .get(name)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()));
            Box::pin(async move { result })
        }
    }

    #[tokio::test]
    async fn test_fetch_skips_failed_lookups() {
        let config = P2pConfig {
            dns_seeds: vec!["missing.example:5161".to_string(), "seed.example:5161".to_string()],
            ..config()
        };
        let (nm, _) = setup(&config);
        let resolver = StaticResolver(HashMap::from([(
            "seed.example:5161".to_string(),
            vec!["10.1.0.1:5161".parse().unwrap(), "10.1.0.2:5161".parse().unwrap()],
        )]));
        assert_eq!(nm.do_fetch(&resolver).await, 2);
        assert_eq!(nm.queue_len(), 2);
    }
}
