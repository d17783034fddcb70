//! Configuration for the peer-to-peer layer.

use {
    crate::ip_filter::IpFilter,
    std::{net::SocketAddr, time::Duration},
    tessera_ledger_api::Network,
    thiserror::Error,
};

/// Configuration for the P2P network.
///
/// Controls wire limits, connection ceilings, timers and seed sources.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Network this node belongs to. Peers on another network are refused.
    pub network: Network,

    /// Protocol version advertised in the handshake. Must match exactly.
    pub network_version: u16,

    /// Free-form client identifier sent to peers.
    pub client_id: String,

    /// Local address to accept connections on.
    /// Default: `0.0.0.0:5161`
    pub listen_addr: SocketAddr,

    /// IP we claim in handshakes. Peers compare it to the socket address.
    pub advertised_ip: String,

    /// Port we claim in handshakes.
    pub advertised_port: u16,

    /// Frame header version. Frames carrying any other version are fatal.
    pub frame_version: u16,

    /// Largest body a single frame may carry. Longer messages are chunked.
    pub max_frame_body_size: usize,

    /// Largest logical message, in bytes, across all of its frames.
    pub max_packet_size: usize,

    /// Multi-frame messages reassembled concurrently per connection. The
    /// oldest in-flight message is dropped when exceeded.
    pub reassembly_capacity: usize,

    /// Ceiling on inbound connections.
    pub max_inbound_connections: usize,

    /// Ceiling on inbound connections from a single IP.
    pub max_inbound_connections_per_ip: usize,

    /// Ceiling on outbound connections the node manager will open.
    pub max_outbound_connections: usize,

    /// Outbound messages buffered per channel before the peer is dropped.
    pub max_message_queue_size: usize,

    /// Disconnect a channel that sends nothing for this long.
    pub channel_idle_timeout: Duration,

    /// Give up on a dial after this long.
    pub connect_timeout: Duration,

    /// Maximum age of a handshake timestamp.
    pub handshake_expiry: Duration,

    /// Do not re-dial a node within this window.
    pub reconnect_wait: Duration,

    /// Keepalive ping period.
    pub ping_interval: Duration,

    /// Peer-exchange (`GET_NODES`) period.
    pub get_nodes_interval: Duration,

    /// Node-manager connect loop period.
    pub connect_interval: Duration,

    /// Node-manager seed fetch period.
    pub fetch_interval: Duration,

    /// Capacity of the dial candidate queue.
    pub node_queue_capacity: usize,

    /// Addresses returned in one `NODES` reply.
    pub max_nodes_per_reply: usize,

    /// Number of random peers each newly pending transaction is sent to.
    pub relay_redundancy: usize,

    /// Nodes queued for dialing at start.
    pub seed_nodes: Vec<SocketAddr>,

    /// `host:port` names resolved for fresh candidates on every fetch.
    pub dns_seeds: Vec<String>,

    /// Allow/deny rules checked before accepting a connection.
    pub ip_filter: IpFilter,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            network_version: 1,
            client_id: format!("tessera/v{}", env!("CARGO_PKG_VERSION")),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5161)),
            advertised_ip: "127.0.0.1".to_string(),
            advertised_port: 5161,
            frame_version: 0,
            max_frame_body_size: 128 * 1024,
            max_packet_size: 16 * 1024 * 1024,
            reassembly_capacity: 16,
            max_inbound_connections: 1024,
            max_inbound_connections_per_ip: 5,
            max_outbound_connections: 128,
            max_message_queue_size: 4096,
            channel_idle_timeout: Duration::from_secs(2 * 60),
            connect_timeout: Duration::from_secs(10),
            handshake_expiry: Duration::from_secs(5 * 60),
            reconnect_wait: Duration::from_secs(2 * 60),
            ping_interval: Duration::from_secs(60),
            get_nodes_interval: Duration::from_secs(2 * 60),
            connect_interval: Duration::from_millis(500),
            fetch_interval: Duration::from_secs(100),
            node_queue_capacity: 1024,
            max_nodes_per_reply: 128,
            relay_redundancy: 8,
            seed_nodes: Vec::new(),
            dns_seeds: Vec::new(),
            ip_filter: IpFilter::default(),
        }
    }
}

impl P2pConfig {
    /// Create a config suitable for local testing: devnet, an ephemeral
    /// loopback port and short timers.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            network: Network::Devnet,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            advertised_port: 0,
            max_frame_body_size: 1024,
            max_packet_size: 1024 * 1024,
            max_inbound_connections: 16,
            max_outbound_connections: 8,
            channel_idle_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            reconnect_wait: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            get_nodes_interval: Duration::from_secs(2),
            connect_interval: Duration::from_millis(100),
            fetch_interval: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_body_size == 0 {
            return Err(ConfigError::ZeroFrameSize);
        }
        if self.max_packet_size < self.max_frame_body_size {
            return Err(ConfigError::PacketSmallerThanFrame {
                packet: self.max_packet_size,
                frame: self.max_frame_body_size,
            });
        }
        if i32::try_from(self.max_packet_size).is_err() {
            return Err(ConfigError::PacketSizeOverflow(self.max_packet_size));
        }
        if self.reassembly_capacity == 0 || self.node_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_message_queue_size == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.ping_interval.is_zero()
            || self.get_nodes_interval.is_zero()
            || self.connect_interval.is_zero()
            || self.fetch_interval.is_zero()
        {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}

/// Errors from [`P2pConfig::validate`] and config parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_frame_body_size must be > 0")]
    ZeroFrameSize,

    #[error("max_packet_size ({packet}) must be >= max_frame_body_size ({frame})")]
    PacketSmallerThanFrame { packet: usize, frame: usize },

    #[error("max_packet_size {0} does not fit the wire format")]
    PacketSizeOverflow(usize),

    #[error("queue and cache capacities must be > 0")]
    ZeroCapacity,

    #[error("timer intervals must be > 0")]
    ZeroInterval,

    #[error("invalid ip filter rule: {0}")]
    InvalidIpFilterRule(String),
}
