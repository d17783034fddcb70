//! Peer identity, capabilities and dial candidates.

use {
    serde::{Deserialize, Serialize},
    std::{
        collections::BTreeSet,
        fmt,
        net::{IpAddr, SocketAddr},
    },
    tessera_ledger_api::Network,
};

/// Longest accepted IP string.
pub const MAX_IP_LEN: usize = 128;
/// Client ids must be shorter than this.
pub const MAX_CLIENT_ID_LEN: usize = 128;
/// Peer ids are the hex form of a 20-byte address.
pub const PEER_ID_LEN: usize = 40;
/// Most capabilities a peer may advertise.
pub const MAX_CAPABILITIES: usize = 128;

// ── Capabilities ────────────────────────────────────────────────────────────

/// A protocol feature a peer supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Full mainnet/devnet protocol.
    Tessera,
    /// Full testnet protocol.
    TesseraTestnet,
    /// Serves block headers and parts for fast sync.
    FastSync,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Self::Tessera => "TESSERA",
            Self::TesseraTestnet => "TESSERA_TESTNET",
            Self::FastSync => "FAST_SYNC",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "TESSERA" => Some(Self::Tessera),
            "TESSERA_TESTNET" => Some(Self::TesseraTestnet),
            "FAST_SYNC" => Some(Self::FastSync),
            _ => None,
        }
    }

    /// Capability a peer must advertise to join `network`.
    pub fn required_for(network: Network) -> Self {
        match network {
            Network::Testnet => Self::TesseraTestnet,
            Network::Mainnet | Network::Devnet => Self::Tessera,
        }
    }
}

/// Set of capabilities. Unknown names are ignored when parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self(capabilities.into_iter().collect())
    }

    /// The set this node advertises on `network`.
    pub fn for_network(network: Network) -> Self {
        Self::new([Capability::required_for(network), Capability::FastSync])
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self(
            names
                .iter()
                .filter_map(|n| Capability::from_name(n.as_ref()))
                .collect(),
        )
    }

    pub fn to_names(&self) -> Vec<String> {
        self.0.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn is_supported(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Peer ────────────────────────────────────────────────────────────────────

/// A remote node that completed the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub network: Network,
    pub network_version: u16,
    /// IP as observed on the socket.
    pub ip: String,
    /// Listening port the peer advertised.
    pub port: u16,
    pub client_id: String,
    /// Hex address of the peer's coinbase key.
    pub peer_id: String,
    pub capabilities: CapabilitySet,
    pub latest_block_number: u64,
    /// Last measured ping round trip, in milliseconds.
    pub latency_ms: u64,
}

impl Peer {
    /// Check the field bounds every peer must satisfy.
    pub fn validate(&self) -> bool {
        self.ip.len() <= MAX_IP_LEN
            && self.port != 0
            && self.client_id.len() < MAX_CLIENT_ID_LEN
            && self.peer_id.len() == PEER_ID_LEN
            && self.peer_id.bytes().all(|b| b.is_ascii_hexdigit())
            && self.capabilities.len() <= MAX_CAPABILITIES
    }

    /// Where the peer accepts connections.
    pub fn listen_node(&self) -> Node {
        Node::new(&self.ip, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.peer_id, self.ip, self.port)
    }
}

// ── Node ────────────────────────────────────────────────────────────────────

/// A dial candidate. Two nodes are the same if ip and port match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    pub ip: String,
    pub port: u16,
}

impl Node {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
        }
    }

    /// Resolve to a socket address if `ip` is a literal address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.ip.parse().ok()?;
        Some(SocketAddr::new(ip, self.port))
    }

    /// Whether the node is worth queueing: a literal IP within bounds and
    /// a non-zero port.
    pub fn is_valid(&self) -> bool {
        self.ip.len() <= MAX_IP_LEN && self.port != 0 && self.socket_addr().is_some()
    }
}

impl From<SocketAddr> for Node {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
