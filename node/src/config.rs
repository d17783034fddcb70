//! TOML configuration file for `tessera-node`.
//!
//! Every key is optional. Missing keys keep the library defaults, and a
//! missing file is the same as an empty one. Durations are written in
//! human form (`"90s"`, `"2m"`, `"1h 30m"`).
//!
//! ```toml
//! network = "testnet"
//!
//! [p2p]
//! listen_addr = "0.0.0.0:5161"
//! advertised_ip = "203.0.113.7"
//! seed_nodes = ["198.51.100.1:5161"]
//! reconnect_wait = "2m"
//! reject = ["10.0.0.0/8"]
//!
//! [pool]
//! min_fee = 5000000
//! staged_expiry = "10m"
//! ```

use {
    log::{info, warn},
    serde::Deserialize,
    std::{
        fs,
        net::SocketAddr,
        path::{Path, PathBuf},
        time::Duration,
    },
    tessera_ledger_api::{Key, LedgerError, Network},
    tessera_p2p::{IpFilter, P2pConfig},
    tessera_pending_pool::{config::ConfigError as PoolConfigError, PoolConfig},
    thiserror::Error,
};

#[derive(Error, Debug)]
pub enum NodeConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid duration for {field}: {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: humantime::DurationError,
    },

    #[error("identity_seed must be 32 hex-encoded bytes")]
    InvalidSeed,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("p2p: {0}")]
    P2p(#[from] tessera_p2p::ConfigError),

    #[error("pool: {0}")]
    Pool(#[from] PoolConfigError),
}

pub type Result<T> = std::result::Result<T, NodeConfigError>;

/// Contents of the node's configuration file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// `mainnet`, `testnet` or `devnet`. Defaults to mainnet.
    pub network: Option<String>,

    /// Hex-encoded 32-byte secret seed. A fresh identity is generated on
    /// every start when unset.
    pub identity_seed: Option<String>,

    pub p2p: P2pSection,
    pub pool: PoolSection,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct P2pSection {
    pub listen_addr: Option<SocketAddr>,
    pub advertised_ip: Option<String>,
    pub advertised_port: Option<u16>,
    pub client_id: Option<String>,
    pub max_inbound_connections: Option<usize>,
    pub max_inbound_connections_per_ip: Option<usize>,
    pub max_outbound_connections: Option<usize>,
    pub max_message_queue_size: Option<usize>,
    pub max_frame_body_size: Option<usize>,
    pub max_packet_size: Option<usize>,
    pub relay_redundancy: Option<usize>,
    pub channel_idle_timeout: Option<String>,
    pub connect_timeout: Option<String>,
    pub handshake_expiry: Option<String>,
    pub reconnect_wait: Option<String>,
    pub ping_interval: Option<String>,
    pub get_nodes_interval: Option<String>,
    pub fetch_interval: Option<String>,
    pub seed_nodes: Vec<SocketAddr>,
    pub dns_seeds: Vec<String>,
    /// CIDR rules; reject rules are checked before accept rules.
    pub accept: Vec<String>,
    pub reject: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    pub max_timestamp_drift: Option<String>,
    pub max_nonce_gap: Option<u64>,
    pub max_staged: Option<usize>,
    pub staged_expiry: Option<String>,
    pub queue_capacity: Option<usize>,
    pub min_fee: Option<u64>,
    pub max_data_size: Option<usize>,
}

impl NodeConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| NodeConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| NodeConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn network(&self) -> Result<Network> {
        match &self.network {
            Some(name) => Ok(name.parse()?),
            None => Ok(Network::Mainnet),
        }
    }

    /// The node identity, from `identity_seed` or freshly generated.
    pub fn identity(&self) -> Result<Key> {
        let Some(seed) = &self.identity_seed else {
            info!("no identity_seed configured, generating an ephemeral key");
            return Ok(Key::new_random());
        };
        let seed: [u8; 32] = hex::decode(seed.trim())
            .map_err(|_| NodeConfigError::InvalidSeed)?
            .try_into()
            .map_err(|_| NodeConfigError::InvalidSeed)?;
        Ok(Key::from_seed(&seed)?)
    }

    /// Library defaults overlaid with the `[p2p]` section, validated.
    pub fn p2p_config(&self, network: Network) -> Result<P2pConfig> {
        let section = &self.p2p;
        let mut config = P2pConfig {
            network,
            ..P2pConfig::default()
        };

        overlay(&mut config.listen_addr, section.listen_addr);
        overlay(&mut config.advertised_ip, section.advertised_ip.clone());
        overlay(&mut config.advertised_port, section.advertised_port);
        overlay(&mut config.client_id, section.client_id.clone());
        overlay(
            &mut config.max_inbound_connections,
            section.max_inbound_connections,
        );
        overlay(
            &mut config.max_inbound_connections_per_ip,
            section.max_inbound_connections_per_ip,
        );
        overlay(
            &mut config.max_outbound_connections,
            section.max_outbound_connections,
        );
        overlay(
            &mut config.max_message_queue_size,
            section.max_message_queue_size,
        );
        overlay(&mut config.max_frame_body_size, section.max_frame_body_size);
        overlay(&mut config.max_packet_size, section.max_packet_size);
        overlay(&mut config.relay_redundancy, section.relay_redundancy);

        overlay(
            &mut config.channel_idle_timeout,
            duration("p2p.channel_idle_timeout", &section.channel_idle_timeout)?,
        );
        overlay(
            &mut config.connect_timeout,
            duration("p2p.connect_timeout", &section.connect_timeout)?,
        );
        overlay(
            &mut config.handshake_expiry,
            duration("p2p.handshake_expiry", &section.handshake_expiry)?,
        );
        overlay(
            &mut config.reconnect_wait,
            duration("p2p.reconnect_wait", &section.reconnect_wait)?,
        );
        overlay(
            &mut config.ping_interval,
            duration("p2p.ping_interval", &section.ping_interval)?,
        );
        overlay(
            &mut config.get_nodes_interval,
            duration("p2p.get_nodes_interval", &section.get_nodes_interval)?,
        );
        overlay(
            &mut config.fetch_interval,
            duration("p2p.fetch_interval", &section.fetch_interval)?,
        );

        config.seed_nodes.extend(section.seed_nodes.iter().copied());
        config.dns_seeds.extend(section.dns_seeds.iter().cloned());
        config.ip_filter = IpFilter::from_lists(&section.accept, &section.reject)?;

        config.validate()?;
        Ok(config)
    }

    /// Library defaults overlaid with the `[pool]` section, validated.
    pub fn pool_config(&self, network: Network) -> Result<PoolConfig> {
        let section = &self.pool;
        let mut config = PoolConfig {
            network,
            ..PoolConfig::default()
        };

        overlay(
            &mut config.max_timestamp_drift,
            duration("pool.max_timestamp_drift", &section.max_timestamp_drift)?,
        );
        overlay(&mut config.max_nonce_gap, section.max_nonce_gap);
        overlay(&mut config.max_staged, section.max_staged);
        overlay(
            &mut config.staged_expiry,
            duration("pool.staged_expiry", &section.staged_expiry)?,
        );
        overlay(&mut config.queue_capacity, section.queue_capacity);
        overlay(&mut config.min_fee, section.min_fee);
        overlay(&mut config.max_data_size, section.max_data_size);

        config.validate()?;
        Ok(config)
    }
}

fn overlay<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn duration(field: &'static str, value: &Option<String>) -> Result<Option<Duration>> {
    value
        .as_deref()
        .map(|text| {
            humantime::parse_duration(text)
                .map_err(|source| NodeConfigError::Duration { field, source })
        })
        .transpose()
}
