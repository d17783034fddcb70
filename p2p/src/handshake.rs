//! Signed HELLO/WORLD handshake bodies.
//!
//! The initiator sends HELLO, the acceptor answers WORLD. Both carry the
//! same [`HandshakeMessage`], signed by the sender's coinbase key. This
//! module performs the checks that need nothing but the message itself
//! and our config; registry checks (duplicate peer id, validator IP) are
//! done by [`crate::channel_manager::ChannelManager::activate`].

use {
    crate::{
        config::P2pConfig,
        message::ReasonCode,
        peer::{Capability, CapabilitySet, Peer},
    },
    serde::{Deserialize, Serialize},
    std::net::IpAddr,
    tessera_ledger_api::{key, Address, Key, Network},
};

/// Body of a HELLO or WORLD message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub network: Network,
    pub network_version: u16,
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
    pub client_id: String,
    pub capabilities: Vec<String>,
    pub latest_block_number: u64,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub public_key: [u8; 32],
    /// Signature over every preceding field.
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct SignedFields<'a> {
    network: Network,
    network_version: u16,
    peer_id: &'a str,
    ip: &'a str,
    port: u16,
    client_id: &'a str,
    capabilities: &'a [String],
    latest_block_number: u64,
    timestamp: u64,
    public_key: &'a [u8; 32],
}

impl HandshakeMessage {
    /// Build and sign our handshake.
    pub fn new(key: &Key, config: &P2pConfig, latest_block_number: u64, timestamp: u64) -> Self {
        let mut message = Self {
            network: config.network,
            network_version: config.network_version,
            peer_id: key.address().to_hex(),
            ip: config.advertised_ip.clone(),
            port: config.advertised_port,
            client_id: config.client_id.clone(),
            capabilities: CapabilitySet::for_network(config.network).to_names(),
            latest_block_number,
            timestamp,
            public_key: key.public_key(),
            signature: Vec::new(),
        };
        message.signature = key.sign(&message.signed_bytes());
        message
    }

    fn signed_bytes(&self) -> Vec<u8> {
        let fields = SignedFields {
            network: self.network,
            network_version: self.network_version,
            peer_id: &self.peer_id,
            ip: &self.ip,
            port: self.port,
            client_id: &self.client_id,
            capabilities: &self.capabilities,
            latest_block_number: self.latest_block_number,
            timestamp: self.timestamp,
            public_key: &self.public_key,
        };
        // Serializing plain owned data into a Vec cannot fail.
        bincode::serialize(&fields).unwrap_or_default()
    }

    /// Whether the signature is valid and the peer id is the address of
    /// the signing key.
    pub fn verify_identity(&self) -> bool {
        let address = Address::from_public_key(&self.public_key);
        address.to_hex() == self.peer_id
            && key::verify(&self.public_key, &self.signed_bytes(), &self.signature)
    }

    /// Check the handshake against our config and turn it into a [`Peer`].
    ///
    /// `observed_ip` is the remote address of the socket the message came
    /// in on; it must equal the advertised IP except on devnet.
    pub fn validate(
        &self,
        config: &P2pConfig,
        observed_ip: IpAddr,
        now_ms: u64,
    ) -> Result<Peer, ReasonCode> {
        if self.network != config.network {
            return Err(ReasonCode::BadNetwork);
        }
        if self.network_version != config.network_version {
            return Err(ReasonCode::BadNetworkVersion);
        }

        let expiry_ms = u64::try_from(config.handshake_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_ms.abs_diff(self.timestamp) > expiry_ms {
            return Err(ReasonCode::InvalidHandshake);
        }

        if config.network != Network::Devnet {
            let declared = self.ip.parse::<IpAddr>().map_err(|_| ReasonCode::InvalidHandshake)?;
            if declared != observed_ip {
                return Err(ReasonCode::InvalidHandshake);
            }
        }

        let capabilities = CapabilitySet::from_names(&self.capabilities);
        let peer = Peer {
            network: self.network,
            network_version: self.network_version,
            ip: observed_ip.to_string(),
            port: self.port,
            client_id: self.client_id.clone(),
            peer_id: self.peer_id.clone(),
            capabilities,
            latest_block_number: self.latest_block_number,
            latency_ms: 0,
        };
        if self.capabilities.len() > crate::peer::MAX_CAPABILITIES
            || self.ip.len() > crate::peer::MAX_IP_LEN
            || !peer.validate()
            || !self.verify_identity()
        {
            return Err(ReasonCode::InvalidHandshake);
        }
        if !peer
            .capabilities
            .is_supported(Capability::required_for(config.network))
        {
            return Err(ReasonCode::IncompatibleCapability);
        }
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    const NOW: u64 = 1_700_000_000_000;

    fn config(network: Network) -> P2pConfig {
        P2pConfig {
            network,
            advertised_ip: "10.0.0.5".to_string(),
            advertised_port: 5161,
            ..P2pConfig::dev_default()
        }
    }

    fn observed() -> IpAddr {
        "10.0.0.5".parse().unwrap()
    }

    fn signed(key: &Key, config: &P2pConfig, edit: impl FnOnce(&mut HandshakeMessage)) -> HandshakeMessage {
        let mut hs = HandshakeMessage::new(key, config, 10, NOW);
        edit(&mut hs);
        hs.signature = key.sign(&hs.signed_bytes());
        hs
    }

    #[test]
    fn test_valid_handshake_becomes_peer() {
        let key = Key::from_seed(&[3u8; 32]).unwrap();
        let config = config(Network::Mainnet);
        let hs = HandshakeMessage::new(&key, &config, 41, NOW);
        let peer = hs.validate(&config, observed(), NOW).unwrap();
        assert_eq!(peer.peer_id, key.address().to_hex());
        assert_eq!(peer.latest_block_number, 41);
        assert_eq!(peer.port, 5161);
        assert_eq!(peer.ip, "10.0.0.5");
    }

    #[test]
    fn test_network_and_version_mismatch() {
        let key = Key::new_random();
        let ours = config(Network::Mainnet);
        let hs = HandshakeMessage::new(&key, &config(Network::Testnet), 0, NOW);
        assert_eq!(hs.validate(&ours, observed(), NOW), Err(ReasonCode::BadNetwork));

        let hs = signed(&key, &ours, |hs| hs.network_version = 2);
        assert_eq!(
            hs.validate(&ours, observed(), NOW),
            Err(ReasonCode::BadNetworkVersion)
        );
    }

    #[test]
    fn test_tampered_fields_fail_signature() {
        let key = Key::new_random();
        let config = config(Network::Mainnet);
        let mut hs = HandshakeMessage::new(&key, &config, 0, NOW);
        hs.latest_block_number = 1_000_000;
        assert_eq!(
            hs.validate(&config, observed(), NOW),
            Err(ReasonCode::InvalidHandshake)
        );
    }

    #[test]
    fn test_peer_id_must_match_key() {
        let key = Key::new_random();
        let other = Key::new_random();
        let config = config(Network::Mainnet);
        let hs = signed(&key, &config, |hs| hs.peer_id = other.address().to_hex());
        assert_eq!(
            hs.validate(&config, observed(), NOW),
            Err(ReasonCode::InvalidHandshake)
        );
    }

    #[test]
    fn test_expired_timestamp() {
        let key = Key::new_random();
        let config = P2pConfig {
            handshake_expiry: Duration::from_secs(60),
            ..config(Network::Mainnet)
        };
        let hs = HandshakeMessage::new(&key, &config, 0, NOW);
        assert!(hs.validate(&config, observed(), NOW + 60_000).is_ok());
        assert_eq!(
            hs.validate(&config, observed(), NOW + 60_001),
            Err(ReasonCode::InvalidHandshake)
        );
    }

    #[test]
    fn test_ip_must_match_outside_devnet() {
        let key = Key::new_random();
        let other_ip: IpAddr = "10.9.9.9".parse().unwrap();

        let mainnet = config(Network::Mainnet);
        let hs = HandshakeMessage::new(&key, &mainnet, 0, NOW);
        assert_eq!(
            hs.validate(&mainnet, other_ip, NOW),
            Err(ReasonCode::InvalidHandshake)
        );

        let devnet = config(Network::Devnet);
        let hs = HandshakeMessage::new(&key, &devnet, 0, NOW);
        assert_eq!(hs.validate(&devnet, other_ip, NOW).unwrap().ip, "10.9.9.9");
    }

    #[test]
    fn test_missing_capability() {
        let key = Key::new_random();
        let config = config(Network::Mainnet);
        let hs = signed(&key, &config, |hs| hs.capabilities = vec!["FAST_SYNC".to_string()]);
        assert_eq!(
            hs.validate(&config, observed(), NOW),
            Err(ReasonCode::IncompatibleCapability)
        );
    }

    #[test]
    fn test_oversized_client_id() {
        let key = Key::new_random();
        let config = config(Network::Mainnet);
        let hs = signed(&key, &config, |hs| hs.client_id = "c".repeat(200));
        assert_eq!(
            hs.validate(&config, observed(), NOW),
            Err(ReasonCode::InvalidHandshake)
        );
    }
}
