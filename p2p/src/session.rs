//! Per-connection session state machine and message dispatch.
//!
//! ```text
//!  CONNECTING ──► HANDSHAKING ──► ACTIVE
//!       │              │            │
//!       └──────────────┴────────────┴──► CLOSED
//! ```
//!
//! The initiator sends HELLO as soon as the socket is up; the acceptor
//! validates it and answers WORLD. Application messages that arrive
//! before the session is active are ignored.

use {
    crate::{
        channel::Channel,
        channel_manager::ChannelManager,
        config::P2pConfig,
        frame::FrameCodec,
        handshake::HandshakeMessage,
        message::{Message, ReasonCode},
        node_manager::NodeManager,
        packet::{MessageCodec, PacketIdGenerator},
        peer::Peer,
        sinks::{ConsensusSink, SyncSink, TransactionSink},
        timer::PeriodicTimer,
    },
    log::{debug, info, trace},
    rand::seq::SliceRandom,
    std::{sync::Arc, time::Duration},
    tessera_ledger_api::{Key, Ledger},
    tessera_pending_pool::now_ms,
    tokio_util::task::TaskTracker,
};

/// Everything a session needs from the node it runs in.
pub struct NodeContext {
    pub config: P2pConfig,
    pub key: Arc<Key>,
    pub ledger: Arc<dyn Ledger>,
    pub channel_manager: Arc<ChannelManager>,
    pub node_manager: Arc<NodeManager>,
    pub consensus: Arc<dyn ConsensusSink>,
    pub sync: Arc<dyn SyncSink>,
    pub transactions: Arc<dyn TransactionSink>,
    pub packet_ids: PacketIdGenerator,
    /// Per-connection tasks, awaited on shutdown.
    pub connections: TaskTracker,
}

impl NodeContext {
    /// Our signed handshake, stamped now.
    pub fn handshake(&self) -> HandshakeMessage {
        HandshakeMessage::new(
            &self.key,
            &self.config,
            self.ledger.latest_block_number(),
            now_ms(),
        )
    }

    /// A codec configured for this node's wire limits.
    pub fn message_codec(&self) -> MessageCodec {
        MessageCodec::new(
            FrameCodec::new(
                self.config.frame_version,
                self.config.max_frame_body_size,
                self.config.max_packet_size,
            ),
            self.packet_ids.clone(),
            self.config.reassembly_capacity,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Active,
    Closed,
}

pub struct Session {
    ctx: Arc<NodeContext>,
    channel: Arc<Channel>,
    state: SessionState,
    peer: Option<Peer>,
    timers: Vec<PeriodicTimer>,
}

impl Session {
    pub fn new(ctx: Arc<NodeContext>, channel: Arc<Channel>) -> Self {
        Self {
            ctx,
            channel,
            state: SessionState::Connecting,
            peer: None,
            timers: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// The socket is up. The initiator opens the handshake.
    pub fn on_connected(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.state = SessionState::Handshaking;
        if !self.channel.is_inbound() {
            let _ = self.channel.send(Message::Hello(self.ctx.handshake()));
        }
    }

    pub fn on_message(&mut self, message: Message) {
        trace!("{}: received {}", self.channel, message.kind());
        if self.channel.cancel_token().is_cancelled() {
            self.on_closed();
        }
        match (self.state, message) {
            (SessionState::Closed, _) => {}
            (_, Message::Disconnect(reason)) => {
                info!("{}: peer disconnected ({reason:?})", self.channel);
                self.channel.shutdown();
                self.on_closed();
            }
            (SessionState::Active, Message::Hello(_) | Message::World(_)) => {
                self.refuse(ReasonCode::HandshakeExists);
            }
            (_, Message::Hello(hs)) => {
                if self.channel.is_inbound() {
                    self.on_handshake(hs);
                } else {
                    self.refuse(ReasonCode::BadPeer);
                }
            }
            (_, Message::World(hs)) => {
                if self.channel.is_inbound() {
                    self.refuse(ReasonCode::BadPeer);
                } else {
                    self.on_handshake(hs);
                }
            }
            (SessionState::Active, message) => self.dispatch(message),
            (_, message) => trace!("{}: ignoring {} before handshake", self.channel, message.kind()),
        }
    }

    fn on_handshake(&mut self, hs: HandshakeMessage) {
        let observed_ip = self.channel.remote_addr().ip();
        let peer = match hs.validate(&self.ctx.config, observed_ip, now_ms()) {
            Ok(peer) => peer,
            Err(reason) => {
                debug!("{}: rejected handshake from {}: {reason:?}", self.channel, hs.peer_id);
                self.refuse(reason);
                return;
            }
        };
        if let Err(reason) = self.ctx.channel_manager.activate(&self.channel, peer.clone()) {
            debug!("{}: refused peer {peer}: {reason:?}", self.channel);
            self.refuse(reason);
            return;
        }
        if self.channel.is_inbound() {
            let _ = self.channel.send(Message::World(self.ctx.handshake()));
        }
        self.on_active(peer);
    }

    /// Send `reason` to the peer and end the session. Nothing received
    /// afterwards is processed.
    fn refuse(&mut self, reason: ReasonCode) {
        self.channel.disconnect(reason);
        self.on_closed();
    }

    fn on_active(&mut self, peer: Peer) {
        self.state = SessionState::Active;
        self.ctx
            .consensus
            .on_new_height(&peer, peer.latest_block_number.saturating_add(1));
        self.ctx.sync.on_peer_height(&peer, peer.latest_block_number);

        // Initiator fires at once, acceptor one period later.
        let staggered = |period: Duration| {
            if self.channel.is_inbound() {
                period
            } else {
                Duration::ZERO
            }
        };

        let get_nodes_every = self.ctx.config.get_nodes_interval;
        let channel = self.channel.clone();
        self.timers.push(PeriodicTimer::start(
            self.channel.cancel_token(),
            staggered(get_nodes_every),
            get_nodes_every,
            move || {
                if !channel.is_closed() {
                    let _ = channel.send(Message::GetNodes);
                }
            },
        ));

        let ping_every = self.ctx.config.ping_interval;
        let channel = self.channel.clone();
        self.timers.push(PeriodicTimer::start(
            self.channel.cancel_token(),
            staggered(ping_every),
            ping_every,
            move || {
                if !channel.is_closed() {
                    let timestamp = now_ms();
                    channel.record_ping(timestamp);
                    let _ = channel.send(Message::Ping { timestamp });
                }
            },
        ));

        self.peer = Some(peer);
    }

    fn dispatch(&self, message: Message) {
        let Some(peer) = self.peer.as_ref() else {
            return;
        };
        match message {
            Message::Ping { timestamp } => {
                let _ = self.channel.send(Message::Pong { timestamp });
            }
            Message::Pong { timestamp } => {
                if let Some(latency) = self.channel.on_pong(timestamp) {
                    trace!("{}: latency {latency} ms", self.channel);
                }
            }
            Message::GetNodes => {
                let mut nodes: Vec<_> = self
                    .ctx
                    .channel_manager
                    .active_addresses()
                    .into_iter()
                    .filter(|n| *n != peer.listen_node())
                    .collect();
                nodes.shuffle(&mut rand::rng());
                nodes.truncate(self.ctx.config.max_nodes_per_reply);
                let _ = self.channel.send(Message::Nodes(nodes));
            }
            Message::Nodes(nodes) => self.ctx.node_manager.add_nodes(nodes),
            Message::Transaction(tx) => self.ctx.transactions.submit(tx),
            Message::GetBlock { number } => match self.ctx.ledger.block(number) {
                Some(block) => {
                    let _ = self.channel.send(Message::Block(block));
                }
                None => debug!("{}: block {number} not found", self.channel),
            },
            Message::GetBlockHeader { number } => match self.ctx.ledger.block_header(number) {
                Some(header) => {
                    let _ = self.channel.send(Message::BlockHeader(header));
                }
                None => debug!("{}: block header {number} not found", self.channel),
            },
            message @ (Message::Block(_) | Message::BlockHeader(_)) => {
                self.ctx.sync.on_message(peer, message);
            }
            message @ (Message::BftNewHeight { .. }
            | Message::BftNewView(_)
            | Message::BftProposal(_)
            | Message::BftVote(_)) => {
                self.ctx.consensus.on_message(peer, message);
            }
            Message::Disconnect(_) | Message::Hello(_) | Message::World(_) => {}
        }
    }

    /// Tear down: cancel timers, mark the channel closed and unregister it.
    /// Safe to call more than once.
    pub fn on_closed(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        for timer in self.timers.drain(..) {
            timer.cancel();
        }
        self.channel.close();
        self.ctx.channel_manager.remove(&self.channel);
        debug!("{}: closed", self.channel);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::{
            channel::{Direction, MessageQueueReceiver},
            ip_filter::IpFilter,
            sinks::LoggingSync,
        },
        parking_lot::Mutex,
        tessera_ledger_api::{MemoryLedger, Network, Transaction},
        tokio_util::sync::CancellationToken,
    };

    #[derive(Default)]
    pub(crate) struct Recorder {
        pub heights: Mutex<Vec<(String, u64)>>,
        pub consensus: Mutex<Vec<Message>>,
        pub transactions: Mutex<Vec<Transaction>>,
    }

    impl ConsensusSink for Recorder {
        fn on_new_height(&self, peer: &Peer, height: u64) {
            self.heights.lock().push((peer.peer_id.clone(), height));
        }

        fn on_message(&self, _peer: &Peer, message: Message) {
            self.consensus.lock().push(message);
        }
    }

    impl TransactionSink for Recorder {
        fn submit(&self, tx: Transaction) {
            self.transactions.lock().push(tx);
        }
    }

    pub(crate) fn context(seed: u8, recorder: Arc<Recorder>) -> Arc<NodeContext> {
        let config = P2pConfig {
            advertised_port: 5161,
            ..P2pConfig::dev_default()
        };
        let key = Arc::new(Key::from_seed(&[seed; 32]).unwrap());
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let channel_manager = Arc::new(ChannelManager::new(
            key.address().to_hex(),
            config.network,
            IpFilter::default(),
            ledger.clone(),
        ));
        let node_manager = Arc::new(NodeManager::new(&config, channel_manager.clone()));
        Arc::new(NodeContext {
            config,
            key,
            ledger,
            channel_manager,
            node_manager,
            consensus: recorder.clone(),
            sync: Arc::new(LoggingSync),
            transactions: recorder,
            packet_ids: PacketIdGenerator::new(),
            connections: TaskTracker::new(),
        })
    }

    fn session(ctx: &Arc<NodeContext>, direction: Direction) -> (Session, MessageQueueReceiver) {
        let (channel, rx) = Channel::new(
            ctx.channel_manager.next_channel_id(),
            direction,
            "127.0.0.1:40000".parse().unwrap(),
            64,
            CancellationToken::new(),
        );
        ctx.channel_manager.add(channel.clone());
        let mut session = Session::new(ctx.clone(), channel);
        session.on_connected();
        (session, rx)
    }

    fn remote_hello(seed: u8, latest: u64) -> HandshakeMessage {
        let key = Key::from_seed(&[seed; 32]).unwrap();
        let config = P2pConfig {
            advertised_port: 5161,
            ..P2pConfig::dev_default()
        };
        HandshakeMessage::new(&key, &config, latest, now_ms())
    }

    fn transaction() -> Transaction {
        let key = Key::from_seed(&[9u8; 32]).unwrap();
        Transaction::new_signed(
            &key,
            Network::Devnet,
            tessera_ledger_api::TransactionType::Transfer,
            Key::from_seed(&[8u8; 32]).unwrap().address(),
            1,
            1,
            0,
            now_ms(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_acceptor_answers_world_and_activates() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(1, recorder.clone());
        let (mut session, mut rx) = session(&ctx, Direction::Inbound);
        assert_eq!(session.state(), SessionState::Handshaking);

        let hello = remote_hello(2, 7);
        session.on_message(Message::Hello(hello.clone()));

        assert_eq!(session.state(), SessionState::Active);
        assert!(ctx.channel_manager.is_active_peer(&hello.peer_id));
        assert!(matches!(rx.recv().await, Some(Message::World(_))));
        assert_eq!(*recorder.heights.lock(), vec![(hello.peer_id, 8)]);
    }

    #[tokio::test]
    async fn test_initiator_sends_hello_first() {
        let ctx = context(1, Arc::new(Recorder::default()));
        let (session, mut rx) = session(&ctx, Direction::Outbound);
        assert_eq!(session.state(), SessionState::Handshaking);
        assert!(matches!(rx.recv().await, Some(Message::Hello(_))));
    }

    #[tokio::test]
    async fn test_wrong_direction_is_bad_peer() {
        let ctx = context(1, Arc::new(Recorder::default()));
        let (mut session, _rx) = session(&ctx, Direction::Inbound);
        session.on_message(Message::World(remote_hello(2, 0)));
        assert_eq!(session.channel().disconnect_reason(), Some(ReasonCode::BadPeer));
        assert_ne!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_refused_session_ignores_later_handshake() {
        let ctx = context(1, Arc::new(Recorder::default()));
        let (mut session, _rx) = session(&ctx, Direction::Inbound);
        session.on_message(Message::World(remote_hello(2, 0)));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.channel().is_closed());
        assert_eq!(ctx.channel_manager.size(), 0);

        // A valid HELLO already buffered behind the violation.
        let hello = remote_hello(2, 0);
        session.on_message(Message::Hello(hello.clone()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.channel().is_active());
        assert!(!ctx.channel_manager.is_active_peer(&hello.peer_id));
        assert_eq!(session.channel().disconnect_reason(), Some(ReasonCode::BadPeer));
    }

    #[tokio::test]
    async fn test_cancelled_channel_is_never_activated() {
        let ctx = context(1, Arc::new(Recorder::default()));
        let (mut session, _rx) = session(&ctx, Direction::Inbound);
        session.channel().shutdown();

        let hello = remote_hello(2, 0);
        session.on_message(Message::Hello(hello.clone()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!ctx.channel_manager.is_active_peer(&hello.peer_id));
    }

    #[tokio::test]
    async fn test_second_handshake_is_refused() {
        let ctx = context(1, Arc::new(Recorder::default()));
        let (mut session, _rx) = session(&ctx, Direction::Inbound);
        session.on_message(Message::Hello(remote_hello(2, 0)));
        session.on_message(Message::Hello(remote_hello(2, 0)));
        assert_eq!(
            session.channel().disconnect_reason(),
            Some(ReasonCode::HandshakeExists)
        );
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(ctx.channel_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_own_key_is_duplicated_peer() {
        let ctx = context(1, Arc::new(Recorder::default()));
        let (mut session, _rx) = session(&ctx, Direction::Inbound);
        session.on_message(Message::Hello(remote_hello(1, 0)));
        assert_eq!(
            session.channel().disconnect_reason(),
            Some(ReasonCode::DuplicatedPeerId)
        );
        assert_eq!(ctx.channel_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_network_never_activates() {
        let ctx = context(1, Arc::new(Recorder::default()));
        let (mut session, _rx) = session(&ctx, Direction::Inbound);
        let key = Key::from_seed(&[2u8; 32]).unwrap();
        let config = P2pConfig {
            network: Network::Testnet,
            advertised_port: 5161,
            ..P2pConfig::dev_default()
        };
        session.on_message(Message::Hello(HandshakeMessage::new(&key, &config, 0, now_ms())));
        assert_eq!(session.channel().disconnect_reason(), Some(ReasonCode::BadNetwork));
        assert_eq!(ctx.channel_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_application_messages_before_handshake_are_ignored() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(1, recorder.clone());
        let (mut session, _rx) = session(&ctx, Direction::Inbound);
        session.on_message(Message::Transaction(transaction()));
        session.on_message(Message::BftVote(vec![1]));
        assert!(recorder.transactions.lock().is_empty());
        assert!(recorder.consensus.lock().is_empty());
        assert_eq!(session.channel().disconnect_reason(), None);
    }

    #[tokio::test]
    async fn test_active_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(1, recorder.clone());
        let (mut session, mut rx) = session(&ctx, Direction::Inbound);
        session.on_message(Message::Hello(remote_hello(2, 0)));
        assert!(matches!(rx.recv().await, Some(Message::World(_))));

        session.on_message(Message::Ping { timestamp: 42 });
        assert_eq!(rx.recv().await, Some(Message::Pong { timestamp: 42 }));

        session.on_message(Message::GetBlock { number: 0 });
        assert!(matches!(rx.recv().await, Some(Message::Block(_))));
        session.on_message(Message::GetBlock { number: 99 });

        session.on_message(Message::GetNodes);
        assert_eq!(rx.recv().await, Some(Message::Nodes(Vec::new())));

        session.on_message(Message::Transaction(transaction()));
        session.on_message(Message::BftProposal(vec![1, 2]));
        assert_eq!(recorder.transactions.lock().len(), 1);
        assert_eq!(*recorder.consensus.lock(), vec![Message::BftProposal(vec![1, 2])]);

        session.on_message(Message::Nodes(vec![crate::peer::Node::new("10.0.0.9", 5161)]));
        assert_eq!(ctx.node_manager.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let ctx = context(1, Arc::new(Recorder::default()));
        let (mut session, _rx) = session(&ctx, Direction::Inbound);
        session.on_message(Message::Hello(remote_hello(2, 0)));
        assert_eq!(ctx.channel_manager.active_count(), 1);

        session.on_closed();
        session.on_closed();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(ctx.channel_manager.size(), 0);
        assert_eq!(ctx.channel_manager.active_count(), 0);
        assert!(session.channel().is_closed());

        session.on_message(Message::Ping { timestamp: 1 });
    }
}
