//! Message types and their bodies.
//!
//! Every message travels as one packet: a one-byte [`MessageCode`] in the
//! frame header plus a bincode-encoded body. [`Message::decode`] is the
//! type-keyed factory used by the packet codec.

use {
    crate::{
        error::{P2pError, Result},
        handshake::HandshakeMessage,
        peer::Node,
    },
    serde::{Deserialize, Serialize},
    tessera_ledger_api::Transaction,
};

/// Most node addresses accepted in one `NODES` message.
pub const MAX_NODES_PER_MESSAGE: usize = 256;

// ── Codes ───────────────────────────────────────────────────────────────────

/// One-byte message type carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageCode {
    Disconnect = 0x00,
    Hello = 0x01,
    World = 0x02,
    Ping = 0x03,
    Pong = 0x04,
    GetNodes = 0x05,
    Nodes = 0x06,
    Transaction = 0x07,
    GetBlock = 0x30,
    Block = 0x31,
    GetBlockHeader = 0x32,
    BlockHeader = 0x33,
    BftNewHeight = 0x40,
    BftNewView = 0x41,
    BftProposal = 0x42,
    BftVote = 0x43,
}

impl MessageCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::Disconnect,
            0x01 => Self::Hello,
            0x02 => Self::World,
            0x03 => Self::Ping,
            0x04 => Self::Pong,
            0x05 => Self::GetNodes,
            0x06 => Self::Nodes,
            0x07 => Self::Transaction,
            0x30 => Self::GetBlock,
            0x31 => Self::Block,
            0x32 => Self::GetBlockHeader,
            0x33 => Self::BlockHeader,
            0x40 => Self::BftNewHeight,
            0x41 => Self::BftNewView,
            0x42 => Self::BftProposal,
            0x43 => Self::BftVote,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Why a session is being closed. Sent in `DISCONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    BadNetwork,
    BadNetworkVersion,
    TooManyPeers,
    InvalidHandshake,
    DuplicatedPeerId,
    MessageQueueFull,
    ValidatorIpLimited,
    HandshakeExists,
    BadPeer,
    IncompatibleCapability,
}

// ── Messages ────────────────────────────────────────────────────────────────

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Disconnect(ReasonCode),
    Hello(HandshakeMessage),
    World(HandshakeMessage),
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
    GetNodes,
    Nodes(Vec<Node>),
    Transaction(Transaction),
    GetBlock { number: u64 },
    /// Encoded block, opaque to this layer.
    Block(Vec<u8>),
    GetBlockHeader { number: u64 },
    /// Encoded block header, opaque to this layer.
    BlockHeader(Vec<u8>),
    BftNewHeight { height: u64 },
    BftNewView(Vec<u8>),
    BftProposal(Vec<u8>),
    BftVote(Vec<u8>),
}

impl Message {
    pub fn code(&self) -> MessageCode {
        match self {
            Self::Disconnect(_) => MessageCode::Disconnect,
            Self::Hello(_) => MessageCode::Hello,
            Self::World(_) => MessageCode::World,
            Self::Ping { .. } => MessageCode::Ping,
            Self::Pong { .. } => MessageCode::Pong,
            Self::GetNodes => MessageCode::GetNodes,
            Self::Nodes(_) => MessageCode::Nodes,
            Self::Transaction(_) => MessageCode::Transaction,
            Self::GetBlock { .. } => MessageCode::GetBlock,
            Self::Block(_) => MessageCode::Block,
            Self::GetBlockHeader { .. } => MessageCode::GetBlockHeader,
            Self::BlockHeader(_) => MessageCode::BlockHeader,
            Self::BftNewHeight { .. } => MessageCode::BftNewHeight,
            Self::BftNewView(_) => MessageCode::BftNewView,
            Self::BftProposal(_) => MessageCode::BftProposal,
            Self::BftVote(_) => MessageCode::BftVote,
        }
    }

    /// Encode the body. `GET_NODES` has an empty body.
    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let body = match self {
            Self::Disconnect(reason) => bincode::serialize(reason)?,
            Self::Hello(hs) | Self::World(hs) => bincode::serialize(hs)?,
            Self::Ping { timestamp } | Self::Pong { timestamp } => bincode::serialize(timestamp)?,
            Self::GetNodes => Vec::new(),
            Self::Nodes(nodes) => bincode::serialize(nodes)?,
            Self::Transaction(tx) => bincode::serialize(tx)?,
            Self::GetBlock { number } | Self::GetBlockHeader { number } => bincode::serialize(number)?,
            Self::BftNewHeight { height } => bincode::serialize(height)?,
            Self::Block(bytes)
            | Self::BlockHeader(bytes)
            | Self::BftNewView(bytes)
            | Self::BftProposal(bytes)
            | Self::BftVote(bytes) => bytes.clone(),
        };
        Ok(body)
    }

    /// Build a message from its code and body.
    ///
    /// Returns `Ok(None)` for codes this node does not know; such messages
    /// are skipped. A known code with a malformed body is an error.
    pub fn decode(code: u8, body: &[u8]) -> Result<Option<Self>> {
        let Some(code) = MessageCode::from_u8(code) else {
            return Ok(None);
        };
        let malformed = |e: bincode::Error| P2pError::MalformedMessage {
            code: code.to_u8(),
            reason: e.to_string(),
        };
        let message = match code {
            MessageCode::Disconnect => Self::Disconnect(bincode::deserialize(body).map_err(malformed)?),
            MessageCode::Hello => Self::Hello(bincode::deserialize(body).map_err(malformed)?),
            MessageCode::World => Self::World(bincode::deserialize(body).map_err(malformed)?),
            MessageCode::Ping => Self::Ping {
                timestamp: bincode::deserialize(body).map_err(malformed)?,
            },
            MessageCode::Pong => Self::Pong {
                timestamp: bincode::deserialize(body).map_err(malformed)?,
            },
            MessageCode::GetNodes => Self::GetNodes,
            MessageCode::Nodes => {
                let nodes: Vec<Node> = bincode::deserialize(body).map_err(malformed)?;
                if nodes.len() > MAX_NODES_PER_MESSAGE {
                    return Err(P2pError::MalformedMessage {
                        code: code.to_u8(),
                        reason: format!("{} nodes (max {MAX_NODES_PER_MESSAGE})", nodes.len()),
                    });
                }
                Self::Nodes(nodes)
            }
            MessageCode::Transaction => Self::Transaction(bincode::deserialize(body).map_err(malformed)?),
            MessageCode::GetBlock => Self::GetBlock {
                number: bincode::deserialize(body).map_err(malformed)?,
            },
            MessageCode::Block => Self::Block(body.to_vec()),
            MessageCode::GetBlockHeader => Self::GetBlockHeader {
                number: bincode::deserialize(body).map_err(malformed)?,
            },
            MessageCode::BlockHeader => Self::BlockHeader(body.to_vec()),
            MessageCode::BftNewHeight => Self::BftNewHeight {
                height: bincode::deserialize(body).map_err(malformed)?,
            },
            MessageCode::BftNewView => Self::BftNewView(body.to_vec()),
            MessageCode::BftProposal => Self::BftProposal(body.to_vec()),
            MessageCode::BftVote => Self::BftVote(body.to_vec()),
        };
        Ok(Some(message))
    }

    /// Human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disconnect(_) => "disconnect",
            Self::Hello(_) => "hello",
            Self::World(_) => "world",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::GetNodes => "get_nodes",
            Self::Nodes(_) => "nodes",
            Self::Transaction(_) => "transaction",
            Self::GetBlock { .. } => "get_block",
            Self::Block(_) => "block",
            Self::GetBlockHeader { .. } => "get_block_header",
            Self::BlockHeader(_) => "block_header",
            Self::BftNewHeight { .. } => "bft_new_height",
            Self::BftNewView(_) => "bft_new_view",
            Self::BftProposal(_) => "bft_proposal",
            Self::BftVote(_) => "bft_vote",
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
