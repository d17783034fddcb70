//! Tessera peer-to-peer layer
//!
//! This crate connects a Tessera node to its peers. It handles:
//!
//! - **Wire format**: fixed 16-byte big-endian frame headers, with large
//!   messages split into frames and reassembled on the other side.
//! - **Sessions**: a signed HELLO/WORLD handshake, keepalive pings and
//!   peer exchange, and dispatch of application messages to consensus,
//!   sync and the pending pool.
//! - **Connection management**: a registry of open channels, per-IP and
//!   global inbound limits, and a scheduler that dials candidate nodes
//!   with a reconnect cool-down.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐ ┌──────────────┐ ┌──────────────────────┐
//!  │ ConsensusSink│ │ SyncSink     │ │ TransactionSink      │
//!  └──────▲───────┘ └──────▲───────┘ │ (PendingPool)        │
//!         │                │         └──────────▲───────────┘
//!  ┌──────┴────────────────┴────────────────────┴───────────┐
//!  │ Session (per connection): handshake state machine,     │
//!  │ ping / get-nodes timers, dispatch                      │
//!  └──────┬─────────────────────────────────────▲───────────┘
//!         │ Channel (bounded outbound queue)    │ Message
//!  ┌──────▼─────────────────────────────────────┴───────────┐
//!  │ MessageCodec: frames ⇄ packets (LRU reassembly)         │
//!  └──────┬─────────────────────────────────────▲───────────┘
//!         │            TCP (tokio)              │
//!  ┌──────▼──────────┐  ┌────────────────┐  ┌───┴────────────┐
//!  │ ChannelManager  │  │ NodeManager    │  │ accept loop    │
//!  │ registry        │◄─┤ dial scheduler │  │ ip filter,     │
//!  └─────────────────┘  └────────────────┘  │ limiter        │
//!                                           └────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module              | Purpose |
//! |---------------------|---------|
//! | [`config`]          | `P2pConfig` defaults, dev overrides, validation |
//! | [`frame`]           | Frame header and `FrameCodec` |
//! | [`packet`]          | Chunking, reassembly, `MessageCodec`, packet ids |
//! | [`message`]         | Message codes, reason codes, body encoding |
//! | [`handshake`]       | Signed HELLO/WORLD bodies and their checks |
//! | [`peer`]            | `Peer`, `Node`, capabilities |
//! | [`channel`]         | One connection's queue and flags |
//! | [`channel_manager`] | Registry of channels and active peers |
//! | [`node_manager`]    | Dial queue, cool-down, seed fetching |
//! | [`session`]         | Handshake state machine and dispatch |
//! | [`connection`]      | Reader loop and writer task |
//! | [`server`]          | Accept loop and dialing |
//! | [`limiter`]         | Per-IP inbound connection counts |
//! | [`ip_filter`]       | CIDR accept/reject rules |
//! | [`timer`]           | Cancellable periodic tasks |
//! | [`sinks`]           | Consensus, sync and transaction collaborators |
//! | [`relay`]           | Gossip of newly pending transactions |
//! | [`service`]         | `P2pService` start and shutdown |
//! | [`error`]           | Crate-wide error enum |

pub mod channel;
pub mod channel_manager;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod ip_filter;
pub mod limiter;
pub mod message;
pub mod node_manager;
pub mod packet;
pub mod peer;
pub mod relay;
pub mod server;
pub mod service;
pub mod session;
pub mod sinks;
pub mod timer;

pub use {
    channel::{Channel, Direction},
    channel_manager::ChannelManager,
    config::{ConfigError, P2pConfig},
    error::{P2pError, Result},
    handshake::HandshakeMessage,
    ip_filter::IpFilter,
    message::{Message, MessageCode, ReasonCode},
    node_manager::NodeManager,
    packet::{MessageCodec, PacketIdGenerator},
    peer::{Capability, Node, Peer},
    relay::Relay,
    service::{P2pService, Sinks},
    sinks::{ConsensusSink, LoggingConsensus, LoggingSync, SyncSink, TransactionSink},
};
