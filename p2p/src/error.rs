//! Error types for the peer-to-peer layer.

use {
    crate::message::ReasonCode,
    std::net::SocketAddr,
    thiserror::Error,
};

/// Errors that can occur in the peer-to-peer layer.
///
/// Every variant raised while reading from a connection is fatal to that
/// connection only.
#[derive(Error, Debug)]
pub enum P2pError {
    /// Failed to (de)serialize a message body.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame carried an unexpected header version.
    #[error("bad frame version: expected {expected}, got {actual}")]
    BadFrameVersion {
        /// Our configured frame version.
        expected: u16,
        /// Version found on the wire.
        actual: u16,
    },

    /// A frame declared a compression scheme we do not speak.
    #[error("unsupported compress type {0}")]
    UnsupportedCompression(u8),

    /// Frame sizes are negative or the body exceeds the declared packet.
    #[error("invalid frame sizes: body {body_size}, packet {packet_size}")]
    InvalidFrameSize {
        /// Declared body size.
        body_size: i32,
        /// Declared packet size.
        packet_size: i32,
    },

    /// A frame body exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Declared body size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A message exceeds the configured maximum packet size.
    #[error("packet too large: {size} bytes (max {max} bytes)")]
    PacketTooLarge {
        /// Message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Chunk accounting for a multi-frame packet went negative.
    #[error("corrupt packet {0}: more bytes received than declared")]
    CorruptPacket(i32),

    /// A known message code carried an undecodable body.
    #[error("malformed {code:#04x} message: {reason}")]
    MalformedMessage {
        /// Message code.
        code: u8,
        /// What was wrong with it.
        reason: String,
    },

    /// The channel's outbound queue is full.
    #[error("message queue full")]
    QueueFull,

    /// The channel is closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The remote peer ended the session with a reason code.
    #[error("disconnected by peer: {0:?}")]
    Disconnected(ReasonCode),

    /// The channel sent nothing within the idle timeout.
    #[error("idle timeout")]
    IdleTimeout,

    /// A dial did not complete within the connect timeout.
    #[error("connect timeout to {0}")]
    ConnectTimeout(SocketAddr),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Convenience result type for P2P operations.
pub type Result<T> = std::result::Result<T, P2pError>;
