//! Frame layer: the fixed-header unit of transmission.
//!
//! ## Wire format
//!
//! ```text
//! [2: version][1: compress type][1: packet type][4: packet id]
//! [4: packet size][4: body size][body size bytes: body]
//! ```
//!
//! All integers are big-endian. `packet size` is the length of the whole
//! logical message; `body size` is what this frame carries. A frame whose
//! body size differs from its packet size is one chunk of a larger message.

use {
    crate::error::{P2pError, Result},
    bytes::{Buf, BufMut, Bytes, BytesMut},
    tokio_util::codec::{Decoder, Encoder},
};

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// The only compress type currently spoken: bodies are sent as-is.
pub const COMPRESS_NONE: u8 = 0;

/// One unit of wire transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u16,
    pub compress_type: u8,
    pub packet_type: u8,
    pub packet_id: i32,
    pub packet_size: i32,
    pub body_size: i32,
    pub body: Bytes,
}

impl Frame {
    /// Build an uncompressed frame. `body_size` is taken from `body`.
    pub fn new(version: u16, packet_type: u8, packet_id: i32, packet_size: i32, body: Bytes) -> Self {
        let body_size = i32::try_from(body.len()).unwrap_or(i32::MAX);
        Self {
            version,
            compress_type: COMPRESS_NONE,
            packet_type,
            packet_id,
            packet_size,
            body_size,
            body,
        }
    }

    /// Whether this frame is one chunk of a multi-frame packet.
    pub fn is_partial(&self) -> bool {
        self.body_size != self.packet_size
    }

    fn write_header(&self, dst: &mut BytesMut) {
        dst.put_u16(self.version);
        dst.put_u8(self.compress_type);
        dst.put_u8(self.packet_type);
        dst.put_i32(self.packet_id);
        dst.put_i32(self.packet_size);
        dst.put_i32(self.body_size);
    }
}

/// Stream codec for [`Frame`]s with header validation.
///
/// Any header violation is returned as an error, which the connection
/// treats as fatal. Size limits are checked on the header alone, so an
/// oversized declaration never causes a buffer allocation.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    version: u16,
    max_body_size: usize,
    max_packet_size: usize,
}

impl FrameCodec {
    pub fn new(version: u16, max_body_size: usize, max_packet_size: usize) -> Self {
        Self {
            version,
            max_body_size,
            max_packet_size,
        }
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &src[..HEADER_SIZE];
        let version = header.get_u16();
        let compress_type = header.get_u8();
        let packet_type = header.get_u8();
        let packet_id = header.get_i32();
        let packet_size = header.get_i32();
        let body_size = header.get_i32();

        if version != self.version {
            return Err(P2pError::BadFrameVersion {
                expected: self.version,
                actual: version,
            });
        }
        if compress_type != COMPRESS_NONE {
            return Err(P2pError::UnsupportedCompression(compress_type));
        }
        let (Ok(body_len), Ok(packet_len)) = (usize::try_from(body_size), usize::try_from(packet_size))
        else {
            return Err(P2pError::InvalidFrameSize {
                body_size,
                packet_size,
            });
        };
        if body_len > packet_len {
            return Err(P2pError::InvalidFrameSize {
                body_size,
                packet_size,
            });
        }
        if body_len > self.max_body_size {
            return Err(P2pError::FrameTooLarge {
                size: body_len,
                max: self.max_body_size,
            });
        }
        if packet_len > self.max_packet_size {
            return Err(P2pError::PacketTooLarge {
                size: packet_len,
                max: self.max_packet_size,
            });
        }

        let frame_len = HEADER_SIZE.saturating_add(body_len);
        if src.len() < frame_len {
            src.reserve(frame_len.saturating_sub(src.len()));
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(body_len).freeze();
        Ok(Some(Frame {
            version,
            compress_type,
            packet_type,
            packet_id,
            packet_size,
            body_size,
            body,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = P2pError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.body.len() > self.max_body_size {
            return Err(P2pError::FrameTooLarge {
                size: frame.body.len(),
                max: self.max_body_size,
            });
        }
        dst.reserve(HEADER_SIZE.saturating_add(frame.body.len()));
        frame.write_header(dst);
        dst.put_slice(&frame.body);
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
