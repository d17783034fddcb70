//! Packet layer: splitting messages into frames and putting them back
//! together.
//!
//! A message whose body exceeds the frame limit is sent as several frames
//! sharing one packet id. The receiver keeps a bounded LRU of packets in
//! flight; when it overflows, the oldest partial packet is dropped and its
//! remaining frames will never complete.

use {
    crate::{
        error::{P2pError, Result},
        frame::{Frame, FrameCodec},
        message::Message,
    },
    bytes::{Bytes, BytesMut},
    log::{debug, trace},
    lru::LruCache,
    std::sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    tokio_util::codec::{Decoder, Encoder},
};

// ── Packet ids ──────────────────────────────────────────────────────────────

/// Source of packet ids. Shared by every connection of one node; ids
/// increase by one and wrap from `i32::MAX` back to zero.
#[derive(Debug, Clone, Default)]
pub struct PacketIdGenerator(Arc<AtomicI32>);

impl PacketIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting after `last`.
    pub fn starting_after(last: i32) -> Self {
        Self(Arc::new(AtomicI32::new(last)))
    }

    pub fn next_id(&self) -> i32 {
        let step = |id: i32| Some(if id == i32::MAX { 0 } else { id.saturating_add(1) });
        let previous = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, step)
            .unwrap_or_default();
        step(previous).unwrap_or_default()
    }
}

// ── Splitting ───────────────────────────────────────────────────────────────

/// Split one message body into frames of at most `max_body_size` bytes.
///
/// An empty body still produces one (empty) frame.
pub fn split_packet(
    version: u16,
    packet_type: u8,
    packet_id: i32,
    body: Bytes,
    max_body_size: usize,
) -> Result<Vec<Frame>> {
    let packet_size = i32::try_from(body.len()).map_err(|_| P2pError::PacketTooLarge {
        size: body.len(),
        max: i32::MAX as usize,
    })?;
    if body.is_empty() {
        return Ok(vec![Frame::new(version, packet_type, packet_id, 0, body)]);
    }

    let chunk = max_body_size.max(1);
    let count = body.len().saturating_sub(1).checked_div(chunk).unwrap_or(0).saturating_add(1);
    let mut frames = Vec::with_capacity(count);
    let mut offset = 0usize;
    while offset < body.len() {
        let end = offset.saturating_add(chunk).min(body.len());
        frames.push(Frame::new(
            version,
            packet_type,
            packet_id,
            packet_size,
            body.slice(offset..end),
        ));
        offset = end;
    }
    Ok(frames)
}

// ── Reassembly ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Reassembly {
    packet_type: u8,
    bodies: Vec<Bytes>,
    /// Bytes still expected. Zero completes the packet, negative means the
    /// sender lied about its size.
    remaining: i64,
}

/// Frame + packet codec producing whole [`Message`]s.
///
/// Decoding skips messages with unknown codes. Any other error (bad frame
/// header, corrupt chunk accounting, malformed body) is returned and ends
/// the connection.
pub struct MessageCodec {
    frames: FrameCodec,
    packet_ids: PacketIdGenerator,
    in_flight: LruCache<i32, Reassembly>,
}

impl MessageCodec {
    pub fn new(frames: FrameCodec, packet_ids: PacketIdGenerator, reassembly_capacity: usize) -> Self {
        Self {
            frames,
            packet_ids,
            in_flight: LruCache::new(reassembly_capacity.max(1)),
        }
    }

    /// Packets currently being reassembled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Feed one frame. Returns the packet type and full body once the last
    /// chunk of a packet has arrived.
    fn assemble(&mut self, frame: Frame) -> Result<Option<(u8, Bytes)>> {
        if !frame.is_partial() {
            return Ok(Some((frame.packet_type, frame.body)));
        }

        let packet_id = frame.packet_id;
        let body_size = i64::from(frame.body_size);
        let remaining = match self.in_flight.get_mut(&packet_id) {
            Some(entry) => {
                entry.remaining = entry.remaining.saturating_sub(body_size);
                entry.bodies.push(frame.body);
                entry.remaining
            }
            None => {
                if self.in_flight.len() >= self.in_flight.cap() {
                    if let Some((evicted, _)) = self.in_flight.pop_lru() {
                        debug!("dropping incomplete packet {evicted}: reassembly cache full");
                    }
                }
                let remaining = i64::from(frame.packet_size).saturating_sub(body_size);
                self.in_flight.put(
                    packet_id,
                    Reassembly {
                        packet_type: frame.packet_type,
                        bodies: vec![frame.body],
                        remaining,
                    },
                );
                remaining
            }
        };

        if remaining > 0 {
            return Ok(None);
        }
        let Some(entry) = self.in_flight.pop(&packet_id) else {
            return Ok(None);
        };
        if remaining < 0 {
            return Err(P2pError::CorruptPacket(packet_id));
        }

        let total = entry.bodies.iter().map(Bytes::len).sum();
        let mut body = BytesMut::with_capacity(total);
        for chunk in &entry.bodies {
            body.extend_from_slice(chunk);
        }
        Ok(Some((entry.packet_type, body.freeze())))
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            let Some(frame) = self.frames.decode(src)? else {
                return Ok(None);
            };
            let Some((code, body)) = self.assemble(frame)? else {
                continue;
            };
            match Message::decode(code, &body)? {
                Some(message) => return Ok(Some(message)),
                None => trace!("skipping message with unknown code {code:#04x}"),
            }
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = P2pError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<()> {
        let body = message.encode_body()?;
        let max_packet = self.frames.max_packet_size();
        if body.len() > max_packet {
            return Err(P2pError::PacketTooLarge {
                size: body.len(),
                max: max_packet,
            });
        }
        let frames = split_packet(
            self.frames.version(),
            message.code().to_u8(),
            self.packet_ids.next_id(),
            Bytes::from(body),
            self.frames.max_body_size(),
        )?;
        for frame in frames {
            self.frames.encode(frame, dst)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::message::{MessageCode, ReasonCode},
        assert_matches::assert_matches,
        test_case::test_case,
    };

    const MAX_BODY: usize = 8;

    fn codec(capacity: usize) -> MessageCodec {
        MessageCodec::new(FrameCodec::new(0, MAX_BODY, 4096), PacketIdGenerator::new(), capacity)
    }

    fn encode_frames(frames: Vec<Frame>, dst: &mut BytesMut) {
        let mut raw = FrameCodec::new(0, MAX_BODY, 4096);
        for frame in frames {
            raw.encode(frame, dst).unwrap();
        }
    }

    #[test_case(0, 1 ; "empty body still sends one frame")]
    #[test_case(1, 1 ; "single byte")]
    #[test_case(8, 1 ; "exactly one frame")]
    #[test_case(9, 2 ; "one byte over")]
    #[test_case(25, 4 ; "several frames")]
    fn test_split_frame_count(len: usize, expected: usize) {
        let frames = split_packet(0, 0x31, 5, Bytes::from(vec![7u8; len]), MAX_BODY).unwrap();
        assert_eq!(frames.len(), expected);
        assert!(frames.iter().all(|f| f.packet_id == 5 && f.packet_size == len as i32));
        assert!(frames.iter().all(|f| f.body.len() <= MAX_BODY));
        assert_eq!(frames.iter().map(|f| f.body.len()).sum::<usize>(), len);
    }

    #[test_case(0 ; "empty")]
    #[test_case(1 ; "one byte")]
    #[test_case(MAX_BODY - 1 ; "just under a frame")]
    #[test_case(MAX_BODY ; "one full frame")]
    #[test_case(MAX_BODY + 1 ; "just over a frame")]
    #[test_case(2 * MAX_BODY ; "two full frames")]
    #[test_case(3 * MAX_BODY + 5 ; "several frames and a tail")]
    fn test_round_trip(len: usize) {
        let mut tx = codec(4);
        let mut rx = codec(4);
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut wire = BytesMut::new();
        tx.encode(Message::Block(payload.clone()), &mut wire).unwrap();
        tx.encode(Message::BftVote(vec![9u8; len]), &mut wire).unwrap();

        assert_eq!(rx.decode(&mut wire).unwrap(), Some(Message::Block(payload)));
        assert_eq!(rx.decode(&mut wire).unwrap(), Some(Message::BftVote(vec![9u8; len])));
        assert_eq!(rx.decode(&mut wire).unwrap(), None);
        assert!(wire.is_empty());
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn test_packet_ids_wrap() {
        let ids = PacketIdGenerator::starting_after(i32::MAX - 1);
        assert_eq!(ids.next_id(), i32::MAX);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn test_large_message_is_chunked_and_reassembled() {
        let mut tx = codec(4);
        let mut rx = codec(4);
        let message = Message::Block((0..=200u8).collect());
        let mut buf = BytesMut::new();
        tx.encode(message.clone(), &mut buf).unwrap();

        let mut wire = BytesMut::new();
        let mut decoded = None;
        for byte in buf.iter() {
            wire.extend_from_slice(&[*byte]);
            if let Some(m) = rx.decode(&mut wire).unwrap() {
                decoded = Some(m);
            }
        }
        assert_eq!(decoded, Some(message));
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn test_interleaved_packets() {
        let a = split_packet(0, MessageCode::Block.to_u8(), 1, Bytes::from(vec![1u8; 20]), MAX_BODY).unwrap();
        let b = split_packet(0, MessageCode::BftVote.to_u8(), 2, Bytes::from(vec![2u8; 12]), MAX_BODY).unwrap();
        let mut wire = BytesMut::new();
        encode_frames(vec![a[0].clone(), b[0].clone(), a[1].clone(), b[1].clone(), a[2].clone()], &mut wire);

        let mut rx = codec(4);
        assert_eq!(rx.decode(&mut wire).unwrap(), Some(Message::BftVote(vec![2u8; 12])));
        assert_eq!(rx.decode(&mut wire).unwrap(), Some(Message::Block(vec![1u8; 20])));
        assert_eq!(rx.decode(&mut wire).unwrap(), None);
    }

    #[test]
    fn test_eviction_drops_oldest_partial_packet() {
        let a = split_packet(0, MessageCode::Block.to_u8(), 1, Bytes::from(vec![1u8; 16]), MAX_BODY).unwrap();
        let b = split_packet(0, MessageCode::Block.to_u8(), 2, Bytes::from(vec![2u8; 16]), MAX_BODY).unwrap();
        let mut wire = BytesMut::new();
        encode_frames(vec![a[0].clone(), b[0].clone(), a[1].clone()], &mut wire);

        let mut rx = codec(1);
        // a[1] restarts packet 1 after it was evicted by packet 2.
        assert_eq!(rx.decode(&mut wire).unwrap(), None);
        assert_eq!(rx.in_flight(), 1);

        encode_frames(vec![a[1].clone()], &mut wire);
        assert_eq!(rx.decode(&mut wire).unwrap(), Some(Message::Block(vec![1u8; 16])));
    }

    #[test]
    fn test_overfull_packet_is_corrupt() {
        let first = Frame::new(0, MessageCode::Block.to_u8(), 9, 10, Bytes::from(vec![0u8; 6]));
        let second = Frame::new(0, MessageCode::Block.to_u8(), 9, 10, Bytes::from(vec![0u8; 6]));
        let mut wire = BytesMut::new();
        encode_frames(vec![first, second], &mut wire);
        assert_matches!(codec(4).decode(&mut wire), Err(P2pError::CorruptPacket(9)));
    }

    #[test]
    fn test_unknown_codes_are_skipped() {
        let mut wire = BytesMut::new();
        encode_frames(
            vec![Frame::new(0, 0x7e, 1, 3, Bytes::from_static(b"???"))],
            &mut wire,
        );
        let mut tx = codec(4);
        tx.encode(Message::Disconnect(ReasonCode::BadPeer), &mut wire).unwrap();

        let mut rx = codec(4);
        assert_eq!(
            rx.decode(&mut wire).unwrap(),
            Some(Message::Disconnect(ReasonCode::BadPeer))
        );
    }

    #[test]
    fn test_empty_body_message() {
        let mut buf = BytesMut::new();
        codec(4).encode(Message::GetNodes, &mut buf).unwrap();
        assert_eq!(buf.len(), crate::frame::HEADER_SIZE);
        assert_eq!(codec(4).decode(&mut buf).unwrap(), Some(Message::GetNodes));
    }

    #[test]
    fn test_encoder_rejects_oversized_message() {
        let mut tx = MessageCodec::new(FrameCodec::new(0, 8, 16), PacketIdGenerator::new(), 4);
        assert_matches!(
            tx.encode(Message::Block(vec![0u8; 17]), &mut BytesMut::new()),
            Err(P2pError::PacketTooLarge { size: 17, max: 16 })
        );
    }
}
