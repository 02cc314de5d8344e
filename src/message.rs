//! Per-flow message buffer: out-of-order TCP segments accumulating into
//! one HTTP message.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use uuid::Uuid;

use crate::http::{self, BodyMode, Verdict};
use crate::protocol::Direction;

/// A fully (or best-effort) reconstructed HTTP message handed to the sink.
#[derive(Debug, Clone)]
pub struct CapturedMessage {
    /// Shared between a request and its paired response.
    pub id: Uuid,
    pub direction: Direction,
    /// Headers, CRLFCRLF, then body. Chunked framing is preserved; the
    /// `Expect` header of a two-phase request is stripped.
    pub bytes: Vec<u8>,
    /// Capture-clock second at which the flow was first seen.
    pub created_at: f64,
    /// The non-monitored endpoint.
    pub peer_addr: SocketAddr,
    /// Emitted at expiration before its framing was satisfied.
    pub truncated: bool,
}

/// One direction of one HTTP exchange.
///
/// Segments are stored keyed by their offset relative to `start_seq`,
/// which is kept equal to the smallest sequence number seen; an earlier
/// segment rebases the map. Stored ranges never overlap: the first writer
/// wins and later packets are clipped to the gaps they actually fill.
#[derive(Debug)]
pub struct MessageBuffer {
    pub id: Uuid,
    pub direction: Direction,
    pub created_at: f64,
    pub peer_addr: SocketAddr,
    /// Ack values merged into this flow.
    pub associated_acks: Vec<u32>,
    /// Latest framing classification from the boundary detector.
    pub body_mode: BodyMode,
    /// FIN or RST observed for this direction.
    pub closed: bool,
    /// The paired request had no body, so a frameless response completes
    /// at its header terminator.
    pub response_to_bodyless: bool,
    start_seq: u32,
    segments: BTreeMap<u32, Vec<u8>>,
}

impl MessageBuffer {
    pub fn new(ts: f64, direction: Direction, peer_addr: SocketAddr, ack: u32) -> Self {
        MessageBuffer {
            id: Uuid::new_v4(),
            direction,
            created_at: ts,
            peer_addr,
            associated_acks: vec![ack],
            body_mode: BodyMode::Unknown,
            closed: false,
            response_to_bodyless: false,
            start_seq: 0,
            segments: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn start_seq(&self) -> u32 {
        self.start_seq
    }

    /// Sequence number one past the highest stored byte.
    pub fn end_seq(&self) -> u32 {
        match self.segments.iter().next_back() {
            Some((&off, data)) => self.start_seq.wrapping_add(off + data.len() as u32),
            None => self.start_seq,
        }
    }

    /// Record an ack value that aliases this flow.
    pub fn note_ack(&mut self, ack: u32) {
        if !self.associated_acks.contains(&ack) {
            self.associated_acks.push(ack);
        }
    }

    /// Insert a segment's payload at its sequence position. Duplicates are
    /// dropped; partial overlaps are clipped so the first writer wins.
    pub fn add(&mut self, seq: u32, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        if self.segments.is_empty() {
            self.start_seq = seq;
            self.segments.insert(0, payload.to_vec());
            return;
        }

        // A segment before the current start rebases the whole map.
        if (seq.wrapping_sub(self.start_seq) as i32) < 0 {
            let shift = self.start_seq.wrapping_sub(seq);
            let old = std::mem::take(&mut self.segments);
            for (off, data) in old {
                self.segments.insert(off + shift, data);
            }
            self.start_seq = seq;
        }

        let mut offset = seq.wrapping_sub(self.start_seq);
        let mut remaining = payload;
        while !remaining.is_empty() {
            // Skip whatever an earlier segment already covers.
            if let Some((&prev_off, prev)) = self.segments.range(..=offset).next_back() {
                let prev_end = prev_off + prev.len() as u32;
                if prev_end > offset {
                    let covered = (prev_end - offset) as usize;
                    if covered >= remaining.len() {
                        return;
                    }
                    remaining = &remaining[covered..];
                    offset = prev_end;
                    continue;
                }
            }
            // Store up to the next segment, then continue past it.
            match self.segments.range(offset..).next().map(|(&o, _)| o) {
                Some(next_off) if next_off < offset + remaining.len() as u32 => {
                    let take = (next_off - offset) as usize;
                    if take > 0 {
                        self.segments.insert(offset, remaining[..take].to_vec());
                    }
                    remaining = &remaining[take..];
                    offset = next_off;
                }
                _ => {
                    self.segments.insert(offset, remaining.to_vec());
                    return;
                }
            }
        }
    }

    /// The contiguous prefix: segments in order with no gap. Out-of-order
    /// tail segments are held back until the gap fills.
    pub fn assembled(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut expected = 0u32;
        for (&off, data) in &self.segments {
            if off != expected {
                break;
            }
            out.extend_from_slice(data);
            expected = off + data.len() as u32;
        }
        out
    }

    /// All stored segments with absolute sequence numbers, for merging
    /// into another buffer.
    pub fn segments(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.segments
            .iter()
            .map(move |(&off, data)| (self.start_seq.wrapping_add(off), data.as_slice()))
    }

    /// Run the boundary detector over the assembled prefix.
    pub fn inspect(&self) -> Verdict {
        http::inspect(&self.assembled(), self.direction, self.response_to_bodyless)
    }

    /// Produce the sink record: assembled prefix, preamble sliced off,
    /// `Expect` stripped from two-phase requests.
    pub fn into_message(self, truncated: bool) -> CapturedMessage {
        let assembled = self.assembled();
        let verdict = http::inspect(&assembled, self.direction, self.response_to_bodyless);
        let mut bytes = assembled[verdict.skip.min(assembled.len())..].to_vec();
        if self.direction == Direction::Incoming && http::has_expect_header(&bytes) {
            bytes = http::strip_expect(&bytes);
        }
        CapturedMessage {
            id: self.id,
            direction: self.direction,
            bytes,
            created_at: self.created_at,
            peer_addr: self.peer_addr,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn buffer() -> MessageBuffer {
        MessageBuffer::new(
            0.0,
            Direction::Incoming,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 49152),
            1,
        )
    }

    #[test]
    fn in_order_segments_assemble() {
        let mut buf = buffer();
        buf.add(100, b"GET / ");
        buf.add(106, b"HTTP/1.1\r\n\r\n");
        assert_eq!(buf.assembled(), b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(buf.start_seq(), 100);
        assert_eq!(buf.end_seq(), 118);
    }

    #[test]
    fn gap_holds_back_the_tail() {
        let mut buf = buffer();
        buf.add(100, b"abc");
        buf.add(106, b"ghi");
        assert_eq!(buf.assembled(), b"abc");
        buf.add(103, b"def");
        assert_eq!(buf.assembled(), b"abcdefghi");
    }

    #[test]
    fn earlier_segment_rebases_the_buffer() {
        let mut buf = buffer();
        buf.add(106, b"HTTP/1.1\r\n\r\n");
        assert_eq!(buf.assembled(), b"HTTP/1.1\r\n\r\n");
        buf.add(100, b"GET / ");
        assert_eq!(buf.start_seq(), 100);
        assert_eq!(buf.assembled(), b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn duplicate_segment_first_writer_wins() {
        let mut buf = buffer();
        buf.add(100, b"aaaa");
        buf.add(100, b"bbbb");
        assert_eq!(buf.assembled(), b"aaaa");
    }

    #[test]
    fn covered_segment_is_dropped() {
        let mut buf = buffer();
        buf.add(100, b"abcdefgh");
        buf.add(102, b"XX");
        assert_eq!(buf.assembled(), b"abcdefgh");
    }

    #[test]
    fn partial_overlap_is_clipped() {
        let mut buf = buffer();
        buf.add(100, b"abcd");
        // Starts inside the stored range, extends past it.
        buf.add(102, b"XXef");
        assert_eq!(buf.assembled(), b"abcdef");
    }

    #[test]
    fn overlap_spanning_a_stored_segment_fills_both_gaps() {
        let mut buf = buffer();
        buf.add(103, b"d");
        buf.add(100, b"abcDef");
        assert_eq!(buf.assembled(), b"abcdef");
    }

    #[test]
    fn wrapping_sequence_numbers() {
        let mut buf = buffer();
        buf.add(u32::MAX - 1, b"ab");
        buf.add(0, b"cd");
        assert_eq!(buf.assembled(), b"abcd");
        assert_eq!(buf.start_seq(), u32::MAX - 1);
        assert_eq!(buf.end_seq(), 2);
    }

    #[test]
    fn message_strips_expect_header() {
        let mut buf = buffer();
        buf.add(
            1,
            b"POST / HTTP/1.1\r\nContent-Length: 2\r\nExpect: 100-continue\r\n\r\n",
        );
        buf.add(61, b"ab");
        let msg = buf.into_message(false);
        assert_eq!(
            msg.bytes,
            b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nab"
        );
        assert!(!msg.truncated);
    }

    #[test]
    fn message_skips_continue_preamble() {
        let mut buf = MessageBuffer::new(
            0.0,
            Direction::Outgoing,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 49152),
            7,
        );
        buf.add(1, b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let msg = buf.into_message(false);
        assert_eq!(msg.bytes, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }
}
