pub mod ethernet;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// EtherType constants we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            0x0800 => EtherType::Ipv4,
            0x86DD => EtherType::Ipv6,
            other => EtherType::Unknown(other),
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Ipv6 => write!(f, "IPv6"),
            EtherType::Unknown(v) => write!(f, "Unknown(0x{:04x})", v),
        }
    }
}

/// Errors from protocol parsing
#[derive(Debug)]
pub enum ParseError {
    /// Not enough bytes to parse the header
    TooShort { expected: usize, actual: usize },
    /// Invalid header values
    InvalidHeader(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::TooShort { expected, actual } => {
                write!(f, "packet too short: need {} bytes, got {}", expected, actual)
            }
            ParseError::InvalidHeader(msg) => write!(f, "invalid header: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Which side of the monitored port a packet belongs to.
///
/// Incoming = destination port matches the monitored port (request
/// direction); outgoing = source port matches (response direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// TCP flag bits relevant to flow lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
}

/// An owned, decoded TCP segment on the monitored port.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub direction: Direction,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub payload: Vec<u8>,
}

impl PacketRecord {
    /// The sequence number of the byte after this segment's payload.
    pub fn seq_end(&self) -> u32 {
        self.seq.wrapping_add(self.payload.len() as u32)
    }

    /// Address of the non-monitored endpoint (the peer talking to the
    /// monitored service).
    pub fn peer_addr(&self) -> SocketAddr {
        match self.direction {
            Direction::Incoming => SocketAddr::new(self.src_addr, self.src_port),
            Direction::Outgoing => SocketAddr::new(self.dst_addr, self.dst_port),
        }
    }
}

/// Decode one captured frame down to a TCP segment on the monitored port.
///
/// `Ok(None)` means the frame was well-formed but not for us (non-IP,
/// non-TCP, other ports, or a non-first IP fragment); `Err` means the
/// frame was malformed and should be counted as a decode failure.
pub fn decode_packet(data: &[u8], monitored_port: u16) -> Result<Option<PacketRecord>, ParseError> {
    let eth = ethernet::EthernetHeader::parse(data)?;

    let (src_addr, dst_addr, l4_data) = match eth.ether_type() {
        EtherType::Ipv4 => {
            let hdr = ipv4::Ipv4Header::parse(eth.payload())?;
            if hdr.protocol() != ipv4::IP_PROTO_TCP {
                return Ok(None);
            }
            // Fragmented payloads can't be reassembled here; only the first
            // fragment carries the TCP header anyway.
            if hdr.fragment_offset() != 0 {
                return Ok(None);
            }
            (
                IpAddr::V4(hdr.src_addr()),
                IpAddr::V4(hdr.dst_addr()),
                hdr.payload(),
            )
        }
        EtherType::Ipv6 => {
            let hdr = ipv6::Ipv6Header::parse(eth.payload())?;
            if hdr.next_header() != ipv4::IP_PROTO_TCP {
                return Ok(None);
            }
            (
                IpAddr::V6(hdr.src_addr()),
                IpAddr::V6(hdr.dst_addr()),
                hdr.payload(),
            )
        }
        EtherType::Unknown(_) => return Ok(None),
    };

    let tcp = tcp::TcpHeader::parse(l4_data)?;

    let direction = if tcp.dst_port() == monitored_port {
        Direction::Incoming
    } else if tcp.src_port() == monitored_port {
        Direction::Outgoing
    } else {
        return Ok(None);
    };

    Ok(Some(PacketRecord {
        direction,
        src_addr,
        dst_addr,
        src_port: tcp.src_port(),
        dst_port: tcp.dst_port(),
        seq: tcp.sequence_number(),
        ack: tcp.ack_number(),
        flags: TcpFlags {
            syn: tcp.syn(),
            ack: tcp.ack(),
            fin: tcp.fin(),
            rst: tcp.rst(),
            psh: tcp.psh(),
        },
        payload: tcp.payload().to_vec(),
    }))
}


#[cfg(test)]
mod tests {
    use super::testutil::{build_frame, MONITORED_PORT};
    use super::*;

    #[test]
    fn decode_incoming_segment() {
        let frame = build_frame(true, 1000, 1, false, b"GET / HTTP/1.1\r\n\r\n");
        let pkt = decode_packet(&frame, MONITORED_PORT).unwrap().unwrap();
        assert_eq!(pkt.direction, Direction::Incoming);
        assert_eq!(pkt.seq, 1000);
        assert_eq!(pkt.ack, 1);
        assert_eq!(pkt.payload, b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(pkt.seq_end(), 1018);
        assert_eq!(pkt.dst_port, MONITORED_PORT);
        assert_eq!(pkt.peer_addr().port(), 49152);
    }

    #[test]
    fn decode_outgoing_segment() {
        let frame = build_frame(false, 500, 1018, false, b"HTTP/1.1 200 OK\r\n\r\n");
        let pkt = decode_packet(&frame, MONITORED_PORT).unwrap().unwrap();
        assert_eq!(pkt.direction, Direction::Outgoing);
        assert_eq!(pkt.src_port, MONITORED_PORT);
        assert_eq!(pkt.ack, 1018);
    }

    #[test]
    fn other_port_is_filtered() {
        let frame = build_frame(true, 1, 1, false, b"hello");
        assert!(decode_packet(&frame, 9999).unwrap().is_none());
    }

    #[test]
    fn fin_without_payload_keeps_flags() {
        let frame = build_frame(true, 1, 1, true, b"");
        let pkt = decode_packet(&frame, MONITORED_PORT).unwrap().unwrap();
        assert!(pkt.flags.fin);
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let frame = build_frame(true, 1, 1, false, b"data");
        assert!(decode_packet(&frame[..20], MONITORED_PORT).is_err());
    }

    #[test]
    fn non_ip_frame_is_filtered() {
        let mut frame = build_frame(true, 1, 1, false, b"");
        // Rewrite the EtherType to ARP.
        frame[12] = 0x08;
        frame[13] = 0x06;
        assert!(decode_packet(&frame, MONITORED_PORT).unwrap().is_none());
    }
}
