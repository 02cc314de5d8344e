//! Zero-copy TCP header parser.
//!
//! Everything the reassembler consumes lives in the first 20 bytes:
//! ports, sequence and acknowledgment numbers, and the flag byte. The
//! data offset is still honored so options never end up in the payload.

use super::ParseError;
use std::fmt;

/// Minimum TCP header length (no options)
pub const TCP_MIN_HEADER_LEN: usize = 20;

/// TCP flags bitmask constants
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
}

/// Zero-copy TCP header.
#[derive(Debug)]
pub struct TcpHeader<'a> {
    data: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeader<'a> {
    /// Parse a TCP header from a byte slice.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < TCP_MIN_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: TCP_MIN_HEADER_LEN,
                actual: data.len(),
            });
        }

        let data_offset = ((data[12] >> 4) & 0x0F) as usize;
        let header_len = data_offset * 4;

        if header_len < TCP_MIN_HEADER_LEN {
            return Err(ParseError::InvalidHeader(format!(
                "TCP data offset too small: {} (min 5)",
                data_offset
            )));
        }

        if data.len() < header_len {
            return Err(ParseError::TooShort {
                expected: header_len,
                actual: data.len(),
            });
        }

        Ok(TcpHeader { data, header_len })
    }

    /// Source port.
    #[inline]
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    /// Destination port.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    /// Sequence number.
    #[inline]
    pub fn sequence_number(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    /// Acknowledgment number.
    #[inline]
    pub fn ack_number(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    /// Header length in bytes.
    #[inline]
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    #[inline]
    pub fn fin(&self) -> bool {
        self.data[13] & flags::FIN != 0
    }

    #[inline]
    pub fn syn(&self) -> bool {
        self.data[13] & flags::SYN != 0
    }

    #[inline]
    pub fn rst(&self) -> bool {
        self.data[13] & flags::RST != 0
    }

    #[inline]
    pub fn psh(&self) -> bool {
        self.data[13] & flags::PSH != 0
    }

    #[inline]
    pub fn ack(&self) -> bool {
        self.data[13] & flags::ACK != 0
    }

    /// Payload after the TCP header.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.header_len..]
    }
}

impl<'a> fmt::Display for TcpHeader<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{} -> :{} seq={} ack={} len={}",
            self.src_port(),
            self.dst_port(),
            self.sequence_number(),
            self.ack_number(),
            self.payload().len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tcp_segment(payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; 20];
        pkt[0] = 0xC0;
        pkt[1] = 0x00; // src port = 49152
        pkt[2] = 0x00;
        pkt[3] = 0x50; // dst port = 80
        // Sequence number = 1000
        pkt[6] = 0x03;
        pkt[7] = 0xE8;
        // Ack = 5000
        pkt[10] = 0x13;
        pkt[11] = 0x88;
        // Data offset = 5 (20 bytes)
        pkt[12] = 0x50;
        pkt[13] = flags::ACK | flags::PSH;
        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn parse_tcp_segment() {
        let pkt = make_tcp_segment(b"GET / HTTP/1.1\r\n\r\n");
        let hdr = TcpHeader::parse(&pkt).unwrap();
        assert_eq!(hdr.src_port(), 49152);
        assert_eq!(hdr.dst_port(), 80);
        assert_eq!(hdr.sequence_number(), 1000);
        assert_eq!(hdr.ack_number(), 5000);
        assert!(hdr.ack());
        assert!(hdr.psh());
        assert!(!hdr.fin());
        assert!(!hdr.syn());
        assert_eq!(hdr.payload(), b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn options_excluded_from_payload() {
        let mut pkt = make_tcp_segment(b"");
        pkt[12] = 0x60; // data offset 6 = 24 bytes
        pkt.extend_from_slice(&[0x01, 0x01, 0x01, 0x00]); // NOP padding
        pkt.extend_from_slice(b"body");
        let hdr = TcpHeader::parse(&pkt).unwrap();
        assert_eq!(hdr.header_len(), 24);
        assert_eq!(hdr.payload(), b"body");
    }

    #[test]
    fn reject_short_tcp() {
        let pkt = [0u8; 19];
        assert!(TcpHeader::parse(&pkt).is_err());
    }
}
