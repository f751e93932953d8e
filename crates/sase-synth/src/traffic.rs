//! Synthetic traffic
//!
//! Builds Ethernet/IPv4/UDP frames for driving the stages without a NIC.

use crate::buffer::Packet;
use bytes::{Bytes, BytesMut};

/// Ethernet header length
pub const ETHER_HDR_LEN: usize = 14;
/// IPv4 header length without options
pub const IPV4_HDR_LEN: usize = 20;
/// UDP header length
pub const UDP_HDR_LEN: usize = 8;
/// TCP header length without options
pub const TCP_HDR_LEN: usize = 20;

/// First payload byte of an Ethernet/IPv4/UDP frame
pub const UDP_PAYLOAD_OFFSET: usize = ETHER_HDR_LEN + IPV4_HDR_LEN + UDP_HDR_LEN;

/// Ethernet/IPv4/TCP header span, the region header-only reads stay within
pub const HEADER_READ_LEN: usize = ETHER_HDR_LEN + IPV4_HDR_LEN + TCP_HDR_LEN;

/// Minimum Ethernet frame without FCS
pub const MIN_FRAME_LEN: usize = 60;

const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
const SRC_IP: [u8; 4] = [10, 0, 0, 1];
const DST_IP: [u8; 4] = [10, 0, 0, 2];
const SRC_PORT: u16 = 1234;
const DST_PORT: u16 = 5678;

/// RFC 1071 checksum over an IPv4 header
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|c| u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)]) as u32)
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Raw Ethernet/IPv4/UDP frame of `len` bytes (at least the header span)
/// carrying `seq` big-endian at the start of the payload.
pub fn udp_frame(len: usize, seq: u64) -> BytesMut {
    let len = len.max(UDP_PAYLOAD_OFFSET);
    let mut frame = BytesMut::zeroed(len);
    let data = &mut frame[..];

    // Ethernet
    data[0..6].copy_from_slice(&DST_MAC);
    data[6..12].copy_from_slice(&SRC_MAC);
    data[12] = 0x08;
    data[13] = 0x00; // IPv4

    // IPv4
    let ip = ETHER_HDR_LEN;
    data[ip] = 0x45; // Ver + IHL
    data[ip + 2..ip + 4].copy_from_slice(&((len - ETHER_HDR_LEN) as u16).to_be_bytes());
    data[ip + 4..ip + 6].copy_from_slice(&(seq as u16).to_be_bytes());
    data[ip + 6] = 0x40; // DF
    data[ip + 8] = 64; // TTL
    data[ip + 9] = 17; // UDP
    data[ip + 12..ip + 16].copy_from_slice(&SRC_IP);
    data[ip + 16..ip + 20].copy_from_slice(&DST_IP);
    let csum = ipv4_checksum(&data[ip..ip + IPV4_HDR_LEN]);
    data[ip + 10..ip + 12].copy_from_slice(&csum.to_be_bytes());

    // UDP (checksum left zero)
    let udp = ip + IPV4_HDR_LEN;
    data[udp..udp + 2].copy_from_slice(&SRC_PORT.to_be_bytes());
    data[udp + 2..udp + 4].copy_from_slice(&DST_PORT.to_be_bytes());
    data[udp + 4..udp + 6].copy_from_slice(&((len - udp) as u16).to_be_bytes());

    // Payload: sequence number, truncated if the frame is short
    let seq_bytes = seq.to_be_bytes();
    let room = (len - UDP_PAYLOAD_OFFSET).min(seq_bytes.len());
    data[UDP_PAYLOAD_OFFSET..UDP_PAYLOAD_OFFSET + room].copy_from_slice(&seq_bytes[..room]);

    frame
}

/// Writable packet holding a fresh UDP frame
pub fn udp_packet(len: usize, seq: u64) -> Packet {
    Packet::unique(udp_frame(len, seq))
}

/// Generator handing out packets in sequence. In shared mode every packet is
/// a view of one template frame, so writers pay for a copy first.
#[derive(Debug)]
pub struct TrafficGen {
    len: usize,
    seq: u64,
    template: Option<Bytes>,
}

impl TrafficGen {
    /// Generator for `len`-byte frames
    pub fn new(len: usize, shared: bool) -> Self {
        Self {
            len,
            seq: 0,
            template: shared.then(|| udp_frame(len, 0).freeze()),
        }
    }

    /// Next packet in sequence
    pub fn next_packet(&mut self) -> Packet {
        let seq = self.seq;
        self.seq += 1;
        match &self.template {
            Some(frame) => Packet::shared(frame.clone()),
            None => udp_packet(self.len, seq),
        }
    }

    /// Packets handed out so far
    pub fn sent(&self) -> u64 {
        self.seq
    }
}
