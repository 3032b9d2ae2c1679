//! On-air packet format
//!
//! Wire layout (9 + N bytes, N <= 246):
//!
//! ```text
//! [src: u8][dest: u8][total_fragments: u8][fragment_index: u8][payload_len: u8]
//! [header_crc: u16 BE][payload_crc: u16 BE][payload: N bytes]
//! ```
//!
//! The header CRC covers the five header bytes, the payload CRC covers exactly
//! `payload_len` payload bytes. Both are seeded with zero.

use core::fmt;

use crate::config::protocol::{CRC_SEED, HEADER_FIELDS_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD, PACKET_OVERHEAD};
use crate::protocol::crc::crc16;
use heapless::Vec;

/// Errors returned when parsing a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the fixed packet overhead
    TooShort,
    /// `payload_len` exceeds the maximum payload size
    PayloadTooLarge,
    /// Frame length disagrees with `payload_len`
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort => write!(f, "frame shorter than packet overhead"),
            DecodeError::PayloadTooLarge => write!(f, "payload length exceeds {}", MAX_PAYLOAD),
            DecodeError::LengthMismatch { expected, actual } => {
                write!(f, "frame is {} bytes, header declares {}", actual, expected)
            }
        }
    }
}

/// Which checksum failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcMismatch {
    Header,
    Payload,
}

impl fmt::Display for CrcMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrcMismatch::Header => write!(f, "header CRC mismatch"),
            CrcMismatch::Payload => write!(f, "payload CRC mismatch"),
        }
    }
}

/// Packet header as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub src_addr: u8,
    pub dest_addr: u8,
    pub total_fragments: u8,
    /// 0-based position of this packet within its message
    pub fragment_index: u8,
    pub payload_len: u8,
    pub header_crc: u16,
}

impl PacketHeader {
    /// The five CRC-covered header bytes in wire order
    pub fn field_bytes(&self) -> [u8; HEADER_FIELDS_SIZE] {
        [
            self.src_addr,
            self.dest_addr,
            self.total_fragments,
            self.fragment_index,
            self.payload_len,
        ]
    }

    /// CRC the header should carry given its current fields
    pub fn compute_crc(&self) -> u16 {
        crc16(CRC_SEED, &self.field_bytes())
    }

    /// Returns true for the final fragment of a message
    pub fn is_last_fragment(&self) -> bool {
        self.fragment_index as u16 + 1 == self.total_fragments as u16
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:02X} -> 0x{:02X} frag {}/{} len {} hcrc 0x{:04X}",
            self.src_addr,
            self.dest_addr,
            self.fragment_index,
            self.total_fragments,
            self.payload_len,
            self.header_crc
        )
    }
}

/// A single radio packet: header plus bounded payload.
///
/// Packets are immutable once built. The only constructors are [`Packet::new`],
/// which computes both CRCs, and [`Packet::decode`], which keeps the received
/// CRCs so [`Packet::verify`] can check them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Vec<u8, MAX_PAYLOAD>,
    payload_crc: u16,
}

impl Packet {
    /// Build a packet and compute its CRCs.
    ///
    /// Returns `None` if `payload` exceeds the maximum payload size.
    pub fn new(
        src_addr: u8,
        dest_addr: u8,
        total_fragments: u8,
        fragment_index: u8,
        payload: &[u8],
    ) -> Option<Self> {
        let payload = Vec::from_slice(payload).ok()?;

        let mut header = PacketHeader {
            src_addr,
            dest_addr,
            total_fragments,
            fragment_index,
            payload_len: payload.len() as u8,
            header_crc: 0,
        };
        header.header_crc = header.compute_crc();
        let payload_crc = crc16(CRC_SEED, &payload);

        Some(Self {
            header,
            payload,
            payload_crc,
        })
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_crc(&self) -> u16 {
        self.payload_crc
    }

    /// Serialize to the on-air representation
    pub fn encode(&self) -> Vec<u8, MAX_PACKET_SIZE> {
        let mut out = Vec::new();
        // Capacity is PACKET_OVERHEAD + MAX_PAYLOAD, the pushes cannot fail
        let _ = out.extend_from_slice(&self.header.field_bytes());
        let _ = out.extend_from_slice(&self.header.header_crc.to_be_bytes());
        let _ = out.extend_from_slice(&self.payload_crc.to_be_bytes());
        let _ = out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a received frame by fixed offsets.
    ///
    /// CRCs are taken as received and are not checked here; call
    /// [`Packet::verify`] before trusting the contents.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < PACKET_OVERHEAD {
            return Err(DecodeError::TooShort);
        }

        let payload_len = bytes[4] as usize;
        if payload_len > MAX_PAYLOAD {
            return Err(DecodeError::PayloadTooLarge);
        }

        let expected = PACKET_OVERHEAD + payload_len;
        if bytes.len() != expected {
            return Err(DecodeError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let header = PacketHeader {
            src_addr: bytes[0],
            dest_addr: bytes[1],
            total_fragments: bytes[2],
            fragment_index: bytes[3],
            payload_len: bytes[4],
            header_crc: u16::from_be_bytes([bytes[5], bytes[6]]),
        };
        let payload_crc = u16::from_be_bytes([bytes[7], bytes[8]]);
        let payload =
            Vec::from_slice(&bytes[PACKET_OVERHEAD..]).map_err(|_| DecodeError::PayloadTooLarge)?;

        Ok(Self {
            header,
            payload,
            payload_crc,
        })
    }

    /// Recompute both CRCs and report the first mismatch
    pub fn check_crc(&self) -> Result<(), CrcMismatch> {
        if self.header.compute_crc() != self.header.header_crc {
            return Err(CrcMismatch::Header);
        }
        if crc16(CRC_SEED, &self.payload) != self.payload_crc {
            return Err(CrcMismatch::Payload);
        }
        Ok(())
    }

    /// Returns true if both CRCs match the packet contents
    pub fn verify(&self) -> bool {
        self.check_crc().is_ok()
    }
}
