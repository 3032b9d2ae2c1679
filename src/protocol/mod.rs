//! LoRa packet protocol
//!
//! Packet codec, checksums and message fragmentation.

pub mod crc;
pub mod fragment;
pub mod packet;

pub use fragment::{fragment, FragmentError, ReassemblyBuffer, ReassemblyError};
pub use packet::{CrcMismatch, DecodeError, Packet, PacketHeader};
