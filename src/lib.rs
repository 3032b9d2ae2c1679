#![cfg_attr(not(test), no_std)]

//! LoRa network layer for the ground station / flight computer link
//!
//! Packets are CRC-protected, messages are AES-128-GCM sealed and fragmented,
//! and a set of embassy tasks moves them between the half-duplex radio and
//! the application.

extern crate alloc;

pub mod config;
pub mod lora;
pub mod network;
pub mod protocol;
pub mod security;
pub mod tasks;
pub mod transport;

pub use network::{DeviceContext, DeviceRegistry, DeviceStatus};
pub use protocol::{Packet, PacketHeader};
pub use security::SessionKeys;
pub use tasks::{MessageSink, RejectReason};
pub use transport::{MessageId, SubmitError, TransportConfig, TransportContext, TxOutcome};
