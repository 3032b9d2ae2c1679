//! Per-peer session context
//!
//! A `DeviceContext` owns everything the link keeps about one peer: its
//! authentication state, AEAD material with its message counters, and the
//! buffers of the message currently being sent or received. State only changes
//! through the methods below, which the transport calls while holding the
//! registry lock.

use alloc::vec::Vec;
use core::fmt;

use crate::config::security::TAG_SIZE;
use crate::protocol::fragment::{fragment, FragmentError, ReassemblyBuffer, ReassemblyError};
use crate::protocol::packet::Packet;
use crate::security::{self, SecurityError, SessionKeys};

/// Authentication state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// First packet seen, not yet provisioned
    AddingDeviceToNetwork,
    Online,
    Offline,
    /// Sent a message without valid credentials
    Unauthorized,
    KeyExchangeStarted,
    PublicKeySent,
    DevicePublicKeyReceived,
    DeviceNetworkCredentialsVerified,
}

/// Progress of the message exchange with a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    ConnectionEstablished,
    MessageSent,
    /// Fragment 0 received, waiting for the rest
    ReceivingMessage,
    /// Last fragment received, waiting for processing
    MessageReceived,
    /// Reassembly found gaps; late fragments fill the open buffer
    WaitingForPacketCorrection,
}

/// Result of storing an inbound fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentProgress {
    /// More fragments expected
    Stored,
    /// Message is ready to be processed
    MessageReady,
}

/// Errors when sealing an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundError {
    /// Peer is not ONLINE
    Unauthorized,
    /// Message counter used up, the peer needs fresh keys
    NonceExhausted,
    TooLarge,
    OutOfMemory,
}

impl fmt::Display for OutboundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundError::Unauthorized => write!(f, "device not authorized"),
            OutboundError::NonceExhausted => write!(f, "message counter exhausted"),
            OutboundError::TooLarge => write!(f, "message too large"),
            OutboundError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

/// Errors when opening an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundError {
    Reassembly(ReassemblyError),
    /// Peer is not ONLINE, it has been marked UNAUTHORIZED
    Unauthorized,
    /// Counter not above the last accepted message, already delivered
    Replayed { counter: u64 },
    Security(SecurityError),
}

impl fmt::Display for InboundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundError::Reassembly(e) => write!(f, "reassembly failed: {}", e),
            InboundError::Unauthorized => write!(f, "device not authorized"),
            InboundError::Replayed { counter } => write!(f, "replayed message {}", counter),
            InboundError::Security(e) => write!(f, "{}", e),
        }
    }
}

impl From<ReassemblyError> for InboundError {
    fn from(error: ReassemblyError) -> Self {
        InboundError::Reassembly(error)
    }
}

/// Session context for one peer
#[derive(Debug)]
pub struct DeviceContext {
    address: u8,
    status: DeviceStatus,
    connection: ConnectionStatus,
    keys: SessionKeys,
    /// Tag of the most recent message sealed or opened
    tag: [u8; TAG_SIZE],
    /// Counter for the next message we seal
    tx_counter: u64,
    /// Highest counter accepted from the peer
    rx_counter: Option<u64>,
    /// Sealed packets between `seal_outbound` and `take_tx_packets`
    tx_packets: Vec<Packet>,
    rx_packets: Option<ReassemblyBuffer>,
    /// Fragment indices missing at the last reassembly attempt
    faulty_packets: Vec<u8>,
}

impl DeviceContext {
    /// Context for a newly seen peer
    pub fn new(address: u8) -> Self {
        Self {
            address,
            status: DeviceStatus::AddingDeviceToNetwork,
            connection: ConnectionStatus::ConnectionEstablished,
            keys: SessionKeys::empty(),
            tag: [0; TAG_SIZE],
            tx_counter: 0,
            rx_counter: None,
            tx_packets: Vec::new(),
            rx_packets: None,
            faulty_packets: Vec::new(),
        }
    }

    /// Context for this station itself
    pub(crate) fn local(address: u8) -> Self {
        let mut ctx = Self::new(address);
        ctx.status = DeviceStatus::Online;
        ctx
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    pub fn tag(&self) -> &[u8; TAG_SIZE] {
        &self.tag
    }

    /// Sealed packets not yet handed to the transmit queue
    pub fn tx_packets(&self) -> &[Packet] {
        &self.tx_packets
    }

    /// Counter the next sealed message will carry
    pub fn tx_counter(&self) -> u64 {
        self.tx_counter
    }

    /// Fragment indices that were missing at the last failed reassembly
    pub fn faulty_packets(&self) -> &[u8] {
        &self.faulty_packets
    }

    /// True while a reassembly buffer is open
    pub fn has_open_message(&self) -> bool {
        self.rx_packets.is_some()
    }

    /// Install out-of-band key material and bring the peer ONLINE.
    ///
    /// Both message counters restart, so the material must be fresh.
    pub fn provision(&mut self, keys: SessionKeys) {
        self.keys = keys;
        self.tx_counter = 0;
        self.rx_counter = None;
        self.status = DeviceStatus::Online;
    }

    pub fn mark_offline(&mut self) {
        self.status = DeviceStatus::Offline;
    }

    pub fn mark_unauthorized(&mut self) {
        self.status = DeviceStatus::Unauthorized;
    }

    /// Store an inbound fragment by index.
    ///
    /// Fragment 0 discards any incomplete message and opens a new buffer sized
    /// from its `total_fragments`. Other fragments need an open buffer.
    pub fn store_fragment(&mut self, packet: Packet) -> Result<FragmentProgress, ReassemblyError> {
        let header = *packet.header();

        if header.fragment_index == 0 {
            self.rx_packets = Some(ReassemblyBuffer::new(header.src_addr, header.total_fragments));
            self.faulty_packets.clear();
            self.connection = ConnectionStatus::ReceivingMessage;
        }

        let buffer = self.rx_packets.as_mut().ok_or(ReassemblyError::BufferEmpty)?;
        buffer.insert(packet)?;

        let ready = match self.connection {
            ConnectionStatus::WaitingForPacketCorrection => buffer.is_complete(),
            _ => header.is_last_fragment(),
        };

        if ready {
            self.connection = ConnectionStatus::MessageReceived;
            Ok(FragmentProgress::MessageReady)
        } else {
            Ok(FragmentProgress::Stored)
        }
    }

    /// Rebuild the buffered message.
    ///
    /// On success the buffer is released. If fragments are missing the buffer stays
    /// open, the gaps are recorded and the context waits for correction.
    pub fn reassemble(&mut self) -> Result<Vec<u8>, ReassemblyError> {
        let buffer = self.rx_packets.as_ref().ok_or(ReassemblyError::BufferEmpty)?;

        match buffer.assemble() {
            Ok(message) => {
                self.rx_packets = None;
                self.faulty_packets.clear();
                self.connection = ConnectionStatus::ConnectionEstablished;
                Ok(message)
            }
            Err(ReassemblyError::Incomplete { first_missing }) => {
                self.faulty_packets = buffer.missing().collect();
                self.connection = ConnectionStatus::WaitingForPacketCorrection;
                Err(ReassemblyError::Incomplete { first_missing })
            }
            Err(e) => Err(e),
        }
    }

    /// Reassemble, authenticate and decrypt the received message.
    ///
    /// Peers that are not ONLINE have their message discarded and are marked
    /// UNAUTHORIZED. A message whose counter is not above the last accepted
    /// one is refused as a replay.
    pub fn open_inbound(&mut self) -> Result<Vec<u8>, InboundError> {
        let sealed = self.reassemble()?;

        if !self.is_online() {
            self.mark_unauthorized();
            return Err(InboundError::Unauthorized);
        }

        let opened =
            security::open(&self.keys, self.address, &sealed).map_err(InboundError::Security)?;
        if self.rx_counter.is_some_and(|last| opened.counter <= last) {
            return Err(InboundError::Replayed {
                counter: opened.counter,
            });
        }
        self.rx_counter = Some(opened.counter);
        self.tag = opened.tag;

        Ok(opened.plaintext)
    }

    /// Encrypt `message` for this peer and split it into packets from `src`.
    ///
    /// The packets stay in the context until taken with `take_tx_packets`.
    pub fn seal_outbound(&mut self, src: u8, message: &[u8]) -> Result<&[Packet], OutboundError> {
        if !self.is_online() {
            return Err(OutboundError::Unauthorized);
        }

        let counter = self.tx_counter;
        let next_counter = counter.checked_add(1).ok_or(OutboundError::NonceExhausted)?;

        let (sealed, tag) = security::seal(&self.keys, src, counter, message).map_err(|e| match e {
            SecurityError::OutOfMemory => OutboundError::OutOfMemory,
            _ => OutboundError::TooLarge,
        })?;
        self.tx_packets = fragment(&sealed, src, self.address).map_err(|e| match e {
            FragmentError::TooLarge => OutboundError::TooLarge,
            FragmentError::OutOfMemory => OutboundError::OutOfMemory,
        })?;

        self.tx_counter = next_counter;
        self.tag = tag;
        self.connection = ConnectionStatus::MessageSent;

        Ok(&self.tx_packets)
    }

    /// Move the sealed packets out once they are queued for transmission
    pub fn take_tx_packets(&mut self) -> Vec<Packet> {
        core::mem::take(&mut self.tx_packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::protocol::MAX_PAYLOAD;
    use crate::config::security::SEALED_OVERHEAD;

    fn keys() -> SessionKeys {
        SessionKeys::new([0x42; 16], [0x24; 12], [0x11; 16])
    }

    /// Packets a peer at 0x05 would send us as its message number `counter`
    fn numbered_packets(counter: u64, message: &[u8]) -> Vec<Packet> {
        let (sealed, _) = security::seal(&keys(), 0x05, counter, message).unwrap();
        fragment(&sealed, 0x05, 0x00).unwrap()
    }

    fn inbound_packets(message: &[u8]) -> Vec<Packet> {
        numbered_packets(0, message)
    }

    #[test]
    fn test_new_device_state() {
        let ctx = DeviceContext::new(0x05);
        assert_eq!(ctx.address(), 0x05);
        assert_eq!(ctx.status(), DeviceStatus::AddingDeviceToNetwork);
        assert_eq!(ctx.connection(), ConnectionStatus::ConnectionEstablished);
        assert!(!ctx.has_open_message());
    }

    #[test]
    fn test_provision_brings_online() {
        let mut ctx = DeviceContext::new(0x05);
        ctx.provision(keys());
        assert!(ctx.is_online());

        ctx.mark_offline();
        assert_eq!(ctx.status(), DeviceStatus::Offline);
    }

    #[test]
    fn test_connection_transitions() {
        let mut ctx = DeviceContext::new(0x05);
        ctx.provision(keys());
        let packets = inbound_packets(&[0xAB; 400]);
        assert_eq!(packets.len(), 2);

        let progress = ctx.store_fragment(packets[0].clone()).unwrap();
        assert_eq!(progress, FragmentProgress::Stored);
        assert_eq!(ctx.connection(), ConnectionStatus::ReceivingMessage);

        let progress = ctx.store_fragment(packets[1].clone()).unwrap();
        assert_eq!(progress, FragmentProgress::MessageReady);
        assert_eq!(ctx.connection(), ConnectionStatus::MessageReceived);

        assert_eq!(ctx.open_inbound().unwrap(), [0xAB; 400]);
        assert_eq!(ctx.connection(), ConnectionStatus::ConnectionEstablished);
        assert!(!ctx.has_open_message());
    }

    #[test]
    fn test_fragment_zero_discards_incomplete_message() {
        let mut ctx = DeviceContext::new(0x05);
        ctx.provision(keys());

        let stale = inbound_packets(&[0x01; 600]);
        ctx.store_fragment(stale[0].clone()).unwrap();
        ctx.store_fragment(stale[1].clone()).unwrap();

        let fresh = numbered_packets(1, b"fresh");
        assert_eq!(
            ctx.store_fragment(fresh[0].clone()).unwrap(),
            FragmentProgress::MessageReady
        );
        assert_eq!(ctx.open_inbound().unwrap(), b"fresh");
    }

    #[test]
    fn test_fragment_without_open_buffer() {
        let mut ctx = DeviceContext::new(0x05);
        let packets = inbound_packets(&[0x01; 600]);

        assert_eq!(
            ctx.store_fragment(packets[1].clone()),
            Err(ReassemblyError::BufferEmpty)
        );
        assert_eq!(ctx.reassemble(), Err(ReassemblyError::BufferEmpty));
    }

    #[test]
    fn test_missing_fragment_waits_for_correction() {
        let mut ctx = DeviceContext::new(0x05);
        ctx.provision(keys());
        let packets = inbound_packets(&[0x5A; 2 * MAX_PAYLOAD + 10]);
        assert_eq!(packets.len(), 3);

        ctx.store_fragment(packets[0].clone()).unwrap();
        let progress = ctx.store_fragment(packets[2].clone()).unwrap();
        assert_eq!(progress, FragmentProgress::MessageReady);

        assert_eq!(
            ctx.open_inbound(),
            Err(InboundError::Reassembly(ReassemblyError::Incomplete { first_missing: 1 }))
        );
        assert_eq!(ctx.connection(), ConnectionStatus::WaitingForPacketCorrection);
        assert_eq!(ctx.faulty_packets(), &[1]);
        assert!(ctx.has_open_message());

        // The late fragment completes the open buffer
        let progress = ctx.store_fragment(packets[1].clone()).unwrap();
        assert_eq!(progress, FragmentProgress::MessageReady);
        assert_eq!(ctx.open_inbound().unwrap(), [0x5A; 2 * MAX_PAYLOAD + 10]);
        assert!(ctx.faulty_packets().is_empty());
    }

    #[test]
    fn test_unprovisioned_device_marked_unauthorized() {
        let mut ctx = DeviceContext::new(0x05);
        let packets = inbound_packets(b"hello");
        ctx.store_fragment(packets[0].clone()).unwrap();

        assert_eq!(ctx.open_inbound(), Err(InboundError::Unauthorized));
        assert_eq!(ctx.status(), DeviceStatus::Unauthorized);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let mut ctx = DeviceContext::new(0x05);
        ctx.provision(SessionKeys::new([0x43; 16], [0x24; 12], [0x11; 16]));
        let packets = inbound_packets(b"hello");
        ctx.store_fragment(packets[0].clone()).unwrap();

        assert_eq!(
            ctx.open_inbound(),
            Err(InboundError::Security(SecurityError::AuthFailure))
        );
    }

    #[test]
    fn test_seal_outbound() {
        let mut ctx = DeviceContext::new(0x07);
        ctx.provision(keys());

        let packets = ctx.seal_outbound(0x00, &[0x33; 300]).unwrap().to_vec();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].header().src_addr, 0x00);
        assert_eq!(packets[0].header().dest_addr, 0x07);
        assert_eq!(ctx.connection(), ConnectionStatus::MessageSent);

        // Nonce, ciphertext and tag, then decrypt like the peer would
        let mut buffer = ReassemblyBuffer::new(0x00, 2);
        for packet in packets {
            buffer.insert(packet).unwrap();
        }
        let sealed = buffer.assemble().unwrap();
        assert_eq!(sealed.len(), 300 + SEALED_OVERHEAD);
        assert_eq!(&sealed[sealed.len() - TAG_SIZE..], ctx.tag());

        let opened = security::open(&keys(), 0x00, &sealed).unwrap();
        assert_eq!(opened.plaintext, [0x33; 300]);
        assert_eq!(opened.counter, 0);
        assert_eq!(ctx.tx_counter(), 1);
    }

    #[test]
    fn test_seal_outbound_advances_nonce() {
        let mut ctx = DeviceContext::new(0x07);
        ctx.provision(keys());

        let first = ctx.seal_outbound(0x00, b"hold").unwrap().to_vec();
        let second = ctx.seal_outbound(0x00, b"hold").unwrap().to_vec();
        assert_ne!(first[0].payload(), second[0].payload());
        assert_eq!(ctx.tx_counter(), 2);
    }

    #[test]
    fn test_taken_packets_leave_nothing_behind() {
        let mut ctx = DeviceContext::new(0x07);
        ctx.provision(keys());

        ctx.seal_outbound(0x00, &[0x33; 300]).unwrap();
        let packets = ctx.take_tx_packets();
        assert_eq!(packets.len(), 2);
        assert!(ctx.tx_packets().is_empty());
    }

    #[test]
    fn test_replayed_message_refused() {
        let mut ctx = DeviceContext::new(0x05);
        ctx.provision(keys());

        for packet in numbered_packets(3, b"climb 10m") {
            ctx.store_fragment(packet).unwrap();
        }
        assert_eq!(ctx.open_inbound().unwrap(), b"climb 10m");

        // Same capture again, then an older one
        for packet in numbered_packets(3, b"climb 10m") {
            ctx.store_fragment(packet).unwrap();
        }
        assert_eq!(ctx.open_inbound(), Err(InboundError::Replayed { counter: 3 }));

        for packet in numbered_packets(2, b"descend") {
            ctx.store_fragment(packet).unwrap();
        }
        assert_eq!(ctx.open_inbound(), Err(InboundError::Replayed { counter: 2 }));

        // Later counters are still accepted, gaps included
        for packet in numbered_packets(7, b"hover") {
            ctx.store_fragment(packet).unwrap();
        }
        assert_eq!(ctx.open_inbound().unwrap(), b"hover");
    }

    #[test]
    fn test_provision_restarts_counters() {
        let mut ctx = DeviceContext::new(0x05);
        ctx.provision(keys());
        ctx.seal_outbound(0x00, b"ping").unwrap();
        for packet in numbered_packets(5, b"pong") {
            ctx.store_fragment(packet).unwrap();
        }
        ctx.open_inbound().unwrap();

        ctx.provision(keys());
        assert_eq!(ctx.tx_counter(), 0);
        for packet in numbered_packets(0, b"pong") {
            ctx.store_fragment(packet).unwrap();
        }
        assert_eq!(ctx.open_inbound().unwrap(), b"pong");
    }

    #[test]
    fn test_seal_outbound_requires_online() {
        let mut ctx = DeviceContext::new(0x07);
        assert_eq!(
            ctx.seal_outbound(0x00, b"hi").map(|p| p.len()),
            Err(OutboundError::Unauthorized)
        );

        ctx.provision(keys());
        ctx.mark_unauthorized();
        assert_eq!(
            ctx.seal_outbound(0x00, b"hi").map(|p| p.len()),
            Err(OutboundError::Unauthorized)
        );
    }
}
