//! Network configuration constants for the LoRa flight link

/// On-air packet layout
pub mod protocol {
    /// Largest frame the radio will send in one transmission
    pub const MAX_PACKET_SIZE: usize = 255;

    /// src, dest, total fragments, fragment index, payload length
    pub const HEADER_FIELDS_SIZE: usize = 5;

    /// Header fields plus the header and payload CRCs
    pub const PACKET_OVERHEAD: usize = HEADER_FIELDS_SIZE + 2 + 2;

    /// Maximum payload carried by a single packet (246 bytes)
    pub const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - PACKET_OVERHEAD;

    /// `total_fragments` is a single byte on the wire
    pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

    /// Seed used for both the header and payload CRC
    pub const CRC_SEED: u16 = 0x0000;
}

/// Addressing
pub mod network {
    /// Address of the ground station
    pub const BASE_STATION_ADDR: u8 = 0x00;

    /// Broadcast address, never owns a device context
    pub const BROADCAST_ADDR: u8 = 0xFF;

    /// Maximum number of blocked source addresses
    pub const MAX_BLACKLIST: usize = 16;
}

/// AES-128-GCM parameters
pub mod security {
    pub const KEY_SIZE: usize = 16;
    pub const NONCE_SIZE: usize = 12;
    pub const AAD_SIZE: usize = 16;
    pub const TAG_SIZE: usize = 16;

    /// A sealed message is `nonce || ciphertext || tag`
    pub const SEALED_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
}

/// Queue capacities for the transport tasks
pub mod queues {
    /// Decoded packets waiting for dispatch
    pub const INBOUND_QUEUE_SIZE: usize = 50;

    /// Serialized fragments waiting for the transmit task
    pub const OUTBOUND_QUEUE_SIZE: usize = 50;

    /// Device addresses with a complete message waiting for processing
    pub const READY_QUEUE_SIZE: usize = 20;

    /// Transmit outcome pub/sub: CAP messages, SUBS subscribers
    pub const OUTCOME_QUEUE_SIZE: usize = 8;
    pub const OUTCOME_SUBSCRIBERS: usize = 2;
}

/// Transport timing
pub mod timing {
    /// Idle time on the outbound queue before the radio returns to receive mode
    pub const TX_IDLE_TIMEOUT_MS: u32 = 1000;
}

/// Largest plaintext accepted by `submit_message`.
///
/// Every fragment of a message must fit in the outbound queue at once, and the
/// ciphertext travels between its nonce and tag.
pub const MAX_MESSAGE_SIZE: usize =
    queues::OUTBOUND_QUEUE_SIZE * protocol::MAX_PAYLOAD - security::SEALED_OVERHEAD;
