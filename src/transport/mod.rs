//! Transport context shared by the link tasks
//!
//! One `TransportContext` is built at startup and handed by reference to the
//! receive, dispatch, processing and transmit tasks. It owns:
//! - the radio behind a single async mutex (the radio is half-duplex)
//! - the device registry behind its own mutex
//! - the receive-interrupt signal, the only thing an ISR touches
//! - the inbound, ready and outbound queues
//! - the transmit outcome pub/sub channel

pub mod link;

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::pubsub::PubSubChannel;
use embassy_sync::signal::Signal;

use crate::config::network::BASE_STATION_ADDR;
use crate::config::queues::{
    INBOUND_QUEUE_SIZE, OUTBOUND_QUEUE_SIZE, OUTCOME_QUEUE_SIZE, OUTCOME_SUBSCRIBERS,
    READY_QUEUE_SIZE,
};
use crate::config::timing::TX_IDLE_TIMEOUT_MS;
use crate::config::security::SEALED_OVERHEAD;
use crate::config::MAX_MESSAGE_SIZE;
use crate::lora::traits::{LoraRadio, RadioError, RadioMode};
use crate::network::device::OutboundError;
use crate::network::registry::{DeviceRegistry, RegistryError};
use crate::protocol::fragment::fragment_count;
use crate::protocol::packet::Packet;
use crate::security::SessionKeys;

pub use link::RadioLink;

/// Identifies a submitted message in transmit outcomes
pub type MessageId = u16;

/// Pub/sub channel carrying transmit outcomes to submitters
pub type OutcomeChannel<M> =
    PubSubChannel<M, TxOutcome, OUTCOME_QUEUE_SIZE, OUTCOME_SUBSCRIBERS, 1>;

/// Runtime transport parameters
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address of this station
    pub local_address: u8,
    /// Outbound queue idle time before the radio returns to receive mode
    pub tx_idle_timeout_ms: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            local_address: BASE_STATION_ADDR,
            tx_idle_timeout_ms: TX_IDLE_TIMEOUT_MS,
        }
    }
}

/// Errors returned to callers of [`TransportContext::submit_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Not enough room in the outbound queue for every fragment
    QueueFull,
    TooLarge,
    /// No context for the destination address
    UnknownDevice,
    /// Destination is not ONLINE
    Unauthorized,
    OutOfMemory,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::QueueFull => write!(f, "outbound queue full"),
            SubmitError::TooLarge => write!(f, "message exceeds {} bytes", MAX_MESSAGE_SIZE),
            SubmitError::UnknownDevice => write!(f, "unknown device"),
            SubmitError::Unauthorized => write!(f, "device not authorized"),
            SubmitError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl From<OutboundError> for SubmitError {
    fn from(error: OutboundError) -> Self {
        match error {
            // Counter used up, the peer has to be provisioned again
            OutboundError::Unauthorized | OutboundError::NonceExhausted => {
                SubmitError::Unauthorized
            }
            OutboundError::TooLarge => SubmitError::TooLarge,
            OutboundError::OutOfMemory => SubmitError::OutOfMemory,
        }
    }
}

/// One fragment waiting in the outbound queue
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    pub message_id: MessageId,
    pub packet: Packet,
}

/// Result of transmitting a submitted message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Every fragment left the radio
    Sent { message_id: MessageId, dest_addr: u8 },
    /// A fragment failed; reported once per message, no retry is made
    Failed {
        message_id: MessageId,
        dest_addr: u8,
        fragment_index: u8,
        error: RadioError,
    },
}

/// Shared state of the LoRa link
pub struct TransportContext<M: RawMutex, R> {
    pub(crate) config: TransportConfig,
    pub(crate) radio: Mutex<M, RadioLink<R>>,
    pub(crate) registry: Mutex<M, DeviceRegistry>,
    pub(crate) rx_irq: Signal<M, ()>,
    pub(crate) inbound: Channel<M, Packet, INBOUND_QUEUE_SIZE>,
    pub(crate) ready: Channel<M, u8, READY_QUEUE_SIZE>,
    pub(crate) outbound: Channel<M, OutboundPacket, OUTBOUND_QUEUE_SIZE>,
    /// Held while a message's fragments are enqueued; guards the id counter
    pub(crate) submit_lock: Mutex<M, MessageId>,
    pub(crate) outcomes: OutcomeChannel<M>,
}

impl<M: RawMutex, R: LoraRadio> TransportContext<M, R> {
    /// Build the context around an initialised radio
    pub fn new(radio: R, config: TransportConfig) -> Result<Self, RegistryError> {
        let registry = DeviceRegistry::new(config.local_address)?;

        Ok(Self {
            config,
            radio: Mutex::new(RadioLink::new(radio)),
            registry: Mutex::new(registry),
            rx_irq: Signal::new(),
            inbound: Channel::new(),
            ready: Channel::new(),
            outbound: Channel::new(),
            submit_lock: Mutex::new(0),
            outcomes: PubSubChannel::new(),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn local_address(&self) -> u8 {
        self.config.local_address
    }

    /// Receive-done interrupt hook. Safe to call from an ISR.
    pub fn on_radio_irq(&self) {
        self.rx_irq.signal(());
    }

    /// Registry access for provisioning and inspection
    pub fn registry(&self) -> &Mutex<M, DeviceRegistry> {
        &self.registry
    }

    /// Subscribe here to learn what happened to submitted messages
    pub fn tx_outcomes(&self) -> &OutcomeChannel<M> {
        &self.outcomes
    }

    /// Install key material for a peer and bring it ONLINE
    pub async fn provision(&self, address: u8, keys: SessionKeys) -> Result<(), RegistryError> {
        self.registry.lock().await.provision(address, keys)?;
        Ok(())
    }

    /// Put the radio into continuous receive
    pub async fn start_listening(&self) -> Result<(), RadioError> {
        self.radio.lock().await.enter(RadioMode::Receive).await
    }

    /// Encrypt, fragment and enqueue a message for `device_addr`.
    ///
    /// All fragments are enqueued contiguously or none are, and a refused
    /// message leaves the peer's context untouched. The returned id appears in
    /// the [`TxOutcome`] published once the message has been sent.
    pub async fn submit_message(
        &self,
        device_addr: u8,
        message: &[u8],
    ) -> Result<MessageId, SubmitError> {
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(SubmitError::TooLarge);
        }

        let mut next_id = self.submit_lock.lock().await;

        let packets = {
            let mut registry = self.registry.lock().await;
            let device = registry
                .lookup(device_addr)
                .ok_or(SubmitError::UnknownDevice)?;
            if device.address() == self.config.local_address {
                return Err(SubmitError::UnknownDevice);
            }
            if !device.is_online() {
                return Err(SubmitError::Unauthorized);
            }

            // Only the transmit task takes from the queue, so this room stays free
            if self.outbound.free_capacity() < fragment_count(message.len() + SEALED_OVERHEAD) {
                return Err(SubmitError::QueueFull);
            }

            device.seal_outbound(self.config.local_address, message)?;
            device.take_tx_packets()
        };

        let message_id = *next_id;
        *next_id = next_id.wrapping_add(1);

        for packet in packets {
            self.outbound
                .try_send(OutboundPacket { message_id, packet })
                .map_err(|_| SubmitError::QueueFull)?;
        }

        log::debug!(
            "Transport: message {} queued for 0x{:02X} ({} bytes)",
            message_id,
            device_addr,
            message.len()
        );
        Ok(message_id)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::protocol::MAX_PAYLOAD;
    use crate::network::device::ConnectionStatus;
    use futures::executor::block_on;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.local_address, BASE_STATION_ADDR);
        assert_eq!(config.tx_idle_timeout_ms, TX_IDLE_TIMEOUT_MS);
    }

    #[test]
    fn test_new_context_registers_local_station() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            let registry = ctx.registry().lock().await;
            assert_eq!(registry.len(), 1);
            assert!(registry.get(BASE_STATION_ADDR).unwrap().is_online());
        });
    }

    #[test]
    fn test_submit_enqueues_fragments_in_order() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            ctx.provision(0x05, keys()).await.unwrap();

            let id = ctx.submit_message(0x05, &[0x77; 300]).await.unwrap();
            assert_eq!(id, 0);

            let first = ctx.outbound.try_receive().unwrap();
            let second = ctx.outbound.try_receive().unwrap();
            assert!(ctx.outbound.try_receive().is_err());

            assert_eq!(first.message_id, id);
            assert_eq!(first.packet.header().fragment_index, 0);
            assert_eq!(second.packet.header().fragment_index, 1);
            assert_eq!(second.packet.header().total_fragments, 2);
            assert_eq!(first.packet.header().dest_addr, 0x05);
            assert_eq!(first.packet.header().src_addr, BASE_STATION_ADDR);
        });
    }

    #[test]
    fn test_submit_ids_increment() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            ctx.provision(0x05, keys()).await.unwrap();
            assert_eq!(ctx.submit_message(0x05, b"a").await, Ok(0));
            assert_eq!(ctx.submit_message(0x05, b"b").await, Ok(1));
        });
    }

    #[test]
    fn test_submit_unknown_device() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            assert_eq!(
                ctx.submit_message(0x05, b"hello").await,
                Err(SubmitError::UnknownDevice)
            );
            assert_eq!(
                ctx.submit_message(BASE_STATION_ADDR, b"hello").await,
                Err(SubmitError::UnknownDevice)
            );
        });
    }

    #[test]
    fn test_submit_unauthorized_device() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            ctx.registry().lock().await.add_device(0x05).unwrap();
            assert_eq!(
                ctx.submit_message(0x05, b"hello").await,
                Err(SubmitError::Unauthorized)
            );
        });
    }

    #[test]
    fn test_submit_too_large() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            ctx.provision(0x05, keys()).await.unwrap();
            let message = [0u8; MAX_MESSAGE_SIZE + 1];
            assert_eq!(
                ctx.submit_message(0x05, &message).await,
                Err(SubmitError::TooLarge)
            );
        });
    }

    #[test]
    fn test_submit_queue_full_enqueues_nothing() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            ctx.provision(0x05, keys()).await.unwrap();

            // 40 fragments, leaving 10 free slots
            let big = [0u8; 40 * MAX_PAYLOAD - SEALED_OVERHEAD];
            ctx.submit_message(0x05, &big).await.unwrap();
            assert_eq!(ctx.outbound.len(), 40);

            let too_many = [0u8; 11 * MAX_PAYLOAD - SEALED_OVERHEAD];
            assert_eq!(
                ctx.submit_message(0x05, &too_many).await,
                Err(SubmitError::QueueFull)
            );
            assert_eq!(ctx.outbound.len(), 40);

            let fits = [0u8; 10 * MAX_PAYLOAD - SEALED_OVERHEAD];
            ctx.submit_message(0x05, &fits).await.unwrap();
            assert_eq!(ctx.outbound.len(), 50);
        });
    }

    #[test]
    fn test_queue_full_leaves_device_untouched() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            ctx.provision(0x05, keys()).await.unwrap();
            ctx.provision(0x06, keys()).await.unwrap();

            let big = [0u8; 45 * MAX_PAYLOAD - SEALED_OVERHEAD];
            ctx.submit_message(0x05, &big).await.unwrap();

            let too_many = [0u8; 6 * MAX_PAYLOAD - SEALED_OVERHEAD];
            assert_eq!(
                ctx.submit_message(0x06, &too_many).await,
                Err(SubmitError::QueueFull)
            );

            let registry = ctx.registry().lock().await;
            let device = registry.get(0x06).unwrap();
            assert_eq!(device.connection(), ConnectionStatus::ConnectionEstablished);
            assert_eq!(device.tx_counter(), 0);
            assert_eq!(device.tag(), &[0u8; 16]);
            assert!(device.tx_packets().is_empty());
        });
    }

    #[test]
    fn test_submit_keeps_no_copy_of_packets() {
        let (ctx, _) = station(BASE_STATION_ADDR);
        block_on(async {
            ctx.provision(0x05, keys()).await.unwrap();
            ctx.submit_message(0x05, &[0x77; 300]).await.unwrap();
            assert_eq!(ctx.outbound.len(), 2);

            let registry = ctx.registry().lock().await;
            let device = registry.get(0x05).unwrap();
            assert!(device.tx_packets().is_empty());
            assert_eq!(device.connection(), ConnectionStatus::MessageSent);
        });
    }

    #[test]
    fn test_start_listening() {
        let (ctx, handle) = station(BASE_STATION_ADDR);
        block_on(async {
            ctx.start_listening().await.unwrap();
            ctx.start_listening().await.unwrap();
        });
        assert_eq!(handle.mode_history(), [RadioMode::Receive]);
    }
}
