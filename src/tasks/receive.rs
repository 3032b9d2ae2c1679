//! Radio receive task
//!
//! Woken by the receive interrupt signal, reads the frame under the radio
//! mutex, decodes it and pushes it to the inbound queue. Nothing here blocks
//! on the rest of the pipeline: a full inbound queue drops the packet.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::lora::traits::{LoraRadio, RadioError};
use crate::protocol::packet::{DecodeError, Packet};
use crate::transport::TransportContext;

/// Why a received frame did not reach the inbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    Radio(RadioError),
    Decode(DecodeError),
    /// Inbound queue full, packet dropped
    QueueFull,
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveError::Radio(e) => write!(f, "radio: {}", e),
            ReceiveError::Decode(e) => write!(f, "decode: {}", e),
            ReceiveError::QueueFull => write!(f, "inbound queue full"),
        }
    }
}

/// Wait for one receive interrupt and queue the decoded packet
pub async fn receive_step<M: RawMutex, R: LoraRadio>(
    ctx: &TransportContext<M, R>,
) -> Result<(), ReceiveError> {
    ctx.rx_irq.wait().await;

    let mut link = ctx.radio.lock().await;
    let frame = link.radio_mut().read_payload().await;
    drop(link);
    let frame = frame.map_err(ReceiveError::Radio)?;

    let packet = Packet::decode(&frame.data).map_err(ReceiveError::Decode)?;
    log::debug!(
        "LoRa RX: {} (RSSI: {}, SNR: {})",
        packet.header(),
        frame.rssi,
        frame.snr
    );

    ctx.inbound
        .try_send(packet)
        .map_err(|_| ReceiveError::QueueFull)
}

/// Task that moves received frames into the inbound queue
pub async fn receive_task<M: RawMutex, R: LoraRadio>(ctx: &TransportContext<M, R>) {
    loop {
        if let Err(e) = receive_step(ctx).await {
            log::warn!("LoRa RX: dropped frame ({})", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::queues::INBOUND_QUEUE_SIZE;
    use crate::transport::test_support::station;
    use futures::executor::block_on;

    #[test]
    fn test_irq_queues_decoded_packet() {
        let (ctx, handle) = station(0x00);
        let packet = Packet::new(0x05, 0x00, 1, 0, b"ping").unwrap();
        handle.queue_rx_frame(&packet.encode());

        block_on(async {
            ctx.on_radio_irq();
            receive_step(&ctx).await.unwrap();
        });

        assert_eq!(ctx.inbound.try_receive().unwrap(), packet);
    }

    #[test]
    fn test_short_frame_dropped() {
        let (ctx, handle) = station(0x00);
        handle.queue_rx_frame(&[0x05, 0x00, 0x01]);

        block_on(async {
            ctx.on_radio_irq();
            assert_eq!(
                receive_step(&ctx).await,
                Err(ReceiveError::Decode(DecodeError::TooShort))
            );
        });
        assert!(ctx.inbound.try_receive().is_err());
    }

    #[test]
    fn test_radio_error_reported() {
        let (ctx, _) = station(0x00);

        block_on(async {
            ctx.on_radio_irq();
            assert_eq!(
                receive_step(&ctx).await,
                Err(ReceiveError::Radio(RadioError::ReceiveFailed))
            );
        });
    }

    #[test]
    fn test_full_inbound_queue_drops() {
        let (ctx, handle) = station(0x00);
        let packet = Packet::new(0x05, 0x00, 1, 0, b"ping").unwrap();

        block_on(async {
            for _ in 0..INBOUND_QUEUE_SIZE {
                handle.queue_rx_frame(&packet.encode());
                ctx.on_radio_irq();
                receive_step(&ctx).await.unwrap();
            }

            handle.queue_rx_frame(&packet.encode());
            ctx.on_radio_irq();
            assert_eq!(receive_step(&ctx).await, Err(ReceiveError::QueueFull));
        });
    }
}
