//! Transmit task
//!
//! Single consumer of the outbound queue and the only writer to the radio.
//! The radio mutex is taken on the first outbound packet and held across
//! packets so a multi-fragment message goes out without the receive path
//! interleaving. Once the queue has been idle for the configured timeout and
//! no message is half sent, the radio goes back to receive and the mutex is
//! released.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::MutexGuard;

use crate::lora::traits::{LoraRadio, RadioError, RadioMode};
use crate::transport::{MessageId, OutboundPacket, RadioLink, TransportContext, TxOutcome};

/// Transmit-side state carried between outbound packets
pub struct TransmitScheduler<'a, M: RawMutex, R> {
    ctx: &'a TransportContext<M, R>,
    /// Held radio mutex, `Some` while in transmit mode
    link: Option<MutexGuard<'a, M, RadioLink<R>>>,
    /// Multi-fragment messages whose first fragment went out but not their last
    unfinished_messages: u8,
    /// Message with a failed fragment, until its last fragment has gone by
    failed_message: Option<MessageId>,
}

impl<'a, M: RawMutex, R: LoraRadio> TransmitScheduler<'a, M, R> {
    pub fn new(ctx: &'a TransportContext<M, R>) -> Self {
        Self {
            ctx,
            link: None,
            unfinished_messages: 0,
            failed_message: None,
        }
    }

    /// True while the scheduler owns the radio
    pub fn holds_radio(&self) -> bool {
        self.link.is_some()
    }

    pub fn unfinished_messages(&self) -> u8 {
        self.unfinished_messages
    }

    /// Transmit one queued fragment.
    ///
    /// Failures are published to the outcome channel for the submitter. The
    /// fragment is not retried.
    pub async fn send(&mut self, item: OutboundPacket) -> Result<(), RadioError> {
        if self.link.is_none() {
            let ctx = self.ctx;
            self.link = Some(ctx.radio.lock().await);
        }

        let header = *item.packet.header();
        let result = match self.link.as_mut() {
            Some(link) => link.transmit(&item.packet.encode()).await,
            None => Err(RadioError::NotInitialised),
        };

        if header.total_fragments > 1 {
            if header.fragment_index == 0 {
                self.unfinished_messages = self.unfinished_messages.saturating_add(1);
            }
            if header.is_last_fragment() {
                self.unfinished_messages = self.unfinished_messages.saturating_sub(1);
            }
        }

        match result {
            Ok(()) => {
                log::debug!("LoRa TX: {}", header);
                if header.is_last_fragment() && self.failed_message != Some(item.message_id) {
                    self.publish(TxOutcome::Sent {
                        message_id: item.message_id,
                        dest_addr: header.dest_addr,
                    });
                }
            }
            Err(error) => {
                log::warn!("LoRa TX: {} failed ({})", header, error);
                if self.failed_message != Some(item.message_id) {
                    self.failed_message = Some(item.message_id);
                    self.publish(TxOutcome::Failed {
                        message_id: item.message_id,
                        dest_addr: header.dest_addr,
                        fragment_index: header.fragment_index,
                        error,
                    });
                }
            }
        }

        // Ids wrap, a later message may reuse this one
        if header.is_last_fragment() && self.failed_message == Some(item.message_id) {
            self.failed_message = None;
        }

        result
    }

    /// Outbound queue went idle.
    ///
    /// With no half-sent message, return the radio to receive mode and release
    /// it. The mutex is released even if the mode switch fails.
    pub async fn on_idle(&mut self) -> Result<(), RadioError> {
        if self.unfinished_messages != 0 {
            return Ok(());
        }

        match self.link.take() {
            Some(mut link) => link.enter(RadioMode::Receive).await,
            None => Ok(()),
        }
    }

    fn publish(&self, outcome: TxOutcome) {
        self.ctx.outcomes.immediate_publisher().publish_immediate(outcome);
    }
}

/// Task that drains the outbound queue onto the radio
#[cfg(feature = "embedded")]
pub async fn transmit_task<M: RawMutex, R: LoraRadio>(ctx: &TransportContext<M, R>) {
    use embassy_futures::select::{select, Either};
    use embassy_time::{Duration, Timer};

    let idle = Duration::from_millis(ctx.config.tx_idle_timeout_ms as u64);
    let mut scheduler = TransmitScheduler::new(ctx);

    loop {
        match select(ctx.outbound.receive(), Timer::after(idle)).await {
            Either::First(item) => {
                // Failure already published and logged
                let _ = scheduler.send(item).await;
            }
            Either::Second(()) => {
                if let Err(e) = scheduler.on_idle().await {
                    log::warn!("LoRa TX: could not return to receive ({})", e);
                }
            }
        }
    }
}

/// Transmit task for non-embedded builds (tests)
///
/// Without a timer the queue running empty counts as the idle timeout.
#[cfg(not(feature = "embedded"))]
pub async fn transmit_task<M: RawMutex, R: LoraRadio>(ctx: &TransportContext<M, R>) {
    let mut scheduler = TransmitScheduler::new(ctx);

    loop {
        let item = ctx.outbound.receive().await;
        let _ = scheduler.send(item).await;

        if ctx.outbound.is_empty() {
            if let Err(e) = scheduler.on_idle().await {
                log::warn!("LoRa TX: could not return to receive ({})", e);
            }
        }
    }
}
