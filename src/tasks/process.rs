//! Device processing task
//!
//! For every address on the ready queue: reassemble the device's message,
//! authenticate and decrypt it, then hand the plaintext to the application.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::network::device::InboundError;
use crate::security::SecurityError;
use crate::transport::TransportContext;

/// Why a complete message was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// AEAD tag did not verify
    AuthenticationFailed,
    /// Sender is not ONLINE
    Unauthorized,
    /// Message counter already seen from this sender
    Replayed,
}

/// Consumer of decrypted messages (flight control, ground station UI)
pub trait MessageSink {
    /// A message from `device_addr` was authenticated and decrypted
    fn deliver_plaintext(&mut self, device_addr: u8, plaintext: &[u8]);

    /// A message from `device_addr` was received but refused
    fn reject_message(&mut self, device_addr: u8, reason: RejectReason);
}

/// Errors from processing one ready device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Address was removed from the registry after being queued
    UnknownDevice,
    Inbound(InboundError),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::UnknownDevice => write!(f, "unknown device"),
            ProcessError::Inbound(e) => write!(f, "{}", e),
        }
    }
}

/// Open the complete message buffered for `address` and pass it to `sink`
pub async fn process_device<M: RawMutex, R, S: MessageSink>(
    ctx: &TransportContext<M, R>,
    address: u8,
    sink: &mut S,
) -> Result<(), ProcessError> {
    let opened = {
        let mut registry = ctx.registry.lock().await;
        let device = registry
            .lookup(address)
            .ok_or(ProcessError::UnknownDevice)?;
        device.open_inbound()
    };

    match opened {
        Ok(plaintext) => {
            log::debug!("Process: {} bytes from 0x{:02X}", plaintext.len(), address);
            sink.deliver_plaintext(address, &plaintext);
            Ok(())
        }
        Err(error) => {
            let reason = match error {
                InboundError::Security(
                    SecurityError::AuthFailure
                    | SecurityError::Truncated
                    | SecurityError::ForeignNonce,
                ) => Some(RejectReason::AuthenticationFailed),
                InboundError::Unauthorized => Some(RejectReason::Unauthorized),
                InboundError::Replayed { .. } => Some(RejectReason::Replayed),
                _ => None,
            };
            if let Some(reason) = reason {
                log::warn!("Process: rejected message from 0x{:02X} ({:?})", address, reason);
                sink.reject_message(address, reason);
            }
            Err(ProcessError::Inbound(error))
        }
    }
}

/// Take one address off the ready queue and process it
pub async fn process_step<M: RawMutex, R, S: MessageSink>(
    ctx: &TransportContext<M, R>,
    sink: &mut S,
) -> Result<(), ProcessError> {
    let address = ctx.ready.receive().await;
    process_device(ctx, address, sink).await
}

/// Task that delivers complete messages to the application
pub async fn process_task<M: RawMutex, R, S: MessageSink>(ctx: &TransportContext<M, R>, mut sink: S) {
    loop {
        if let Err(e) = process_step(ctx, &mut sink).await {
            log::warn!("Process: {}", e);
        }
    }
}
