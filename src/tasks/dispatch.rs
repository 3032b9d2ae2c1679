//! Packet dispatch task
//!
//! Takes decoded packets off the inbound queue, validates them, and files each
//! fragment into its device context. When a device's last fragment arrives its
//! address goes onto the ready queue for the processing task.
//!
//! Invalid packets are logged and dropped. Nothing is ever NACKed.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::network::BROADCAST_ADDR;
use crate::network::device::FragmentProgress;
use crate::network::registry::RegistryError;
use crate::protocol::fragment::ReassemblyError;
use crate::protocol::packet::{CrcMismatch, Packet};
use crate::transport::TransportContext;

/// Why a packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Crc(CrcMismatch),
    /// `total_fragments == 0` or `fragment_index >= total_fragments`
    BadHeader,
    /// Addressed to another station
    NotForUs,
    /// Source is this station or broadcast
    InvalidSource,
    Blacklisted,
    /// Unknown source sent something other than fragment 0
    UnknownDevice,
    Registry(RegistryError),
    Reassembly(ReassemblyError),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Crc(e) => write!(f, "{}", e),
            DropReason::BadHeader => write!(f, "bad fragment numbering"),
            DropReason::NotForUs => write!(f, "not addressed to us"),
            DropReason::InvalidSource => write!(f, "invalid source"),
            DropReason::Blacklisted => write!(f, "blacklisted source"),
            DropReason::UnknownDevice => write!(f, "unknown device mid-message"),
            DropReason::Registry(e) => write!(f, "registry: {}", e),
            DropReason::Reassembly(e) => write!(f, "{}", e),
        }
    }
}

/// What happened to an accepted packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Fragment stored, more expected
    Stored,
    /// Message complete; address queued for processing
    MessageReady(u8),
}

/// Validate `packet` and file it under its source device
pub async fn handle_packet<M: RawMutex, R>(
    ctx: &TransportContext<M, R>,
    packet: Packet,
) -> Result<Dispatched, DropReason> {
    let header = *packet.header();

    let result = file_packet(ctx, packet).await;
    match &result {
        Ok(Dispatched::MessageReady(address)) => {
            log::debug!("Dispatch: message from 0x{:02X} ready", address);
        }
        Ok(Dispatched::Stored) => {}
        Err(reason) => log::warn!("Dispatch: dropped {} ({})", header, reason),
    }
    result
}

async fn file_packet<M: RawMutex, R>(
    ctx: &TransportContext<M, R>,
    packet: Packet,
) -> Result<Dispatched, DropReason> {
    packet.check_crc().map_err(DropReason::Crc)?;

    let header = *packet.header();
    if header.total_fragments == 0 || header.fragment_index >= header.total_fragments {
        return Err(DropReason::BadHeader);
    }

    let local = ctx.config.local_address;
    if header.dest_addr != local && header.dest_addr != BROADCAST_ADDR {
        return Err(DropReason::NotForUs);
    }
    if header.src_addr == local || header.src_addr == BROADCAST_ADDR {
        return Err(DropReason::InvalidSource);
    }

    let progress = {
        let mut registry = ctx.registry.lock().await;
        if registry.is_blocked(header.src_addr) {
            return Err(DropReason::Blacklisted);
        }

        // Only the first fragment of a message may introduce a new device
        if !registry.is_known(header.src_addr) {
            if header.fragment_index != 0 {
                return Err(DropReason::UnknownDevice);
            }
            registry
                .add_device(header.src_addr)
                .map_err(DropReason::Registry)?;
        }

        registry
            .lookup(header.src_addr)
            .ok_or(DropReason::UnknownDevice)?
            .store_fragment(packet)
            .map_err(DropReason::Reassembly)?
    };

    match progress {
        FragmentProgress::Stored => Ok(Dispatched::Stored),
        FragmentProgress::MessageReady => {
            ctx.ready.send(header.src_addr).await;
            Ok(Dispatched::MessageReady(header.src_addr))
        }
    }
}

/// Take one packet off the inbound queue and dispatch it
pub async fn dispatch_step<M: RawMutex, R>(
    ctx: &TransportContext<M, R>,
) -> Result<Dispatched, DropReason> {
    let packet = ctx.inbound.receive().await;
    handle_packet(ctx, packet).await
}

/// Task that files inbound packets into device contexts
pub async fn dispatch_task<M: RawMutex, R>(ctx: &TransportContext<M, R>) {
    loop {
        // Outcome already logged by handle_packet
        let _ = dispatch_step(ctx).await;
    }
}
