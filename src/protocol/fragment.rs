//! Message fragmentation and reassembly
//!
//! A message is split into `max(1, ceil(len / MAX_PAYLOAD))` packets. Every
//! fragment but the last carries exactly `MAX_PAYLOAD` bytes.

use alloc::vec::Vec;
use core::fmt;

use crate::config::protocol::{MAX_FRAGMENTS, MAX_PAYLOAD};
use crate::protocol::packet::Packet;

/// Errors when splitting a message into packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentError {
    /// Message needs more fragments than the header can count
    TooLarge,
    OutOfMemory,
}

impl fmt::Display for FragmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentError::TooLarge => write!(f, "message exceeds {} fragments", MAX_FRAGMENTS),
            FragmentError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

/// Errors when rebuilding a message from buffered fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyError {
    /// No fragment 0 has been received
    BufferEmpty,
    /// At least one fragment has not arrived
    Incomplete { first_missing: u8 },
    /// Fragment does not belong to the open message
    Inconsistent,
    OutOfMemory,
}

impl fmt::Display for ReassemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReassemblyError::BufferEmpty => write!(f, "no message buffered"),
            ReassemblyError::Incomplete { first_missing } => {
                write!(f, "fragment {} missing", first_missing)
            }
            ReassemblyError::Inconsistent => write!(f, "fragment does not match open message"),
            ReassemblyError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

/// Number of fragments needed for a message of `len` bytes
pub fn fragment_count(len: usize) -> usize {
    len.div_ceil(MAX_PAYLOAD).max(1)
}

/// Split `message` into an ordered packet sequence from `src` to `dest`.
pub fn fragment(message: &[u8], src: u8, dest: u8) -> Result<Vec<Packet>, FragmentError> {
    let total = fragment_count(message.len());
    if total > MAX_FRAGMENTS {
        return Err(FragmentError::TooLarge);
    }

    let mut packets = Vec::new();
    packets
        .try_reserve_exact(total)
        .map_err(|_| FragmentError::OutOfMemory)?;

    if message.is_empty() {
        // Zero-length messages still produce one fragment
        packets.extend(Packet::new(src, dest, 1, 0, &[]));
        return Ok(packets);
    }

    for (index, chunk) in message.chunks(MAX_PAYLOAD).enumerate() {
        // chunks() never yields more than MAX_PAYLOAD bytes
        if let Some(packet) = Packet::new(src, dest, total as u8, index as u8, chunk) {
            packets.push(packet);
        }
    }

    Ok(packets)
}

/// Inbound fragments of one message, kept in `fragment_index` order.
///
/// The fragment count comes from the fragment that opened the buffer. Storage
/// only grows as fragments arrive.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    src_addr: u8,
    total: u8,
    /// Sorted by index, at most one packet per index
    fragments: Vec<Packet>,
}

impl ReassemblyBuffer {
    /// Open a buffer for a message from `src_addr` of `total` fragments
    pub fn new(src_addr: u8, total: u8) -> Self {
        Self {
            src_addr,
            total,
            fragments: Vec::new(),
        }
    }

    pub fn total_fragments(&self) -> u8 {
        self.total
    }

    /// Fragments stored so far
    pub fn received(&self) -> usize {
        self.fragments.len()
    }

    /// Heap held for fragment storage
    pub fn heap_bytes(&self) -> usize {
        self.fragments.capacity() * core::mem::size_of::<Packet>()
    }

    /// Store a fragment by index, replacing any earlier copy
    pub fn insert(&mut self, packet: Packet) -> Result<(), ReassemblyError> {
        let header = *packet.header();
        if header.src_addr != self.src_addr
            || header.total_fragments != self.total
            || header.fragment_index >= self.total
        {
            return Err(ReassemblyError::Inconsistent);
        }

        match self
            .fragments
            .binary_search_by_key(&header.fragment_index, |p| p.header().fragment_index)
        {
            Ok(pos) => self.fragments[pos] = packet,
            Err(pos) => {
                self.fragments
                    .try_reserve(1)
                    .map_err(|_| ReassemblyError::OutOfMemory)?;
                self.fragments.insert(pos, packet);
            }
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.fragments.len() == self.total as usize
    }

    /// Indices still waiting for a fragment
    pub fn missing(&self) -> impl Iterator<Item = u8> + '_ {
        let mut stored = self.fragments.iter().map(|p| p.header().fragment_index).peekable();
        (0..self.total).filter(move |&index| {
            if stored.peek() == Some(&index) {
                stored.next();
                false
            } else {
                true
            }
        })
    }

    /// Concatenate the buffered payloads in index order
    pub fn assemble(&self) -> Result<Vec<u8>, ReassemblyError> {
        if let Some(first_missing) = self.missing().next() {
            return Err(ReassemblyError::Incomplete { first_missing });
        }

        let len = self.fragments.iter().map(|packet| packet.payload().len()).sum();

        let mut message = Vec::new();
        message
            .try_reserve_exact(len)
            .map_err(|_| ReassemblyError::OutOfMemory)?;
        for packet in &self.fragments {
            message.extend_from_slice(packet.payload());
        }

        Ok(message)
    }
}
