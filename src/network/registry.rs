//! Device registry
//!
//! Growable table of peer contexts keyed by network address, plus the
//! blacklist of sources whose packets are dropped at dispatch.

use alloc::vec::Vec;
use core::fmt;

use crate::config::network::{BROADCAST_ADDR, MAX_BLACKLIST};
use crate::network::device::DeviceContext;
use crate::security::SessionKeys;

/// Errors from registry updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Address already owns a context
    AlreadyRegistered,
    /// Broadcast or the local station address
    ReservedAddress,
    /// Blacklist has no free entries
    BlacklistFull,
    OutOfMemory,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyRegistered => write!(f, "address already registered"),
            RegistryError::ReservedAddress => write!(f, "reserved address"),
            RegistryError::BlacklistFull => write!(f, "blacklist full"),
            RegistryError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

/// All known peers plus this station
pub struct DeviceRegistry {
    local_address: u8,
    devices: Vec<DeviceContext>,
    blacklist: heapless::Vec<u8, MAX_BLACKLIST>,
}

impl DeviceRegistry {
    /// Create a registry holding only the local station, ONLINE
    pub fn new(local_address: u8) -> Result<Self, RegistryError> {
        if local_address == BROADCAST_ADDR {
            return Err(RegistryError::ReservedAddress);
        }

        let mut devices = Vec::new();
        devices
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfMemory)?;
        devices.push(DeviceContext::local(local_address));

        Ok(Self {
            local_address,
            devices,
            blacklist: heapless::Vec::new(),
        })
    }

    pub fn local_address(&self) -> u8 {
        self.local_address
    }

    /// Number of registered contexts, including the local station
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Register a newly seen peer with status ADDING_DEVICE_TO_NETWORK
    pub fn add_device(&mut self, address: u8) -> Result<&mut DeviceContext, RegistryError> {
        if address == BROADCAST_ADDR {
            return Err(RegistryError::ReservedAddress);
        }
        if self.is_known(address) {
            return Err(RegistryError::AlreadyRegistered);
        }

        self.devices
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfMemory)?;
        self.devices.push(DeviceContext::new(address));
        log::info!("Registry: added device 0x{:02X}", address);

        let index = self.devices.len() - 1;
        Ok(&mut self.devices[index])
    }

    /// Install key material for a peer, registering it first if needed
    pub fn provision(
        &mut self,
        address: u8,
        keys: SessionKeys,
    ) -> Result<&mut DeviceContext, RegistryError> {
        if address == self.local_address {
            return Err(RegistryError::ReservedAddress);
        }
        let ctx = match self.devices.iter().position(|d| d.address() == address) {
            Some(index) => &mut self.devices[index],
            None => self.add_device(address)?,
        };
        ctx.provision(keys);
        log::info!("Registry: device 0x{:02X} provisioned", address);
        Ok(ctx)
    }

    /// Remove a peer and return its context. The local station stays.
    pub fn remove_device(&mut self, address: u8) -> Option<DeviceContext> {
        if address == self.local_address {
            return None;
        }
        let index = self.devices.iter().position(|d| d.address() == address)?;
        log::info!("Registry: removed device 0x{:02X}", address);
        Some(self.devices.swap_remove(index))
    }

    pub fn lookup(&mut self, address: u8) -> Option<&mut DeviceContext> {
        self.devices.iter_mut().find(|d| d.address() == address)
    }

    pub fn get(&self, address: u8) -> Option<&DeviceContext> {
        self.devices.iter().find(|d| d.address() == address)
    }

    pub fn is_known(&self, address: u8) -> bool {
        self.get(address).is_some()
    }

    /// Addresses of all registered contexts
    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.devices.iter().map(DeviceContext::address)
    }

    /// Drop all future packets from `address`
    pub fn block(&mut self, address: u8) -> Result<(), RegistryError> {
        if address == self.local_address {
            return Err(RegistryError::ReservedAddress);
        }
        if self.is_blocked(address) {
            return Ok(());
        }
        self.blacklist
            .push(address)
            .map_err(|_| RegistryError::BlacklistFull)?;
        log::warn!("Registry: blocked 0x{:02X}", address);
        Ok(())
    }

    pub fn unblock(&mut self, address: u8) {
        self.blacklist.retain(|&a| a != address);
    }

    pub fn is_blocked(&self, address: u8) -> bool {
        self.blacklist.contains(&address)
    }
}
