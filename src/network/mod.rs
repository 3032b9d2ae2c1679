//! Device registry and per-peer session state

pub mod device;
pub mod registry;

pub use device::{
    ConnectionStatus, DeviceContext, DeviceStatus, FragmentProgress, InboundError, OutboundError,
};
pub use registry::{DeviceRegistry, RegistryError};
