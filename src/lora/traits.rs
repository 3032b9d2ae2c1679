//! LoRa radio trait for abstraction and testability
//!
//! The transport only needs three things from the chip driver: switch mode,
//! send a frame, and read the frame that raised the receive interrupt. The
//! SX126x/SX127x driver implements this trait; tests use the mock below.

use core::fmt;
use core::future::Future;

use crate::config::protocol::MAX_PACKET_SIZE;
use heapless::Vec;

/// Errors that can occur during radio operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Operation timed out
    Timeout,
    /// Hardware CRC error on the received frame
    CrcError,
    /// Transmission failed
    TransmitFailed,
    /// Reception failed or no frame available
    ReceiveFailed,
    /// Radio refused the requested mode
    ModeChangeFailed,
    /// Radio busy timeout
    BusyTimeout,
    /// SPI communication error
    SpiError,
    /// Radio not initialised
    NotInitialised,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RadioError::Timeout => "timeout",
            RadioError::CrcError => "hardware CRC error",
            RadioError::TransmitFailed => "transmit failed",
            RadioError::ReceiveFailed => "receive failed",
            RadioError::ModeChangeFailed => "mode change failed",
            RadioError::BusyTimeout => "busy timeout",
            RadioError::SpiError => "SPI error",
            RadioError::NotInitialised => "not initialised",
        };
        f.write_str(text)
    }
}

/// Operating mode of the half-duplex radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Continuous receive
    Receive,
    Transmit,
    Standby,
}

/// Received frame with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    /// Raw frame as read from the radio FIFO
    pub data: Vec<u8, MAX_PACKET_SIZE>,
    /// Received Signal Strength Indicator in dBm
    pub rssi: i16,
    /// Signal-to-Noise Ratio in dB
    pub snr: i8,
}

/// Abstract LoRa radio interface
pub trait LoraRadio {
    /// Put the radio into `mode`
    fn set_mode(&mut self, mode: RadioMode) -> impl Future<Output = Result<(), RadioError>>;

    /// Transmit one frame
    ///
    /// Resolves once the frame has left the radio or an error occurs.
    fn transmit(&mut self, data: &[u8]) -> impl Future<Output = Result<(), RadioError>>;

    /// Read the frame that raised the last receive interrupt
    fn read_payload(&mut self) -> impl Future<Output = Result<RxPacket, RadioError>>;
}
