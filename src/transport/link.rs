//! Radio handle guarded by the transport's radio mutex
//!
//! Tracks the mode the radio was last put in so mode switches are only issued
//! when the mode actually changes.

use crate::lora::traits::{LoraRadio, RadioError, RadioMode};

/// The shared half-duplex radio plus its current mode
pub struct RadioLink<R> {
    radio: R,
    mode: RadioMode,
}

impl<R: LoraRadio> RadioLink<R> {
    /// Wrap a radio that has just been brought up in standby
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            mode: RadioMode::Standby,
        }
    }

    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    /// Switch to `mode` unless the radio is already there
    pub async fn enter(&mut self, mode: RadioMode) -> Result<(), RadioError> {
        if self.mode == mode {
            return Ok(());
        }
        self.radio.set_mode(mode).await?;
        log::debug!("LoRa: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        Ok(())
    }

    /// Send one frame, entering transmit mode first if needed
    pub async fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        self.enter(RadioMode::Transmit).await?;
        self.radio.transmit(frame).await
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}
