pub mod traits;

pub use traits::{LoraRadio, RadioError, RadioMode, RxPacket};
