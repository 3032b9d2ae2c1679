//! Link tasks
//!
//! Each task takes the shared [`TransportContext`](crate::transport::TransportContext)
//! by reference. The firmware spawns one of each; every task exposes a `*_step`
//! function that runs a single iteration.

pub mod dispatch;
pub mod process;
pub mod receive;
pub mod transmit;

pub use dispatch::{dispatch_step, dispatch_task, handle_packet, Dispatched, DropReason};
pub use process::{process_device, process_step, process_task, MessageSink, ProcessError, RejectReason};
pub use receive::{receive_step, receive_task, ReceiveError};
pub use transmit::{transmit_task, TransmitScheduler};
