//! Hardware transport: DDP over UDP for pixels, WLED HTTP for control.

pub mod backoff;
pub mod client;
pub mod control;
pub mod ddp;

#[cfg(test)]
pub(crate) mod mock;

pub use backoff::Backoff;
pub use client::{ClientState, Delivery, ProtocolClient};
pub use control::{DeviceControl, DeviceInfo, WledControl};
