//! Protocol implementations for the supported DAC families.
//!
//! Transports are gated behind the `usb` and `network` features; the byte
//! encoding is always available.

pub mod helios;
