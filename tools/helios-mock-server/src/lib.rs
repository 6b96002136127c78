//! Mock network Helios DAC for testing.
//!
//! This crate provides a UDP device that speaks the Helios network protocol
//! and can be customized via the [`DeviceBehavior`] trait. The end-to-end
//! tests of `helios-dac` run discovery, claiming, control exchanges and
//! frame streaming against it.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//! - **Protocol layer**: Constants and datagram builders (stateless)
//! - **Configuration layer**: Device identity and socket settings
//! - **Server layer**: Core UDP loop with trait-based behavior hooks
//!
//! # Example
//!
//! ```ignore
//! use helios_mock_server::{DeviceBehavior, MockHeliosServer, ServerConfig, STATUS_READY};
//!
//! struct MyBehavior;
//!
//! impl DeviceBehavior for MyBehavior {
//!     fn on_frame_received(&mut self, _payload: &[u8]) {}
//!     fn should_respond(&self, _kind: u8) -> bool { true }
//!     fn get_status_byte(&self) -> u8 { STATUS_READY }
//! }
//!
//! let config = ServerConfig::new("Bench");
//! let server = MockHeliosServer::new(config, MyBehavior)?;
//! let handle = server.spawn();
//! ```

mod behavior;
mod config;
mod constants;
mod packet_builder;
mod server;

pub use behavior::{DeviceBehavior, SimpleBehavior};
pub use config::ServerConfig;
pub use constants::*;
pub use packet_builder::*;
pub use server::{MockHeliosServer, ServerHandle};
