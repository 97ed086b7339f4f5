//! # RFM69 Radio Driver
//!
//! A blocking, `no_std` compatible driver for the RFM69 series of FSK packet
//! radio modules.
//!
//! This crate provides a high-level interface for the RFM69 radio transceiver
//! using the `embedded-hal` traits for hardware abstraction.
//!
//! ## Features
//!
//! - Register access over any `SpiDevice`, one chip-select window per burst
//! - Declarative base configuration with read-back verification
//! - Frequency, transmit power, sync word, preamble and AES key control
//! - Polling packet engine with bounded send and receive deadlines
//! - Support for both standard and high-power (RFM69HW/HCW) modules
//!
//! ## Example
//!
//! ```ignore
//! use rfm69_hcw::{Rfm69, Rfm69Mode};
//!
//! let mut radio = Rfm69::new(spi_device, reset_pin, delay);
//! radio.init()?;
//!
//! // Send a message
//! radio.send(b"Hello!")?;
//!
//! // Listen for a reply for up to two seconds
//! if let Some(packet) = radio.receive(2_000)? {
//!     let _ = (packet.payload, packet.rssi_dbm);
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod registers;
pub mod rfm69;
pub mod settings;

mod read_write;

// Re-export commonly used types for convenience
pub use rfm69::{ReceivedPacket, Rfm69, Rfm69Config, Rfm69Error, Rfm69Mode};
pub use settings::SyncConfiguration;
