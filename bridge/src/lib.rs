//! # Rubber Band Cannon Bridge Engine
//!
//! This crate drives the ESP8266 Wi-Fi module that sits on the cannon's
//! serial port and turns it into a tiny HTTP server:
//!
//! - **Ring Buffer**: fixed-capacity byte buffer for incoming serial lines
//! - **Output Queue**: zero-copy fragment list for assembling responses
//! - **Link**: line reader plus blocking command/response transactions
//! - **Session**: device bring-up, channel tracking, HTTP delivery and settings
//!
//! ## Architecture
//!
//! ```text
//!  Serial RX ──► RingBuffer ──► LineReader ──► Link::execute ──► Session
//!                                                                  │
//!  Serial TX ◄──────────── OutputQueue (RAM / ROM fragments) ◄─────┘
//! ```
//!
//! ## Resource Strategy
//!
//! Everything runs on one cooperative context:
//! 1. Buffers are fixed-size arrays sized at compile time
//! 2. Blocking calls are spin loops bounded by a [`Clock`] deadline
//! 3. Failures are logged and reported through explicit status values,
//!    never escalated to a halt

#![cfg_attr(not(feature = "std"), no_std)]

pub mod at;
pub mod config;
pub mod http;
pub mod line;
pub mod link;
pub mod prefetch;
pub mod queue;
pub mod request;
pub mod ring;
pub mod session;
pub mod settings;
pub mod traits;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigStore, NetworkConfig, ServerConfig};
pub use line::{Line, LineReader};
pub use link::Link;
pub use queue::{Fragment, OutputQueue, QueueError, StorageKind};
pub use ring::RingBuffer;
pub use session::{DeliveryReport, Session, SessionConfig, SetupProgress, SetupState, Timing};
pub use settings::SettingsOutcome;
pub use traits::{flat_rom_read, Clock, LinkError, NvStorage, RomReader};

/// Library version reported in the startup banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capacity of the serial input ring buffer (longest line we can hold)
pub const SERIAL_INPUT_CAPACITY: usize = 200;

/// Number of fragments a single response may be assembled from
pub const MAX_OUTPUT_FRAGMENTS: usize = 20;

/// Size of the scratch buffer used for prefetched status values
pub const PREFETCH_CAPACITY: usize = 128;
