//! Core types for the ATEM session client
//!
//! This module contains the error taxonomy, configuration and protocol constants
//! shared by the codec, transport and session layers.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, FrameError, Result};
pub use self::types::Config;

/// UDP port the device listens on
pub const DEFAULT_PORT: u16 = 9910;

/// Length of the fixed packet header in bytes
pub const HEADER_LEN: usize = 12;

/// Largest packet size expressible in the 11-bit size field
pub const MAX_PACKET_SIZE: usize = 0x7FF;

/// Default user-space receive buffer
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Default kernel receive buffer (SO_RCVBUF)
pub const SO_RECV_BUFFER: usize = 16000;

/// Range a freshly proposed session uid is drawn from
pub const UID_RANGE: std::ops::RangeInclusive<u16> = 10000..=60000;
