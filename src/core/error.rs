use std::io;
use thiserror::Error;

use crate::protocol::CommandTag;

/// Custom error types for the ATEM session client
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Transport is closed")]
    TransportClosed,

    #[error("Address resolution error: {0}")]
    Resolve(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new address resolution error
    pub fn resolve(msg: impl Into<String>) -> Self {
        Error::Resolve(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

/// Malformed datagram. Each datagram is parsed on its own, so a frame error
/// only ever discards the datagram that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("buffer too short for packet header: remaining = {remaining}")]
    ShortHeader { remaining: usize },

    #[error("packet size {size} is smaller than the header")]
    InvalidPacketSize { size: usize },

    #[error("datagram holds {available} bytes but packet declares {declared}")]
    Truncated { declared: usize, available: usize },

    #[error("buffer too short for command block size: remaining = {remaining}")]
    ShortBlock { remaining: usize },

    #[error("command block size {block_size} is below the block overhead")]
    InvalidBlockSize { block_size: usize },

    #[error("command block size {block_size} exceeds remaining {remaining} bytes")]
    BlockOverrun { block_size: usize, remaining: usize },

    #[error("command {tag} needs {needed} payload bytes, only {available} available")]
    ShortPayload {
        tag: CommandTag,
        needed: usize,
        available: usize,
    },

    #[error("command {tag} with block size {block_size} consumed {consumed} bytes, expected {expected}")]
    LengthMismatch {
        tag: CommandTag,
        block_size: usize,
        expected: usize,
        consumed: usize,
    },

    #[error("hello payload must be {expected} bytes, got {actual}")]
    HelloPayload { expected: usize, actual: usize },
}
