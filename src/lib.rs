//! ATEM link: session client for the ATEM video switcher UDP control protocol
//!
//! The crate decodes the switcher's packet and command wire format, keeps a
//! session alive over an unreliable UDP link (handshake, acknowledgements,
//! probing and reconnects) and hands every decoded command to a
//! caller-supplied [`CommandSink`].
//!
//! ```no_run
//! use atem_link::{Command, Session};
//!
//! # async fn demo() -> atem_link::Result<()> {
//! let device = atem_link::network::resolve_device("192.168.10.240").await?;
//! let mut session = Session::create(device, |command: &Command| {
//!     println!("{}", command);
//! });
//! session.run().await;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod network;
pub mod protocol;
pub mod session;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Config, Error, FrameError, Result};
pub use crate::protocol::{Command, CommandTag, Packet, PacketHeader, SessionState};
pub use crate::session::{CommandSink, Session, SessionInfo, StopHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
