//! Network module
//!
//! UDP link to one device. The transport owns the socket and a receive task;
//! decoded packets and failures are handed to a [`TransportListener`].

mod connection;

pub use self::connection::{UdpConnector, UdpTransport};

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::lookup_host;

use crate::core::{Error, FrameError, Result, DEFAULT_PORT};
use crate::protocol::Packet;

/// Receives everything the transport observes.
///
/// Called from the receive task, so implementations must not block.
pub trait TransportListener: Send + Sync {
    /// A datagram decoded into a packet
    fn on_packet(&self, packet: Packet);

    /// A datagram was malformed and dropped
    fn on_frame_error(&self, error: &FrameError) {
        let _ = error;
    }

    /// The device is unreachable; the transport keeps running
    fn on_unreachable(&self, error: &io::Error) {
        let _ = error;
    }

    /// The transport closed, with the fatal error if there was one.
    /// Called exactly once per transport.
    fn on_closed(&self, error: Option<&io::Error>);
}

/// An open link to a device
pub trait Link: Send {
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Encodes and transmits one packet
    fn send(&self, packet: &Packet) -> impl Future<Output = Result<()>> + Send;

    /// Asks the receive loop to stop; idempotent
    fn stop(&self);

    /// Stops the link and waits for the receive loop to exit
    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

/// Opens links; the session opens a fresh one for every connection attempt
pub trait Connector: Send {
    type Link: Link;

    fn connect(
        &mut self,
        device: SocketAddr,
        listener: Arc<dyn TransportListener>,
    ) -> impl Future<Output = Result<Self::Link>> + Send;
}

/// Resolves a device host name or address literal. A missing port defaults
/// to the device control port.
pub async fn resolve_device(host: &str) -> Result<SocketAddr> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    let resolved = if host.contains(':') {
        lookup_host(host).await.map(|addrs| addrs.collect::<Vec<_>>())
    } else {
        lookup_host((host, DEFAULT_PORT)).await.map(|addrs| addrs.collect::<Vec<_>>())
    }
    .map_err(|e| Error::resolve(format!("{}: {}", host, e)))?;

    resolved
        .into_iter()
        .next()
        .ok_or_else(|| Error::resolve(format!("{}: no addresses found", host)))
}
