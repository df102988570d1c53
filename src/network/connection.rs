use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Decoder;
use tracing::{debug, error, trace, warn};

use super::{Connector, Link, TransportListener};
use crate::core::{Config, Error, Result};
use crate::protocol::{decode_packet, encode_packet, Packet, PacketCodec};

/// State shared between the transport handle and its receive task
struct Shared {
    /// Socket connected to the device
    socket: UdpSocket,
    device: SocketAddr,
    listener: Arc<dyn TransportListener>,
    /// Encode buffer; the lock also keeps a single send in flight
    send_buffer: Mutex<BytesMut>,
    stopped: AtomicBool,
    /// Set once the listener has been told the transport closed
    closed: AtomicBool,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stops the loop and reports a fatal error
    fn fail(&self, err: &io::Error) {
        error!(device = %self.device, error = %err, "transport failed");
        self.stopped.store(true, Ordering::Release);
        self.notify_closed(Some(err));
    }

    fn notify_closed(&self, err: Option<&io::Error>) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.listener.on_closed(err);
        }
    }

    fn unreachable(&self, err: &io::Error) {
        debug!(device = %self.device, error = %err, "device unreachable");
        self.listener.on_unreachable(err);
    }

    /// Decodes every packet in one datagram and hands them to the listener
    fn dispatch(&self, codec: &mut PacketCodec, datagram: &mut BytesMut) {
        loop {
            match codec.decode(datagram) {
                Ok(Some(packet)) => {
                    trace!(device = %self.device, header = %packet.header, "packet received");
                    self.listener.on_packet(packet);
                }
                Ok(None) => {
                    if !datagram.is_empty() {
                        // Re-run the strict decoder to name what is missing
                        if let Err(err) = decode_packet(&mut datagram.split().freeze()) {
                            warn!(device = %self.device, error = %err, "dropping datagram");
                            self.listener.on_frame_error(&err);
                        }
                    }
                    return;
                }
                Err(Error::Frame(err)) => {
                    warn!(device = %self.device, error = %err, "dropping datagram");
                    self.listener.on_frame_error(&err);
                    return;
                }
                Err(err) => {
                    warn!(device = %self.device, error = %err, "dropping datagram");
                    return;
                }
            }
        }
    }
}

/// Whether `err` means the device is not there (yet) rather than a broken socket
pub(crate) fn is_unreachable(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    ) {
        return true;
    }

    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        return code == libc::EHOSTUNREACH || code == libc::ENETUNREACH;
    }

    false
}

/// Creates the local socket: SO_RCVBUF from the config, bound to the
/// configured port or an ephemeral one if that fails
fn bind_socket(device: SocketAddr, config: &Config) -> io::Result<std::net::UdpSocket> {
    let ipv6 = device.is_ipv6();
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let local = |port: u16| -> SocketAddr {
        if ipv6 {
            (Ipv6Addr::UNSPECIFIED, port).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, port).into()
        }
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if let Err(err) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        warn!(size = config.recv_buffer_size, error = %err, "could not set receive buffer size");
    }

    match config.local_port {
        Some(port) => {
            if let Err(err) = socket.bind(&local(port).into()) {
                warn!(port, error = %err, "local port unavailable, using an ephemeral port");
                socket.bind(&local(0).into())?;
            }
        }
        None => socket.bind(&local(0).into())?,
    }

    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// UDP transport connected to one device
pub struct UdpTransport {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl UdpTransport {
    /// Opens a socket towards `device` and starts the receive loop
    pub async fn open(
        device: SocketAddr,
        config: &Config,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Self> {
        let socket = UdpSocket::from_std(bind_socket(device, config)?)?;
        socket.connect(device).await?;
        let local_addr = socket.local_addr()?;

        let shared = Arc::new(Shared {
            socket,
            device,
            listener,
            send_buffer: Mutex::new(BytesMut::with_capacity(config.max_datagram_size)),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let task = tokio::spawn(receive_loop(
            Arc::clone(&shared),
            config.poll_interval,
            config.max_datagram_size,
        ));

        debug!(device = %device, local = %local_addr, "transport opened");
        Ok(UdpTransport {
            shared,
            local_addr,
            task,
        })
    }

    pub fn device(&self) -> SocketAddr {
        self.shared.device
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }
}

async fn receive_loop(shared: Arc<Shared>, poll_interval: Duration, max_datagram_size: usize) {
    let mut codec = PacketCodec::new();
    let mut recv_buffer = BytesMut::with_capacity(max_datagram_size);

    while !shared.is_stopped() {
        recv_buffer.clear();
        recv_buffer.resize(max_datagram_size, 0);

        let received = match timeout(poll_interval, shared.socket.recv(&mut recv_buffer)).await {
            Ok(received) => received,
            // Poll interval elapsed; re-check the stop flag
            Err(_) => continue,
        };

        match received {
            Ok(len) => {
                recv_buffer.truncate(len);
                shared.dispatch(&mut codec, &mut recv_buffer);
            }
            Err(err) if is_unreachable(&err) => shared.unreachable(&err),
            Err(err) => {
                shared.fail(&err);
                return;
            }
        }
    }

    debug!(device = %shared.device, "receive loop stopped");
    shared.notify_closed(None);
}

impl Link for UdpTransport {
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    async fn send(&self, packet: &Packet) -> Result<()> {
        if self.shared.is_stopped() {
            return Err(Error::TransportClosed);
        }

        let mut buffer = self.shared.send_buffer.lock().await;
        buffer.clear();
        encode_packet(packet, &mut buffer)?;

        trace!(device = %self.shared.device, header = %packet.header, "sending packet");
        match self.shared.socket.send(&buffer).await {
            Ok(_) => Ok(()),
            Err(err) if is_unreachable(&err) => {
                self.shared.unreachable(&err);
                Ok(())
            }
            Err(err) => {
                self.shared.fail(&err);
                Err(err.into())
            }
        }
    }

    fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            debug!(device = %self.shared.device, "stopping transport");
        }
    }

    async fn shutdown(mut self) {
        self.stop();
        if let Err(err) = (&mut self.task).await {
            warn!(device = %self.shared.device, error = %err, "receive loop ended abnormally");
        }
        self.shared.notify_closed(None);
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
    }
}

/// Opens [`UdpTransport`]s with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct UdpConnector {
    config: Config,
}

impl UdpConnector {
    pub fn new(config: Config) -> Self {
        UdpConnector { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Connector for UdpConnector {
    type Link = UdpTransport;

    async fn connect(
        &mut self,
        device: SocketAddr,
        listener: Arc<dyn TransportListener>,
    ) -> Result<UdpTransport> {
        UdpTransport::open(device, &self.config, listener).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FrameError;
    use crate::protocol::Command;
    use crate::util::parse_hex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    enum Event {
        Packet(Packet),
        Frame(FrameError),
        Unreachable,
        Closed(bool),
    }

    struct ChannelListener {
        tx: mpsc::UnboundedSender<Event>,
        closed: AtomicUsize,
    }

    impl TransportListener for ChannelListener {
        fn on_packet(&self, packet: Packet) {
            let _ = self.tx.send(Event::Packet(packet));
        }

        fn on_frame_error(&self, error: &FrameError) {
            let _ = self.tx.send(Event::Frame(error.clone()));
        }

        fn on_unreachable(&self, _error: &io::Error) {
            let _ = self.tx.send(Event::Unreachable);
        }

        fn on_closed(&self, error: Option<&io::Error>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            let _ = self.tx.send(Event::Closed(error.is_some()));
        }
    }

    fn listener() -> (Arc<ChannelListener>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Arc::new(ChannelListener {
            tx,
            closed: AtomicUsize::new(0),
        });
        (listener, rx)
    }

    fn test_config() -> Config {
        Config {
            poll_interval: Duration::from_millis(10),
            ..Config::default()
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("listener dropped")
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let device_addr = device.local_addr().unwrap();
        let (listener, mut rx) = listener();

        let transport = UdpTransport::open(device_addr, &test_config(), listener.clone())
            .await
            .unwrap();

        transport.send(&Packet::first_hello(0x4d80)).await.unwrap();
        let mut buf = [0u8; 64];
        let (len, from) = device.recv_from(&mut buf).await.unwrap();
        assert_eq!(from.port(), transport.local_addr().unwrap().port());
        assert_eq!(&buf[..len], &parse_hex("1014 4d80 0000 0000 0068 0000 0100000000000000").unwrap()[..]);

        let wire = parse_hex("0818 8001 0000 0000 0000 002e 000CA7B45F76657200020010").unwrap();
        device.send_to(&wire, from).await.unwrap();

        match next_event(&mut rx).await {
            Event::Packet(packet) => {
                assert_eq!(packet.header.package_id(), 0x2e);
                assert!(matches!(packet.commands().next(), Some(Command::FirmwareVersion(_))));
            }
            other => panic!("unexpected event {:?}", other),
        }

        transport.shutdown().await;
        assert!(matches!(next_event(&mut rx).await, Event::Closed(false)));
        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_datagram_does_not_stop_loop() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (listener, mut rx) = listener();
        let transport = UdpTransport::open(device.local_addr().unwrap(), &test_config(), listener)
            .await
            .unwrap();
        let client = SocketAddr::from(([127, 0, 0, 1], transport.local_addr().unwrap().port()));

        // Declares 24 bytes, carries 16
        let truncated = parse_hex("0818 8001 0000 0000 0000 002e 000C3E74").unwrap();
        device.send_to(&truncated, client).await.unwrap();
        match next_event(&mut rx).await {
            Event::Frame(err) => assert_eq!(err, FrameError::Truncated { declared: 24, available: 16 }),
            other => panic!("unexpected event {:?}", other),
        }

        let ack = parse_hex("800c 8001 002e 0000 0000 0000").unwrap();
        device.send_to(&ack, client).await.unwrap();
        match next_event(&mut rx).await {
            Event::Packet(packet) => assert!(packet.header.is_ack()),
            other => panic!("unexpected event {:?}", other),
        }

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_after_stop_is_rejected() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (listener, mut rx) = listener();
        let transport = UdpTransport::open(device.local_addr().unwrap(), &test_config(), listener.clone())
            .await
            .unwrap();

        transport.stop();
        transport.stop();
        assert!(transport.is_stopped());
        assert!(matches!(
            transport.send(&Packet::ack(1, 2)).await,
            Err(Error::TransportClosed)
        ));

        transport.shutdown().await;
        assert!(matches!(next_event(&mut rx).await, Event::Closed(false)));
        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_local_port_falls_back() {
        let holder = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let busy = holder.local_addr().unwrap().port();
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            local_port: Some(busy),
            ..test_config()
        };

        let (listener, _rx) = listener();
        let transport = UdpTransport::open(device.local_addr().unwrap(), &config, listener)
            .await
            .unwrap();
        let local = transport.local_addr().unwrap();
        assert_ne!(local.port(), busy);
        assert_ne!(local.port(), 0);

        transport.shutdown().await;
    }

    #[test]
    fn test_unreachable_classification() {
        assert!(is_unreachable(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(is_unreachable(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_unreachable(&io::Error::from(io::ErrorKind::PermissionDenied)));
        #[cfg(unix)]
        {
            assert!(is_unreachable(&io::Error::from_raw_os_error(libc::EHOSTUNREACH)));
            assert!(is_unreachable(&io::Error::from_raw_os_error(libc::ENETUNREACH)));
            assert!(!is_unreachable(&io::Error::from_raw_os_error(libc::EBADF)));
        }
    }
}
