//! Session module
//!
//! The driver that keeps a session with one device alive. A single owner
//! (the [`Session`]) holds all state; the transport only pushes decoded
//! packets into a queue that the driver drains once per [`Session::step`].

mod sink;

pub use self::sink::CommandSink;
pub use crate::protocol::SessionState;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::core::{Config, FrameError, Result};
use crate::network::{Connector, Link, TransportListener, UdpConnector};
use crate::protocol::Packet;
use crate::util::{random_uid, Clock, SystemClock};

/// What the transport reports to the driver
#[derive(Debug)]
enum TransportEvent {
    Packet(Packet),
    Closed(Option<io::ErrorKind>),
}

/// Listener handed to every link; only pushes into the driver queue
struct QueueListener {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportListener for QueueListener {
    fn on_packet(&self, packet: Packet) {
        let _ = self.tx.send(TransportEvent::Packet(packet));
    }

    fn on_frame_error(&self, error: &FrameError) {
        debug!(error = %error, "datagram discarded");
    }

    fn on_closed(&self, error: Option<&io::Error>) {
        let _ = self.tx.send(TransportEvent::Closed(error.map(io::Error::kind)));
    }
}

/// Cloneable handle that asks a session to stop
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub state: SessionState,
    pub uid: u16,
    /// Last outbound package id
    pub package_id: u16,
    pub local_addr: Option<SocketAddr>,
    /// Time since a packet was last received in this attempt
    pub since_progress: Option<Duration>,
}

/// Session with one device.
///
/// Drive it by calling [`step`](Session::step) repeatedly or hand it to
/// [`run`](Session::run). Decoded commands go to the [`CommandSink`].
pub struct Session<C: Connector, S: CommandSink> {
    device: SocketAddr,
    config: Config,
    connector: C,
    sink: S,
    clock: Arc<dyn Clock>,

    state: SessionState,
    link: Option<C::Link>,
    listener: Arc<QueueListener>,
    events: mpsc::UnboundedReceiver<TransportEvent>,

    uid: u16,
    package_id: u16,
    /// Deadline of the next scheduled action in the current state
    marker: Instant,
    /// When a packet was last received; no timeout runs while unset
    last_progress: Option<Instant>,

    stop: StopHandle,
    terminated: bool,
}

impl<S: CommandSink> Session<UdpConnector, S> {
    /// Creates a session over UDP with the default configuration
    pub fn create(device: SocketAddr, sink: S) -> Self {
        let config = Config::default();
        let connector = UdpConnector::new(config.clone());
        Self::build(device, config, connector, sink, Arc::new(SystemClock))
    }

    /// Creates a session over UDP with `config`
    pub fn with_config(device: SocketAddr, config: Config, sink: S) -> Result<Self> {
        let connector = UdpConnector::new(config.clone());
        Self::with_parts(device, config, connector, sink, Arc::new(SystemClock))
    }
}

impl<C: Connector, S: CommandSink> Session<C, S> {
    /// Creates a session from its parts, validating `config`
    pub fn with_parts(
        device: SocketAddr,
        config: Config,
        connector: C,
        sink: S,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(device, config, connector, sink, clock))
    }

    fn build(device: SocketAddr, config: Config, connector: C, sink: S, clock: Arc<dyn Clock>) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let marker = clock.now() + config.idle_timeout;

        Session {
            device,
            config,
            connector,
            sink,
            clock,
            state: SessionState::Idle,
            link: None,
            listener: Arc::new(QueueListener { tx }),
            events,
            uid: random_uid(),
            package_id: 0,
            marker,
            last_progress: None,
            stop: StopHandle::default(),
            terminated: false,
        }
    }

    pub fn device(&self) -> SocketAddr {
        self.device
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn uid(&self) -> u16 {
        self.uid
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Whether a stop request has been carried out
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn info(&self) -> SessionInfo {
        let now = self.clock.now();
        SessionInfo {
            state: self.state,
            uid: self.uid,
            package_id: self.package_id,
            local_addr: self.link.as_ref().and_then(|link| link.local_addr()),
            since_progress: self.last_progress.map(|t| now.saturating_duration_since(t)),
        }
    }

    /// Requests a stop; carried out by the next `step`
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Handle for stopping the session from another task
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs one driver iteration: drains every queued event, then checks
    /// the timers of the resulting state
    pub async fn step(&mut self) {
        if self.stop.is_stopped() {
            if !self.terminated {
                info!(device = %self.device, "session stopped");
                self.to_idle().await;
                self.terminated = true;
            }
            return;
        }

        while let Ok(event) = self.events.try_recv() {
            match event {
                TransportEvent::Packet(packet) => self.handle_packet(packet).await,
                TransportEvent::Closed(error) => {
                    if self.link.is_some() {
                        warn!(device = %self.device, error = ?error, "transport closed");
                        self.to_idle().await;
                    }
                }
            }
        }

        self.check_timers().await;
    }

    /// Drives the session until stopped or the iteration cap is hit
    pub async fn run(&mut self) {
        let mut iterations: u64 = 0;
        loop {
            self.step().await;
            if self.terminated {
                break;
            }

            iterations += 1;
            if iterations >= self.config.max_iterations {
                warn!(iterations, "iteration cap reached, stopping session");
                self.stop();
                self.step().await;
                break;
            }

            tokio::time::sleep(self.config.loop_interval).await;
        }
    }

    async fn handle_packet(&mut self, packet: Packet) {
        let now = self.clock.now();
        trace!(state = %self.state, header = %packet.header, "packet");

        match self.state {
            SessionState::Idle => {
                trace!("packet ignored while idle");
            }
            SessionState::Connecting => {
                self.last_progress = Some(now);
                if !packet.is_hello() {
                    debug!(header = %packet.header, "ignoring non-hello packet while connecting");
                }
                if (packet.is_hello() || packet.header.is_ack_request()) && !self.acknowledge(&packet).await {
                    return;
                }
                info!(device = %self.device, uid = self.uid, "connected");
                self.set_state(SessionState::Initializing);
            }
            SessionState::Initializing => {
                self.last_progress = Some(now);
                if packet.is_hello() {
                    debug!(header = %packet.header, "hello while initializing");
                    self.acknowledge(&packet).await;
                    return;
                }

                let mut completed = false;
                for command in packet.commands() {
                    if command.is_initialization_complete() {
                        completed = true;
                    } else {
                        self.sink.apply(command);
                    }
                }

                if completed {
                    info!(device = %self.device, uid = self.uid, "initialization complete");
                    self.set_state(SessionState::Working);
                    if packet.header.is_ack_request() {
                        self.acknowledge(&packet).await;
                    }
                }
            }
            SessionState::Working => {
                self.last_progress = Some(now);
                self.handle_working(&packet).await;
            }
            SessionState::Recovering => {
                self.last_progress = Some(now);
                info!(device = %self.device, "device answered, recovered");
                self.set_state(SessionState::Working);
                self.handle_working(&packet).await;
            }
        }
    }

    async fn handle_working(&mut self, packet: &Packet) {
        if packet.is_hello() {
            debug!(header = %packet.header, "hello while working");
            if packet.header.is_ack_request() {
                self.acknowledge(packet).await;
            }
            return;
        }

        let uid = packet.header.uid();
        if uid != 0 && uid != self.uid {
            info!(old = self.uid, new = uid, "device assigned session uid");
            let old = self.uid;
            self.uid = uid;
            self.sink.on_uid_change(old, uid);
        }

        if packet.header.is_ack_request() && !self.acknowledge(packet).await {
            return;
        }

        for command in packet.commands() {
            self.sink.apply(command);
        }
    }

    async fn check_timers(&mut self) {
        let now = self.clock.now();

        match self.state {
            SessionState::Idle => {
                if now >= self.marker {
                    self.to_connecting().await;
                }
            }
            SessionState::Connecting => {
                if self.silent_for(now, self.config.connecting_timeout) {
                    info!(device = %self.device, "no answer to hello");
                    self.to_idle().await;
                } else if now >= self.marker {
                    debug!(uid = self.uid, "resending hello");
                    if self.send(&Packet::resend_hello(self.uid)).await {
                        self.marker = now + self.config.hello_retry;
                    }
                }
            }
            SessionState::Initializing => {
                if self.silent_for(now, self.config.initializing_timeout) {
                    info!(device = %self.device, "initialization timed out");
                    self.to_idle().await;
                }
            }
            SessionState::Working => {
                if self.silent_for(now, self.config.working_timeout) {
                    self.package_id = self.package_id.wrapping_add(1);
                    debug!(package_id = self.package_id, "device silent, probing");
                    self.set_state(SessionState::Recovering);
                    if self.send(&Packet::ack_request(self.uid, self.package_id, false)).await {
                        self.marker = now + self.config.probe_retry;
                    }
                }
            }
            SessionState::Recovering => {
                if self.silent_for(now, self.config.recovering_timeout) {
                    info!(device = %self.device, "device lost");
                    self.to_idle().await;
                } else if now >= self.marker {
                    // Retransmissions reuse the probe's package id
                    debug!(package_id = self.package_id, "resending probe");
                    if self.send(&Packet::ack_request(self.uid, self.package_id, true)).await {
                        self.marker = now + self.config.probe_retry;
                    }
                }
            }
        }
    }

    fn silent_for(&self, now: Instant, timeout: Duration) -> bool {
        self.last_progress
            .is_some_and(|last| now.saturating_duration_since(last) >= timeout)
    }

    async fn to_connecting(&mut self) {
        self.uid = random_uid();
        self.package_id = 0;

        let listener: Arc<dyn TransportListener> = self.listener.clone();
        let link = match self.connector.connect(self.device, listener).await {
            Ok(link) => link,
            Err(err) => {
                warn!(device = %self.device, error = %err, "could not open transport");
                self.marker = self.clock.now() + self.config.idle_timeout;
                return;
            }
        };

        info!(
            device = %self.device,
            uid = self.uid,
            local = ?link.local_addr(),
            "connecting"
        );
        self.link = Some(link);
        // Anything the new socket picked up before our hello is from an
        // earlier session on the same port
        self.clear_queue();
        self.set_state(SessionState::Connecting);

        let now = self.clock.now();
        self.last_progress = Some(now);
        if self.send(&Packet::first_hello(self.uid)).await {
            self.marker = now + self.config.hello_retry;
        }
    }

    /// Closes the link, waits for its receive loop and clears the queue
    async fn to_idle(&mut self) {
        if let Some(link) = self.link.take() {
            link.shutdown().await;
        }
        self.clear_queue();

        self.package_id = 0;
        self.last_progress = None;
        self.marker = self.clock.now() + self.config.idle_timeout;
        self.set_state(SessionState::Idle);
    }

    fn clear_queue(&mut self) {
        let mut dropped = 0usize;
        while self.events.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            trace!(dropped, "cleared queued events");
        }
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from != to {
            debug!(%from, %to, "state change");
            self.state = to;
            self.sink.on_state_change(from, to);
        }
    }

    /// Acknowledges `packet`; false if the session dropped to idle
    async fn acknowledge(&mut self, packet: &Packet) -> bool {
        trace!(ack_id = packet.header.package_id(), "acknowledging");
        self.send(&Packet::ack(self.uid, packet.header.package_id())).await
    }

    /// Sends on the current link; a failed send drops the session to idle
    async fn send(&mut self, packet: &Packet) -> bool {
        let Some(link) = self.link.as_ref() else {
            return false;
        };

        let sent = link.send(packet).await;
        match sent {
            Ok(()) => true,
            Err(err) => {
                warn!(device = %self.device, error = %err, "send failed");
                self.to_idle().await;
                false
            }
        }
    }
}
