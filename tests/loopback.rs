//! Integration tests against a fake device.
//!
//! The device is a plain `tokio::net::UdpSocket` on loopback driven by the
//! test; the session runs in a background task exactly as an application
//! would run it.

use std::net::SocketAddr;
use std::time::Duration;

use atem_link::protocol::{
    decode_packet, encode_packet, Flags, FirmwareVersion, InitializationComplete, PacketBody,
    PacketHeader, ProgramInput, TallyByIndex, TallyState,
};
use atem_link::{Command, Config, Packet, Session, SessionState};
use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

const DEVICE_UID: u16 = 0x0042;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> Config {
    Config {
        idle_timeout: Duration::from_millis(10),
        loop_interval: Duration::from_millis(5),
        poll_interval: Duration::from_millis(10),
        ..Config::default()
    }
}

/// Waits for the next client packet matching `pred`, skipping the rest
async fn recv_matching(
    device: &UdpSocket,
    pred: impl Fn(&Packet) -> bool,
) -> (Packet, SocketAddr) {
    let mut buf = [0u8; 2048];
    loop {
        let (len, from) = timeout(Duration::from_secs(3), device.recv_from(&mut buf))
            .await
            .expect("timed out waiting for the client")
            .expect("device recv failed");
        let packet = decode_packet(&mut Bytes::copy_from_slice(&buf[..len])).expect("client sent garbage");
        if pred(&packet) {
            return (packet, from);
        }
    }
}

async fn send(device: &UdpSocket, to: SocketAddr, packet: &Packet) {
    let mut out = BytesMut::new();
    encode_packet(packet, &mut out).unwrap();
    device.send_to(&out, to).await.unwrap();
}

fn server_hello(uid: u16) -> Packet {
    let header = PacketHeader::new(Flags::HELLO, 20, uid, 0, 0x18, 0);
    let payload = atem_link::protocol::HelloPayload::new([0x02, 0x00, 0x00, 0x10, 0, 0, 0, 0]);
    Packet::new(header, PacketBody::Hello(payload))
}

fn commands(uid: u16, package_id: u16, commands: Vec<Command>) -> Packet {
    Packet::with_commands(Flags::ACK_REQUEST, uid, 0, package_id, commands).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Handshake, state dump, steady state and stop against a live socket.
#[tokio::test]
async fn session_reaches_working_and_dispatches_commands() {
    let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let device_addr = device.local_addr().unwrap();

    let (tx, mut applied) = mpsc::unbounded_channel();
    let sink = move |command: &Command| {
        let _ = tx.send(command.clone());
    };
    let mut session = assert_ok!(Session::with_config(device_addr, fast_config(), sink));
    let stop = session.stop_handle();
    let task = tokio::spawn(async move {
        session.run().await;
        session
    });

    // Hello
    let (hello, client) = recv_matching(&device, Packet::is_hello).await;
    assert_eq!(hello.header.flags(), Flags::HELLO);
    assert_eq!(hello.header.marker(), 0x68);
    let uid = hello.header.uid();

    send(&device, client, &server_hello(uid)).await;
    let (ack, _) = recv_matching(&device, |p| p.header.is_ack()).await;
    assert_eq!(ack.header.uid(), uid);

    // State dump then completion; only the completing packet is acknowledged
    send(
        &device,
        client,
        &commands(uid, 1, vec![Command::FirmwareVersion(FirmwareVersion { major: 2, minor: 30 })]),
    )
    .await;
    send(
        &device,
        client,
        &commands(
            uid,
            2,
            vec![
                Command::ProgramInput(ProgramInput {
                    me: 0,
                    reserved: 0,
                    video_source: 3,
                }),
                Command::InitializationComplete(InitializationComplete::default()),
            ],
        ),
    )
    .await;
    let (ack, _) = recv_matching(&device, |p| p.header.is_ack()).await;
    assert_eq!(ack.header.ack_id(), 2);

    // Steady state with a device-assigned uid
    let tally = TallyByIndex {
        states: vec![TallyState(0b01), TallyState(0), TallyState(0b10)],
    };
    send(&device, client, &commands(DEVICE_UID, 3, vec![Command::TallyByIndex(tally.clone())])).await;
    let (ack, _) = recv_matching(&device, |p| p.header.is_ack()).await;
    assert_eq!(ack.header.ack_id(), 3);
    assert_eq!(ack.header.uid(), DEVICE_UID);

    let mut tags = Vec::new();
    for _ in 0..3 {
        let command = timeout(Duration::from_secs(2), applied.recv())
            .await
            .expect("command not applied")
            .unwrap();
        tags.push(command);
    }
    assert!(matches!(tags[0], Command::FirmwareVersion(_)));
    assert!(matches!(tags[1], Command::ProgramInput(ProgramInput { video_source: 3, .. })));
    assert_eq!(tags[2], Command::TallyByIndex(tally));

    stop.stop();
    let session = timeout(Duration::from_secs(2), task)
        .await
        .expect("session did not stop")
        .expect("session task panicked");
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.is_terminated());
    assert_eq!(session.uid(), DEVICE_UID);
}

/// With nobody answering the session keeps resending hellos.
#[tokio::test]
async fn unanswered_hello_is_resent() {
    let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let device_addr = device.local_addr().unwrap();

    let config = Config {
        hello_retry: Duration::from_millis(50),
        ..fast_config()
    };
    let mut session = assert_ok!(Session::with_config(device_addr, config, |_: &Command| {}));
    let stop = session.stop_handle();
    let task = tokio::spawn(async move {
        session.run().await;
    });

    let (first, _) = recv_matching(&device, Packet::is_hello).await;
    assert!(!first.header.is_resend());
    let (resend, _) = recv_matching(&device, Packet::is_hello).await;
    assert!(resend.header.is_resend());
    assert_eq!(resend.header.marker(), 0xBD);
    assert_eq!(resend.header.uid(), first.header.uid());

    stop.stop();
    assert_ok!(timeout(Duration::from_secs(2), task).await.expect("session did not stop"));
}
