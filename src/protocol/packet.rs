use bytes::{Buf, Bytes, BytesMut};

use super::codec::{encode_block, CommandBlock};
use super::command::Command;
use super::header::{Flags, PacketHeader};
use crate::core::{FrameError, HEADER_LEN, MAX_PACKET_SIZE};

/// Marker carried by the first hello of a connection attempt
pub const FIRST_HELLO_MARKER: u32 = 0x68;
/// Marker carried by a retransmitted hello
pub const RESEND_HELLO_MARKER: u32 = 0xBD;
/// Payload a client sends in its hello
pub const CLIENT_HELLO_PAYLOAD: [u8; 8] = [0x01, 0, 0, 0, 0, 0, 0, 0];

/// Handshake status reported in the first hello byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Client opening a connection
    Client,
    /// Device accepted the connection
    Connected,
    /// Device has no free slot
    FullyBooked,
    /// Device asks the client to reconnect
    Reconnect,
    Other(u8),
}

impl From<u8> for ConnectionStatus {
    fn from(status: u8) -> Self {
        match status {
            0x01 => ConnectionStatus::Client,
            0x02 => ConnectionStatus::Connected,
            0x03 => ConnectionStatus::FullyBooked,
            0x04 => ConnectionStatus::Reconnect,
            other => ConnectionStatus::Other(other),
        }
    }
}

/// The eight bytes after a hello header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloPayload {
    raw: [u8; 8],
}

impl HelloPayload {
    pub const LEN: usize = 8;

    pub fn new(raw: [u8; 8]) -> Self {
        HelloPayload { raw }
    }

    /// Payload a client sends when proposing a session
    pub fn client() -> Self {
        HelloPayload::new(CLIENT_HELLO_PAYLOAD)
    }

    pub fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        if body.remaining() != Self::LEN {
            return Err(FrameError::HelloPayload {
                expected: Self::LEN,
                actual: body.remaining(),
            });
        }
        let mut raw = [0u8; 8];
        body.copy_to_slice(&mut raw);
        Ok(HelloPayload { raw })
    }

    pub fn raw(&self) -> &[u8; 8] {
        &self.raw
    }

    pub fn status(&self) -> u8 {
        self.raw[0]
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::from(self.status())
    }

    /// Device uptime counter from bytes 2..4
    pub fn uptime(&self) -> u16 {
        u16::from_be_bytes([self.raw[2], self.raw[3]])
    }

    pub fn is_connected(&self) -> bool {
        self.status() & 0x02 != 0
    }
}

/// What follows the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Hello(HelloPayload),
    Commands(Vec<CommandBlock>),
}

/// A decoded or outgoing packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(header: PacketHeader, body: PacketBody) -> Self {
        Packet { header, body }
    }

    /// First hello proposing `uid`
    pub fn first_hello(uid: u16) -> Self {
        Self::hello(Flags::HELLO, uid, FIRST_HELLO_MARKER)
    }

    /// Retransmitted hello for `uid`
    pub fn resend_hello(uid: u16) -> Self {
        Self::hello(Flags::HELLO | Flags::RESEND, uid, RESEND_HELLO_MARKER)
    }

    fn hello(flags: Flags, uid: u16, marker: u32) -> Self {
        let header = PacketHeader::new(flags, HEADER_LEN + HelloPayload::LEN, uid, 0, marker, 0);
        Packet::new(header, PacketBody::Hello(HelloPayload::client()))
    }

    /// Bare acknowledgement of the peer packet `ack_id`
    pub fn ack(uid: u16, ack_id: u16) -> Self {
        let header = PacketHeader::new(Flags::ACK, HEADER_LEN, uid, ack_id, 0, 0);
        Packet::new(header, PacketBody::Commands(Vec::new()))
    }

    /// Empty packet asking the peer to acknowledge `package_id`
    pub fn ack_request(uid: u16, package_id: u16, resend: bool) -> Self {
        let flags = if resend {
            Flags::ACK_REQUEST | Flags::RESEND
        } else {
            Flags::ACK_REQUEST
        };
        let header = PacketHeader::new(flags, HEADER_LEN, uid, 0, 0, package_id);
        Packet::new(header, PacketBody::Commands(Vec::new()))
    }

    /// Command packet with the size field computed from `commands`,
    /// each framed with a zero divider
    pub fn with_commands(
        flags: Flags,
        uid: u16,
        ack_id: u16,
        package_id: u16,
        commands: Vec<Command>,
    ) -> Result<Self, FrameError> {
        let blocks: Vec<CommandBlock> = commands.into_iter().map(CommandBlock::from).collect();
        let mut scratch = BytesMut::new();
        for block in &blocks {
            encode_block(block, &mut scratch)?;
        }
        let size = HEADER_LEN + scratch.len();
        if size > MAX_PACKET_SIZE {
            return Err(FrameError::InvalidPacketSize { size });
        }
        let header = PacketHeader::new(flags, size, uid, ack_id, 0, package_id);
        Ok(Packet::new(header, PacketBody::Commands(blocks)))
    }

    pub fn is_hello(&self) -> bool {
        self.header.is_hello()
    }

    pub fn hello_payload(&self) -> Option<&HelloPayload> {
        match &self.body {
            PacketBody::Hello(payload) => Some(payload),
            PacketBody::Commands(_) => None,
        }
    }

    /// Command blocks in wire order, empty for hellos
    pub fn blocks(&self) -> &[CommandBlock] {
        match &self.body {
            PacketBody::Commands(blocks) => blocks,
            PacketBody::Hello(_) => &[],
        }
    }

    /// Commands in wire order
    pub fn commands(&self) -> impl Iterator<Item = &Command> + '_ {
        self.blocks().iter().map(|block| &block.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_payload_fields() {
        let hello = HelloPayload::new([0x02, 0x00, 0x00, 0x10, 0, 0, 0, 0]);
        assert_eq!(hello.connection_status(), ConnectionStatus::Connected);
        assert_eq!(hello.uptime(), 0x10);
        assert!(hello.is_connected());

        let hello = HelloPayload::client();
        assert_eq!(hello.connection_status(), ConnectionStatus::Client);
        assert!(!hello.is_connected());
    }

    #[test]
    fn test_hello_payload_length_is_exact() {
        let mut short = Bytes::from_static(&[1, 0, 0]);
        assert_eq!(
            HelloPayload::decode(&mut short),
            Err(FrameError::HelloPayload { expected: 8, actual: 3 })
        );
    }

    #[test]
    fn test_client_packets() {
        let hello = Packet::first_hello(12345);
        assert_eq!(hello.header.size(), 20);
        assert_eq!(hello.header.marker(), FIRST_HELLO_MARKER);
        assert_eq!(hello.header.flags(), Flags::HELLO);

        let resend = Packet::resend_hello(12345);
        assert!(resend.header.is_resend() && resend.is_hello());
        assert_eq!(resend.header.marker(), RESEND_HELLO_MARKER);

        let ack = Packet::ack(0x8001, 0x2e);
        assert_eq!(ack.header.size(), HEADER_LEN);
        assert_eq!(ack.header.ack_id(), 0x2e);
        assert!(ack.blocks().is_empty());

        let probe = Packet::ack_request(0x8001, 9, true);
        assert!(probe.header.is_ack_request() && probe.header.is_resend());
        assert_eq!(probe.header.package_id(), 9);
    }
}
