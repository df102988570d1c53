use std::fmt;
use std::ops::BitOr;

use bytes::{Buf, BufMut};

use crate::core::{FrameError, HEADER_LEN, MAX_PACKET_SIZE};

/// The 5-bit flag set carried in the top of the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    /// Acknowledges the peer packet named by `ack_id`
    pub const ACK: Flags = Flags(0x80);
    /// Unused by this client, kept when decoding
    pub const RESERVED: Flags = Flags(0x40);
    /// Retransmission of an earlier packet
    pub const RESEND: Flags = Flags(0x20);
    /// Handshake packet
    pub const HELLO: Flags = Flags(0x10);
    /// Asks the peer to acknowledge `package_id`
    pub const ACK_REQUEST: Flags = Flags(0x08);

    /// Bits that may be set in a flag byte
    pub const MASK: u8 = 0xF8;

    /// No flags set
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Builds a flag set, dropping bits outside [`Flags::MASK`]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Flags(bits & Self::MASK)
    }

    /// Raw flag byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every flag of `other` is set
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 5] = [
            (Flags::ACK, "ACK"),
            (Flags::RESERVED, "RSV"),
            (Flags::RESEND, "RESEND"),
            (Flags::HELLO, "HELLO"),
            (Flags::ACK_REQUEST, "ACKREQ"),
        ];

        if self.is_empty() {
            return write!(f, "-");
        }

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Fixed 12-byte packet header
///
/// ```text
/// byte 0-1   flags (bits 15..11) | size (bits 10..0)
/// byte 2-3   uid
/// byte 4-5   ack id
/// byte 6-9   marker
/// byte 10-11 package id
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketHeader {
    flags: Flags,
    size: u16,
    uid: u16,
    ack_id: u16,
    marker: u32,
    package_id: u16,
}

impl PacketHeader {
    /// Creates a header.
    ///
    /// # Panics
    ///
    /// Panics if `size` does not fit the 11-bit size field.
    pub fn new(flags: Flags, size: usize, uid: u16, ack_id: u16, marker: u32, package_id: u16) -> Self {
        assert!(
            size <= MAX_PACKET_SIZE,
            "packet size {} is out of range (max {})",
            size,
            MAX_PACKET_SIZE
        );

        PacketHeader {
            flags,
            size: size as u16,
            uid,
            ack_id,
            marker,
            package_id,
        }
    }

    /// Decodes a header from the front of `buf`
    pub fn decode(buf: &mut impl Buf) -> Result<Self, FrameError> {
        if buf.remaining() < HEADER_LEN {
            return Err(FrameError::ShortHeader {
                remaining: buf.remaining(),
            });
        }

        let head = buf.get_u16();
        let flags = Flags::from_bits_truncate((head >> 8) as u8);
        let size = head & MAX_PACKET_SIZE as u16;
        let uid = buf.get_u16();
        let ack_id = buf.get_u16();
        let marker = buf.get_u32();
        let package_id = buf.get_u16();

        Ok(PacketHeader {
            flags,
            size,
            uid,
            ack_id,
            marker,
            package_id,
        })
    }

    /// Writes the 12 header bytes
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16((u16::from(self.flags.bits()) << 8) | self.size);
        dst.put_u16(self.uid);
        dst.put_u16(self.ack_id);
        dst.put_u32(self.marker);
        dst.put_u16(self.package_id);
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Total packet length including the header
    pub fn size(&self) -> usize {
        usize::from(self.size)
    }

    pub fn uid(&self) -> u16 {
        self.uid
    }

    pub fn ack_id(&self) -> u16 {
        self.ack_id
    }

    /// Opaque 32-bit marker, fixed per hello variant
    pub fn marker(&self) -> u32 {
        self.marker
    }

    pub fn package_id(&self) -> u16 {
        self.package_id
    }

    pub fn is_hello(&self) -> bool {
        self.flags.contains(Flags::HELLO)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(Flags::ACK)
    }

    pub fn is_ack_request(&self) -> bool {
        self.flags.contains(Flags::ACK_REQUEST)
    }

    pub fn is_resend(&self) -> bool {
        self.flags.contains(Flags::RESEND)
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] pkg={} uid={:#06x} ack={} size={} marker={:#x}",
            self.flags, self.package_id, self.uid, self.ack_id, self.size, self.marker
        )
    }
}
