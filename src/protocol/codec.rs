use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::command::{Command, CommandTag, UnknownCommand};
use super::header::PacketHeader;
use super::packet::{HelloPayload, Packet, PacketBody};
use super::registry;
use crate::core::{Error, FrameError, HEADER_LEN, MAX_PACKET_SIZE};

/// Size, divider and tag preceding every command payload
pub const BLOCK_OVERHEAD: usize = 8;

/// Decodes the 12-byte header at the front of `buf`
pub fn decode_header(buf: &mut impl Buf) -> Result<PacketHeader, FrameError> {
    PacketHeader::decode(buf)
}

/// Writes the 12 header bytes of `header`
pub fn encode_header(header: &PacketHeader, dst: &mut impl BufMut) {
    header.encode(dst)
}

/// A decoded command together with the divider word that framed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBlock {
    pub divider: u16,
    pub command: Command,
}

impl CommandBlock {
    pub fn new(divider: u16, command: Command) -> Self {
        CommandBlock { divider, command }
    }
}

impl From<Command> for CommandBlock {
    fn from(command: Command) -> Self {
        CommandBlock::new(0, command)
    }
}

/// Decodes one command block from the front of `buf`.
///
/// Returns the command and the number of bytes the block occupied. Unknown
/// tags become [`Command::Unknown`] holding the whole block.
pub fn decode_command_block(buf: &mut Bytes) -> Result<(Command, usize), FrameError> {
    let (block, size) = decode_block(buf)?;
    Ok((block.command, size))
}

/// Like [`decode_command_block`] but keeps the divider
pub fn decode_block(buf: &mut Bytes) -> Result<(CommandBlock, usize), FrameError> {
    if buf.remaining() < 2 {
        return Err(FrameError::ShortBlock {
            remaining: buf.remaining(),
        });
    }

    let block_size = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    if block_size < BLOCK_OVERHEAD {
        return Err(FrameError::InvalidBlockSize { block_size });
    }
    if block_size > buf.remaining() {
        return Err(FrameError::BlockOverrun {
            block_size,
            remaining: buf.remaining(),
        });
    }

    let raw = buf.split_to(block_size);
    let mut block = raw.clone();
    block.advance(2); // size
    let divider = block.get_u16();
    let tag = CommandTag([block[0], block[1], block[2], block[3]]);
    block.advance(4);

    let payload_len = block.len();
    let command = match registry::decode_known(tag, &mut block) {
        Some(decoded) => decoded?,
        None => {
            block.advance(payload_len);
            Command::Unknown(UnknownCommand::new(tag, raw))
        }
    };

    // Everything after the size field must belong to the command
    let expected = block_size - 2;
    let consumed = 6 + payload_len - block.remaining();
    if consumed != expected {
        return Err(FrameError::LengthMismatch {
            tag,
            block_size,
            expected,
            consumed,
        });
    }

    Ok((CommandBlock::new(divider, command), block_size))
}

/// Writes one command block with a zero divider, computing its size prefix.
/// Unknown commands are written back verbatim.
pub fn encode_command_block(command: &Command, dst: &mut BytesMut) -> Result<(), FrameError> {
    put_block(command, 0, dst)
}

/// Writes `block` with the divider it was decoded with
pub fn encode_block(block: &CommandBlock, dst: &mut BytesMut) -> Result<(), FrameError> {
    put_block(&block.command, block.divider, dst)
}

fn put_block(command: &Command, divider: u16, dst: &mut BytesMut) -> Result<(), FrameError> {
    if let Command::Unknown(unknown) = command {
        dst.put_slice(unknown.raw());
        return Ok(());
    }

    let start = dst.len();
    dst.put_u16(0);
    dst.put_u16(divider);
    dst.put_slice(&command.tag().0);
    command.encode_payload(dst);

    let block_size = dst.len() - start;
    let Ok(size) = u16::try_from(block_size) else {
        dst.truncate(start);
        return Err(FrameError::InvalidBlockSize { block_size });
    };
    dst[start..start + 2].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

/// Decodes one packet from the front of `buf`, consuming exactly the
/// number of bytes its header declares
pub fn decode_packet(buf: &mut Bytes) -> Result<Packet, FrameError> {
    let available = buf.remaining();
    let header = decode_header(buf)?;

    let size = header.size();
    if size < HEADER_LEN {
        return Err(FrameError::InvalidPacketSize { size });
    }
    if size > available {
        return Err(FrameError::Truncated {
            declared: size,
            available,
        });
    }

    let mut body = buf.split_to(size - HEADER_LEN);
    let body = if header.is_hello() {
        PacketBody::Hello(HelloPayload::decode(&mut body)?)
    } else {
        let mut blocks = Vec::new();
        while body.has_remaining() {
            let (block, _) = decode_block(&mut body)?;
            blocks.push(block);
        }
        PacketBody::Commands(blocks)
    };

    Ok(Packet::new(header, body))
}

/// Encodes `packet`, writing the size field from the bytes actually produced
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<(), FrameError> {
    let start = dst.len();
    dst.put_bytes(0, HEADER_LEN);

    match &packet.body {
        PacketBody::Hello(hello) => dst.put_slice(hello.raw()),
        PacketBody::Commands(blocks) => {
            for block in blocks {
                if let Err(e) = encode_block(block, dst) {
                    dst.truncate(start);
                    return Err(e);
                }
            }
        }
    }

    let size = dst.len() - start;
    if size > MAX_PACKET_SIZE {
        dst.truncate(start);
        return Err(FrameError::InvalidPacketSize { size });
    }

    let h = &packet.header;
    let header = PacketHeader::new(h.flags(), size, h.uid(), h.ack_id(), h.marker(), h.package_id());
    let mut slot = &mut dst[start..start + HEADER_LEN];
    encode_header(&header, &mut slot);
    Ok(())
}

/// Frames packets out of a receive buffer
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl PacketCodec {
    pub fn new() -> Self {
        PacketCodec
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            // Need the whole header to know the packet size
            return Ok(None);
        }

        let size = usize::from(u16::from_be_bytes([src[0], src[1]])) & MAX_PACKET_SIZE;
        if size < HEADER_LEN {
            return Err(FrameError::InvalidPacketSize { size }.into());
        }
        if src.len() < size {
            return Ok(None);
        }

        let mut frame = src.split_to(size).freeze();
        Ok(Some(decode_packet(&mut frame)?))
    }
}

impl Encoder<&Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, item: &Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_packet(item, dst)?;
        Ok(())
    }
}
