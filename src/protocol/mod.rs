//! Protocol implementation module
//!
//! Wire format of the switcher control protocol: the 12-byte packet header,
//! command blocks and their typed payloads, plus the session states.

pub mod codec;
pub mod command;
pub mod header;
pub mod packet;
pub mod registry;
pub mod state;

pub use self::codec::{
    decode_block, decode_command_block, decode_header, decode_packet, encode_block,
    encode_command_block, encode_header, encode_packet, CommandBlock, PacketCodec, BLOCK_OVERHEAD,
};
pub use self::command::{
    AudioMixerTally, AudioSourceTally, Command, CommandPayload, CommandTag, FirmwareVersion,
    InitializationComplete, InputProperties, Latin1Field, PreviewInput, ProductName, ProgramInput, SourceTally,
    TallyByIndex, TallyBySource, TallyChannelConfig, TallyState, Topology, UnknownCommand,
};
pub use self::header::{Flags, PacketHeader};
pub use self::packet::{ConnectionStatus, HelloPayload, Packet, PacketBody};
pub use self::state::SessionState;
