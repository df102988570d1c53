use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::FrameError;
use crate::util::{hex_upper, latin1_until_nul, put_latin1_padded};

/// Four ASCII bytes naming a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandTag(pub [u8; 4]);

impl CommandTag {
    pub const FIRMWARE_VERSION: CommandTag = CommandTag(*b"_ver");
    pub const PRODUCT_NAME: CommandTag = CommandTag(*b"_pin");
    pub const TOPOLOGY: CommandTag = CommandTag(*b"_top");
    pub const PROGRAM_INPUT: CommandTag = CommandTag(*b"PrgI");
    pub const PREVIEW_INPUT: CommandTag = CommandTag(*b"PrvI");
    pub const TALLY_BY_INDEX: CommandTag = CommandTag(*b"TlIn");
    pub const TALLY_BY_SOURCE: CommandTag = CommandTag(*b"TlSr");
    pub const TALLY_CHANNEL_CONFIG: CommandTag = CommandTag(*b"_TlC");
    pub const INPUT_PROPERTIES: CommandTag = CommandTag(*b"InPr");
    pub const AUDIO_MIXER_TALLY: CommandTag = CommandTag(*b"AMTl");
    pub const INITIALIZATION_COMPLETE: CommandTag = CommandTag(*b"InCm");
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// A command payload with a fixed wire layout
pub trait CommandPayload: Sized {
    /// Tag this payload is registered under
    const TAG: CommandTag;

    /// Decodes the payload; must leave exactly the bytes it does not own
    fn decode(body: &mut Bytes) -> Result<Self, FrameError>;

    /// Writes the payload bytes (without block framing)
    fn encode(&self, dst: &mut BytesMut);
}

fn ensure(tag: CommandTag, body: &Bytes, needed: usize) -> Result<(), FrameError> {
    if body.remaining() < needed {
        return Err(FrameError::ShortPayload {
            tag,
            needed,
            available: body.remaining(),
        });
    }
    Ok(())
}

/// Latin-1 text field exactly as it was received.
///
/// Devices leave stale bytes after the terminating NUL. They are kept so the
/// field encodes back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Latin1Field(Bytes);

impl Latin1Field {
    /// NUL-padded field of `width` bytes holding `text`
    pub fn new(text: &str, width: usize) -> Self {
        let mut buf = BytesMut::with_capacity(width);
        put_latin1_padded(&mut buf, text, width);
        Latin1Field(buf.freeze())
    }

    pub fn from_wire(raw: Bytes) -> Self {
        Latin1Field(raw)
    }

    /// Text up to the first NUL
    pub fn text(&self) -> String {
        latin1_until_nul(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Writes the field at `width` bytes, cutting or NUL padding as needed
    fn put(&self, dst: &mut BytesMut, width: usize) {
        let n = self.0.len().min(width);
        dst.put_slice(&self.0[..n]);
        dst.put_bytes(0, width - n);
    }
}

impl fmt::Display for Latin1Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

impl PartialEq<str> for Latin1Field {
    fn eq(&self, other: &str) -> bool {
        self.text() == other
    }
}

impl PartialEq<&str> for Latin1Field {
    fn eq(&self, other: &&str) -> bool {
        self.text() == *other
    }
}

/// `_ver`: protocol firmware version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
}

impl FirmwareVersion {
    /// Dotted `major.minor` form
    pub fn version(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl CommandPayload for FirmwareVersion {
    const TAG: CommandTag = CommandTag::FIRMWARE_VERSION;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 4)?;
        Ok(FirmwareVersion {
            major: body.get_u16(),
            minor: body.get_u16(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.major);
        dst.put_u16(self.minor);
    }
}

/// `_pin`: product name, the whole payload is one NUL-padded latin-1 field
/// and is written back at the width it was received with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductName {
    pub name: Latin1Field,
}

impl ProductName {
    /// Field width of names built locally
    pub const FIELD_LEN: usize = 44;

    pub fn new(name: &str) -> Self {
        ProductName {
            name: Latin1Field::new(name, Self::FIELD_LEN),
        }
    }
}

impl CommandPayload for ProductName {
    const TAG: CommandTag = CommandTag::PRODUCT_NAME;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        Ok(ProductName {
            name: Latin1Field::from_wire(body.split_to(body.len())),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(self.name.as_bytes());
    }
}

/// `_top`: hardware capability summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub mix_effects: u8,
    pub sources: u8,
    pub color_generators: u8,
    pub aux_busses: u8,
    pub downstream_keyers: u8,
    pub stingers: u8,
    pub dves: u8,
    pub super_sources: u8,
    pub reserved1: u8,
    pub sd_output: u8,
    pub reserved2: u8,
    pub reserved3: u8,
}

impl Topology {
    pub fn has_sd_output(&self) -> bool {
        self.sd_output & 0b1 != 0
    }
}

impl CommandPayload for Topology {
    const TAG: CommandTag = CommandTag::TOPOLOGY;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 12)?;
        Ok(Topology {
            mix_effects: body.get_u8(),
            sources: body.get_u8(),
            color_generators: body.get_u8(),
            aux_busses: body.get_u8(),
            downstream_keyers: body.get_u8(),
            stingers: body.get_u8(),
            dves: body.get_u8(),
            super_sources: body.get_u8(),
            reserved1: body.get_u8(),
            sd_output: body.get_u8(),
            reserved2: body.get_u8(),
            reserved3: body.get_u8(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(&[
            self.mix_effects,
            self.sources,
            self.color_generators,
            self.aux_busses,
            self.downstream_keyers,
            self.stingers,
            self.dves,
            self.super_sources,
            self.reserved1,
            self.sd_output,
            self.reserved2,
            self.reserved3,
        ]);
    }
}

/// `PrgI`: source currently on program for one ME
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramInput {
    pub me: u8,
    pub reserved: u8,
    pub video_source: u16,
}

impl CommandPayload for ProgramInput {
    const TAG: CommandTag = CommandTag::PROGRAM_INPUT;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 4)?;
        Ok(ProgramInput {
            me: body.get_u8(),
            reserved: body.get_u8(),
            video_source: body.get_u16(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.me);
        dst.put_u8(self.reserved);
        dst.put_u16(self.video_source);
    }
}

/// `PrvI`: source currently on preview for one ME
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewInput {
    pub me: u8,
    pub reserved1: u8,
    pub video_source: u16,
    pub reserved2: u32,
}

impl CommandPayload for PreviewInput {
    const TAG: CommandTag = CommandTag::PREVIEW_INPUT;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 8)?;
        Ok(PreviewInput {
            me: body.get_u8(),
            reserved1: body.get_u8(),
            video_source: body.get_u16(),
            reserved2: body.get_u32(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.me);
        dst.put_u8(self.reserved1);
        dst.put_u16(self.video_source);
        dst.put_u32(self.reserved2);
    }
}

/// Program/preview bits of one tally entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TallyState(pub u8);

impl TallyState {
    pub const PROGRAM: u8 = 0b01;
    pub const PREVIEW: u8 = 0b10;

    pub fn is_on_program(self) -> bool {
        self.0 & Self::PROGRAM != 0
    }

    pub fn is_on_preview(self) -> bool {
        self.0 & Self::PREVIEW != 0
    }
}

/// `TlIn`: tally flags indexed by input position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyByIndex {
    pub states: Vec<TallyState>,
}

impl TallyByIndex {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// State at `index`, `None` past the end
    pub fn state(&self, index: usize) -> Option<TallyState> {
        self.states.get(index).copied()
    }

    pub fn is_on_program(&self, index: usize) -> bool {
        self.state(index).is_some_and(TallyState::is_on_program)
    }

    pub fn is_on_preview(&self, index: usize) -> bool {
        self.state(index).is_some_and(TallyState::is_on_preview)
    }
}

impl CommandPayload for TallyByIndex {
    const TAG: CommandTag = CommandTag::TALLY_BY_INDEX;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 2)?;
        let count = usize::from(body.get_u16());
        ensure(Self::TAG, body, count)?;
        let states = body.split_to(count).iter().map(|&b| TallyState(b)).collect();
        Ok(TallyByIndex { states })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.states.len() as u16);
        for state in &self.states {
            dst.put_u8(state.0);
        }
    }
}

/// One entry of a [`TallyBySource`] table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTally {
    pub source: u16,
    pub state: TallyState,
}

/// `TlSr`: tally flags keyed by video source id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyBySource {
    pub entries: Vec<SourceTally>,
}

impl TallyBySource {
    /// State of `source`, clear when the source is not listed
    pub fn state_of(&self, source: u16) -> TallyState {
        self.entries
            .iter()
            .find(|entry| entry.source == source)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    pub fn is_on_program(&self, source: u16) -> bool {
        self.state_of(source).is_on_program()
    }

    pub fn is_on_preview(&self, source: u16) -> bool {
        self.state_of(source).is_on_preview()
    }

    pub fn sources(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(|entry| entry.source)
    }
}

impl CommandPayload for TallyBySource {
    const TAG: CommandTag = CommandTag::TALLY_BY_SOURCE;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 2)?;
        let count = usize::from(body.get_u16());
        ensure(Self::TAG, body, count * 3)?;
        let entries = (0..count)
            .map(|_| SourceTally {
                source: body.get_u16(),
                state: TallyState(body.get_u8()),
            })
            .collect();
        Ok(TallyBySource { entries })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.entries.len() as u16);
        for entry in &self.entries {
            dst.put_u16(entry.source);
            dst.put_u8(entry.state.0);
        }
    }
}

/// `_TlC`: number of tally channels exposed by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyChannelConfig {
    pub reserved1: u32,
    pub tally_channels: u8,
    /// 24-bit field
    pub reserved2: u32,
}

impl CommandPayload for TallyChannelConfig {
    const TAG: CommandTag = CommandTag::TALLY_CHANNEL_CONFIG;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 8)?;
        let reserved1 = body.get_u32();
        let tally_channels = body.get_u8();
        let reserved2 = (u32::from(body.get_u8()) << 16) | u32::from(body.get_u16());
        Ok(TallyChannelConfig {
            reserved1,
            tally_channels,
            reserved2,
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.reserved1);
        dst.put_u8(self.tally_channels);
        dst.put_u8((self.reserved2 >> 16) as u8);
        dst.put_u16(self.reserved2 as u16);
    }
}

/// `InPr`: names and port capabilities of one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputProperties {
    pub video_source: u16,
    pub long_name: Latin1Field,
    pub short_name: Latin1Field,
    pub reserved1: u8,
    pub available_external_port_types: u8,
    pub reserved2: u8,
    pub external_port_type: u8,
    pub port_type: u8,
    pub reserved3: u8,
    pub availability: u8,
    pub me_availability: u8,
    pub reserved4: u8,
    pub reserved5: u8,
}

impl InputProperties {
    pub const LONG_NAME_LEN: usize = 20;
    pub const SHORT_NAME_LEN: usize = 4;
    const LEN: usize = 2 + Self::LONG_NAME_LEN + Self::SHORT_NAME_LEN + 10;
}

impl CommandPayload for InputProperties {
    const TAG: CommandTag = CommandTag::INPUT_PROPERTIES;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, Self::LEN)?;
        let video_source = body.get_u16();
        let long_name = Latin1Field::from_wire(body.split_to(Self::LONG_NAME_LEN));
        let short_name = Latin1Field::from_wire(body.split_to(Self::SHORT_NAME_LEN));
        Ok(InputProperties {
            video_source,
            long_name,
            short_name,
            reserved1: body.get_u8(),
            available_external_port_types: body.get_u8(),
            reserved2: body.get_u8(),
            external_port_type: body.get_u8(),
            port_type: body.get_u8(),
            reserved3: body.get_u8(),
            availability: body.get_u8(),
            me_availability: body.get_u8(),
            reserved4: body.get_u8(),
            reserved5: body.get_u8(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.video_source);
        self.long_name.put(dst, Self::LONG_NAME_LEN);
        self.short_name.put(dst, Self::SHORT_NAME_LEN);
        dst.put_slice(&[
            self.reserved1,
            self.available_external_port_types,
            self.reserved2,
            self.external_port_type,
            self.port_type,
            self.reserved3,
            self.availability,
            self.me_availability,
            self.reserved4,
            self.reserved5,
        ]);
    }
}

/// One entry of an [`AudioMixerTally`] table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSourceTally {
    pub source: u16,
    pub flags: u8,
}

/// `AMTl`: which audio sources are mixed in.
///
/// Bytes after the table are kept in `tail` so newer firmware fields survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioMixerTally {
    pub entries: Vec<AudioSourceTally>,
    pub tail: Bytes,
}

impl AudioMixerTally {
    pub const MIXED_IN: u8 = 0b1;

    /// Flags of `source`, zero when not listed
    pub fn flags_of(&self, source: u16) -> u8 {
        self.entries
            .iter()
            .find(|entry| entry.source == source)
            .map_or(0, |entry| entry.flags)
    }

    pub fn is_mixed_in(&self, source: u16) -> bool {
        self.flags_of(source) & Self::MIXED_IN != 0
    }

    pub fn sources(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(|entry| entry.source)
    }
}

impl CommandPayload for AudioMixerTally {
    const TAG: CommandTag = CommandTag::AUDIO_MIXER_TALLY;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 2)?;
        let count = usize::from(body.get_u16());
        ensure(Self::TAG, body, count * 3)?;
        let entries = (0..count)
            .map(|_| AudioSourceTally {
                source: body.get_u16(),
                flags: body.get_u8(),
            })
            .collect();
        let tail = body.split_to(body.len());
        Ok(AudioMixerTally { entries, tail })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.entries.len() as u16);
        for entry in &self.entries {
            dst.put_u16(entry.source);
            dst.put_u8(entry.flags);
        }
        dst.put_slice(&self.tail);
    }
}

/// `InCm`: the device finished dumping its initial state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitializationComplete {
    pub reserved: u32,
}

impl CommandPayload for InitializationComplete {
    const TAG: CommandTag = CommandTag::INITIALIZATION_COMPLETE;

    fn decode(body: &mut Bytes) -> Result<Self, FrameError> {
        ensure(Self::TAG, body, 4)?;
        Ok(InitializationComplete {
            reserved: body.get_u32(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.reserved);
    }
}

/// A block with a tag this client does not decode, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand {
    tag: CommandTag,
    raw: Bytes,
}

impl UnknownCommand {
    /// `raw` is the whole block, size prefix included
    pub fn new(tag: CommandTag, raw: Bytes) -> Self {
        UnknownCommand { tag, raw }
    }

    pub fn tag(&self) -> CommandTag {
        self.tag
    }

    /// Declared block size, equal to the number of bytes the block occupied
    pub fn block_size(&self) -> usize {
        self.raw.len()
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Upper-case hex of the whole block
    pub fn payload_hex(&self) -> String {
        hex_upper(&self.raw)
    }
}

/// Every command the device may send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FirmwareVersion(FirmwareVersion),
    ProductName(ProductName),
    Topology(Topology),
    ProgramInput(ProgramInput),
    PreviewInput(PreviewInput),
    TallyByIndex(TallyByIndex),
    TallyBySource(TallyBySource),
    TallyChannelConfig(TallyChannelConfig),
    InputProperties(InputProperties),
    AudioMixerTally(AudioMixerTally),
    InitializationComplete(InitializationComplete),
    Unknown(UnknownCommand),
}

impl Command {
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::FirmwareVersion(_) => FirmwareVersion::TAG,
            Command::ProductName(_) => ProductName::TAG,
            Command::Topology(_) => Topology::TAG,
            Command::ProgramInput(_) => ProgramInput::TAG,
            Command::PreviewInput(_) => PreviewInput::TAG,
            Command::TallyByIndex(_) => TallyByIndex::TAG,
            Command::TallyBySource(_) => TallyBySource::TAG,
            Command::TallyChannelConfig(_) => TallyChannelConfig::TAG,
            Command::InputProperties(_) => InputProperties::TAG,
            Command::AudioMixerTally(_) => AudioMixerTally::TAG,
            Command::InitializationComplete(_) => InitializationComplete::TAG,
            Command::Unknown(cmd) => cmd.tag(),
        }
    }

    pub fn is_initialization_complete(&self) -> bool {
        matches!(self, Command::InitializationComplete(_))
    }

    /// Writes the payload of a known command; unknown commands have no
    /// separate payload and are written whole by the block encoder
    pub(crate) fn encode_payload(&self, dst: &mut BytesMut) {
        match self {
            Command::FirmwareVersion(cmd) => cmd.encode(dst),
            Command::ProductName(cmd) => cmd.encode(dst),
            Command::Topology(cmd) => cmd.encode(dst),
            Command::ProgramInput(cmd) => cmd.encode(dst),
            Command::PreviewInput(cmd) => cmd.encode(dst),
            Command::TallyByIndex(cmd) => cmd.encode(dst),
            Command::TallyBySource(cmd) => cmd.encode(dst),
            Command::TallyChannelConfig(cmd) => cmd.encode(dst),
            Command::InputProperties(cmd) => cmd.encode(dst),
            Command::AudioMixerTally(cmd) => cmd.encode(dst),
            Command::InitializationComplete(cmd) => cmd.encode(dst),
            Command::Unknown(_) => {}
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::FirmwareVersion(cmd) => write!(f, "_ver {}", cmd),
            Command::ProductName(cmd) => write!(f, "_pin {:?}", cmd.name.text()),
            Command::Topology(cmd) => write!(
                f,
                "_top mes={} sources={} dsk={} sd={}",
                cmd.mix_effects,
                cmd.sources,
                cmd.downstream_keyers,
                cmd.has_sd_output()
            ),
            Command::ProgramInput(cmd) => write!(f, "PrgI me={} source={}", cmd.me, cmd.video_source),
            Command::PreviewInput(cmd) => write!(f, "PrvI me={} source={}", cmd.me, cmd.video_source),
            Command::TallyByIndex(cmd) => write!(f, "TlIn count={}", cmd.len()),
            Command::TallyBySource(cmd) => write!(f, "TlSr count={}", cmd.entries.len()),
            Command::TallyChannelConfig(cmd) => write!(f, "_TlC channels={}", cmd.tally_channels),
            Command::InputProperties(cmd) => write!(
                f,
                "InPr source={} short={:?} long={:?}",
                cmd.video_source,
                cmd.short_name.text(),
                cmd.long_name.text()
            ),
            Command::AudioMixerTally(cmd) => {
                write!(f, "AMTl count={} tail={}", cmd.entries.len(), cmd.tail.len())
            }
            Command::InitializationComplete(_) => write!(f, "InCm"),
            Command::Unknown(cmd) => write!(f, "{} size={} raw={}", cmd.tag(), cmd.block_size(), cmd.payload_hex()),
        }
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Command {
                fn from(cmd: $variant) -> Self {
                    Command::$variant(cmd)
                }
            }
        )*
    };
}

impl_from_payload!(
    FirmwareVersion,
    ProductName,
    Topology,
    ProgramInput,
    PreviewInput,
    TallyByIndex,
    TallyBySource,
    TallyChannelConfig,
    InputProperties,
    AudioMixerTally,
    InitializationComplete,
);
