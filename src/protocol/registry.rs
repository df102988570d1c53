//! Tag to decoder lookup.
//!
//! The set of known commands is closed at compile time; any other tag falls
//! back to [`UnknownCommand`](super::command::UnknownCommand) in the block decoder.

use bytes::Bytes;

use super::command::{
    AudioMixerTally, Command, CommandPayload, CommandTag, FirmwareVersion, InitializationComplete,
    InputProperties, PreviewInput, ProductName, ProgramInput, TallyByIndex, TallyBySource,
    TallyChannelConfig, Topology,
};
use crate::core::FrameError;

/// Tags with a typed decoder
pub const KNOWN_TAGS: [CommandTag; 11] = [
    FirmwareVersion::TAG,
    ProductName::TAG,
    Topology::TAG,
    ProgramInput::TAG,
    PreviewInput::TAG,
    TallyByIndex::TAG,
    TallyBySource::TAG,
    TallyChannelConfig::TAG,
    InputProperties::TAG,
    AudioMixerTally::TAG,
    InitializationComplete::TAG,
];

pub fn is_known(tag: CommandTag) -> bool {
    KNOWN_TAGS.contains(&tag)
}

/// Decodes `body` with the decoder registered for `tag`.
///
/// Returns `None` when no decoder is registered, leaving `body` untouched.
pub fn decode_known(tag: CommandTag, body: &mut Bytes) -> Option<Result<Command, FrameError>> {
    let result = match &tag.0 {
        b"_ver" => decode_as::<FirmwareVersion>(body),
        b"_pin" => decode_as::<ProductName>(body),
        b"_top" => decode_as::<Topology>(body),
        b"PrgI" => decode_as::<ProgramInput>(body),
        b"PrvI" => decode_as::<PreviewInput>(body),
        b"TlIn" => decode_as::<TallyByIndex>(body),
        b"TlSr" => decode_as::<TallyBySource>(body),
        b"_TlC" => decode_as::<TallyChannelConfig>(body),
        b"InPr" => decode_as::<InputProperties>(body),
        b"AMTl" => decode_as::<AudioMixerTally>(body),
        b"InCm" => decode_as::<InitializationComplete>(body),
        _ => return None,
    };
    Some(result)
}

fn decode_as<T>(body: &mut Bytes) -> Result<Command, FrameError>
where
    T: CommandPayload + Into<Command>,
{
    T::decode(body).map(Into::into)
}
