//! Utility module
//!
//! Clock abstraction, latin-1 string fields and hex helpers used
//! throughout the library.

pub mod clock;

pub use self::clock::{Clock, ManualClock, SystemClock};

use bytes::{BufMut, BytesMut};
use rand::Rng;

use crate::core::UID_RANGE;

/// Draws a fresh session uid to propose in a hello packet
pub fn random_uid() -> u16 {
    rand::thread_rng().gen_range(UID_RANGE)
}

/// Decodes a NUL-terminated latin-1 field; bytes after the first NUL are ignored
pub fn latin1_until_nul(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Writes `text` as a latin-1 field of exactly `len` bytes, NUL padded.
/// Characters outside latin-1 become `?`; overlong text is cut.
pub fn put_latin1_padded(dst: &mut BytesMut, text: &str, len: usize) {
    let mut written = 0;
    for ch in text.chars().take(len) {
        let byte = u8::try_from(u32::from(ch)).unwrap_or(b'?');
        dst.put_u8(byte);
        written += 1;
    }
    dst.put_bytes(0, len - written);
}

/// Upper-case hex rendering of raw protocol bytes
pub fn hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Parses a hex dump, ignoring whitespace between byte groups
pub fn parse_hex(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_stops_at_nul() {
        assert_eq!(latin1_until_nul(b"Black\0P\x19\xa7"), "Black");
        assert_eq!(latin1_until_nul(b"Blk\0"), "Blk");
        assert_eq!(latin1_until_nul(b"\0abc"), "");
        assert_eq!(latin1_until_nul(&[0x4B, 0xE4, 0x73, 0x65]), "Käse");
    }

    #[test]
    fn test_latin1_padding() {
        let mut buf = BytesMut::new();
        put_latin1_padded(&mut buf, "Käse", 6);
        assert_eq!(&buf[..], &[0x4B, 0xE4, 0x73, 0x65, 0, 0]);

        let mut buf = BytesMut::new();
        put_latin1_padded(&mut buf, "Camera 1", 4);
        assert_eq!(&buf[..], b"Came");

        let mut buf = BytesMut::new();
        put_latin1_padded(&mut buf, "€", 2);
        assert_eq!(&buf[..], b"?\0");
    }

    #[test]
    fn test_hex_helpers() {
        let bytes = parse_hex("000C A7B4 5f766572").unwrap();
        assert_eq!(bytes, vec![0x00, 0x0C, 0xA7, 0xB4, 0x5F, 0x76, 0x65, 0x72]);
        assert_eq!(hex_upper(&bytes), "000CA7B45F766572");
        assert!(parse_hex("0").is_err());
    }

    #[test]
    fn test_random_uid_in_range() {
        for _ in 0..100 {
            assert!(UID_RANGE.contains(&random_uid()));
        }
    }
}
