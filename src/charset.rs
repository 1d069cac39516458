//! Converts bytes of a declared source encoding into valid UTF-8 (§4.2).
//!
//! Grounded on `encoding_rs`, which `vectordotdev-vector`'s own
//! `Cargo.toml` already depends on for this exact purpose, and whose
//! replacement-character decode contract matches §4.2's wording almost
//! verbatim (see the retrieved `mob-rs` encoding module for the same
//! `decode_without_bom_handling` idiom).

use encoding_rs::Encoding;

use crate::error::{self, ConfigError};

/// The pseudo-charset meaning "pass bytes through, replacement-marking
/// anything non-ASCII" (§4.2).
const ASCII_8BIT: &str = "ASCII-8BIT";

/// A resolved, reusable charset converter.
#[derive(Debug, Clone, Copy)]
pub struct CharsetConverter {
    encoding: Option<&'static Encoding>,
}

impl CharsetConverter {
    /// Resolve `declared_charset` once at registration time.
    pub fn resolve(declared_charset: &str) -> Result<Self, ConfigError> {
        if declared_charset.eq_ignore_ascii_case(ASCII_8BIT) {
            return Ok(Self { encoding: None });
        }

        let encoding = Encoding::for_label(declared_charset.as_bytes()).ok_or_else(|| {
            error::UnknownCharset {
                charset: declared_charset.to_string(),
            }
            .build()
        })?;

        Ok(Self {
            encoding: Some(encoding),
        })
    }

    /// Convert `bytes` to valid UTF-8, substituting U+FFFD for invalid
    /// sub-sequences. `ASCII-8BIT` replacement-marks every non-ASCII
    /// byte individually, since `encoding_rs` has no such label of its
    /// own.
    pub fn convert(&self, bytes: &[u8]) -> String {
        match self.encoding {
            Some(encoding) => {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            }
            None => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trips_byte_for_byte() {
        let converter = CharsetConverter::resolve("UTF-8").unwrap();
        assert_eq!(converter.convert(b"hello world"), "hello world");
    }

    #[test]
    fn invalid_utf8_is_replacement_marked() {
        let converter = CharsetConverter::resolve("UTF-8").unwrap();
        let bytes = b"valid \xff\xfe invalid";
        let converted = converter.convert(bytes);
        assert!(converted.contains('\u{FFFD}'));
        assert!(converted.starts_with("valid "));
    }

    #[test]
    fn ascii_8bit_replacement_marks_non_ascii_bytes() {
        let converter = CharsetConverter::resolve("ASCII-8BIT").unwrap();
        let converted = converter.convert(b"ok\x80\xffend");
        assert_eq!(converted, "ok\u{FFFD}\u{FFFD}end");
    }

    #[test]
    fn unknown_charset_is_a_config_error() {
        assert!(CharsetConverter::resolve("NOT-A-REAL-CHARSET").is_err());
    }

    #[test]
    fn windows_1252_decodes_non_ascii_byte() {
        let converter = CharsetConverter::resolve("windows-1252").unwrap();
        // 0xE9 is "é" in cp1252.
        assert_eq!(converter.convert(b"caf\xe9"), "café");
    }
}
