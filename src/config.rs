//! Immutable configuration for an [`crate::assembler::Assembler`] or
//! [`crate::identity_map::IdentityMap`] (§3, §6).
//!
//! Mirrors the teacher's `#[serde(deny_unknown_fields, default)]`
//! config-struct idiom (see `TokenizerConfig`/`MergeConfig` in the
//! retrieved `transforms` modules). Parsing a config *file* into this
//! struct is the outer pipeline driver's job, out of scope here; this
//! module only owns the struct, its defaults, and `register()`-time
//! validation (producing [`crate::error::ConfigError`]).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bytesize::ByteSize;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{self, ConfigError};

/// Continuation direction (§3 `what ∈ {previous, next}`).
///
/// This is a closed Rust enum rather than a raw string, so "unknown
/// `what`" (§7) cannot arise once a `Config` value exists: parsing a raw
/// config representation into this type is the outer pipeline driver's
/// job (out of scope here, per the module doc above), and
/// `#[serde(rename_all = "snake_case")]` already rejects any value other
/// than `"previous"`/`"next"` at that boundary with a deserialization
/// error — there is no second, reachable "unknown mode" check to perform
/// inside `register()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum What {
    /// A non-continuing line first flushes the buffer, then starts the
    /// next record.
    Previous,
    /// A continuing line is appended and the buffer is flushed once a
    /// non-continuing line arrives.
    Next,
}

fn deserialize_byte_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct SizeVisitor;

    impl<'de> de::Visitor<'de> for SizeVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a byte count, either an integer or a size string like \"10 MiB\"")
        }

        fn visit_u64<E>(self, value: u64) -> Result<u64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<u64, E>
        where
            E: de::Error,
        {
            Ok(value as u64)
        }

        fn visit_str<E>(self, value: &str) -> Result<u64, E>
        where
            E: de::Error,
        {
            ByteSize::from_str(value)
                .map(|b| b.0)
                .map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(SizeVisitor)
}

const fn default_max_lines() -> usize {
    500
}

fn default_max_bytes() -> u64 {
    ByteSize::mib(10).0
}

fn default_delimiter() -> String {
    "\n".to_string()
}

fn default_charset() -> String {
    "UTF-8".to_string()
}

fn default_multiline_tag() -> String {
    "multiline".to_string()
}

fn default_sequencer_field() -> String {
    "seq".to_string()
}

const fn default_sequencer_start() -> i64 {
    1
}

const fn default_sequencer_rollover() -> i64 {
    100_000
}

/// Per-assembler configuration (§3, §6 options table). Immutable once
/// `register()`-ed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Continuation regex (resolved through the named-pattern library,
    /// §4.1).
    pub pattern: String,
    /// Continuation direction.
    pub what: What,
    /// Invert the continuation predicate.
    pub negate: bool,
    /// Extra directories of named sub-patterns for [`crate::line_matcher`].
    pub patterns_dir: Vec<PathBuf>,
    /// Source byte encoding, resolved by [`crate::charset`].
    pub charset: String,
    /// Line terminator the [`crate::tokenizer::Tokenizer`] splits on.
    pub delimiter: String,
    /// Tag applied to events merged from more than one line.
    pub multiline_tag: String,
    /// Line-count bound (§4.4).
    pub max_lines: usize,
    /// Byte-count bound (§4.4), accepts either an integer or a size
    /// string such as `"10 MiB"`.
    #[serde(deserialize_with = "deserialize_byte_size")]
    pub max_bytes: u64,
    /// Quiet-period auto-flush interval; unset disables the timer.
    pub auto_flush_interval: Option<Duration>,
    /// Enable the per-assembler sequence counter.
    pub sequencer_enabled: bool,
    /// Field name the sequence value is emitted under.
    pub sequencer_field: String,
    /// Inclusive lower bound / wrap-to value of the sequence counter.
    pub sequencer_start: i64,
    /// Exclusive upper bound of the sequence counter.
    pub sequencer_rollover: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            what: What::Previous,
            negate: false,
            patterns_dir: Vec::new(),
            charset: default_charset(),
            delimiter: default_delimiter(),
            multiline_tag: default_multiline_tag(),
            max_lines: default_max_lines(),
            max_bytes: default_max_bytes(),
            auto_flush_interval: None,
            sequencer_enabled: false,
            sequencer_field: default_sequencer_field(),
            sequencer_start: default_sequencer_start(),
            sequencer_rollover: default_sequencer_rollover(),
        }
    }
}

impl Config {
    /// Validate the parts of `register()` that don't require compiling
    /// the pattern (that step lives in [`crate::line_matcher::LineMatcher::compile`]).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sequencer_enabled && self.sequencer_start >= self.sequencer_rollover {
            return error::ContradictorySequencerBounds {
                start: self.sequencer_start,
                rollover: self.sequencer_rollover,
            }
            .fail();
        }
        Ok(())
    }
}

/// Builder-level options owning an [`crate::identity_map::IdentityMap`]
/// (§6, "builder" column).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct IdentityMapConfig {
    pub max_identities: usize,
    pub evict_timeout: Duration,
    pub cleaner_interval: Duration,
}

impl Default for IdentityMapConfig {
    fn default() -> Self {
        Self {
            max_identities: 20_000,
            evict_timeout: Duration::from_secs(3600),
            cleaner_interval: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_options_table() {
        let config = Config::default();
        assert_eq!(config.delimiter, "\n");
        assert_eq!(config.charset, "UTF-8");
        assert_eq!(config.multiline_tag, "multiline");
        assert_eq!(config.max_lines, 500);
        assert_eq!(config.max_bytes, ByteSize::mib(10).0);
        assert!(config.auto_flush_interval.is_none());
        assert!(!config.sequencer_enabled);
        assert_eq!(config.sequencer_field, "seq");
        assert_eq!(config.sequencer_start, 1);
        assert_eq!(config.sequencer_rollover, 100_000);

        let map_config = IdentityMapConfig::default();
        assert_eq!(map_config.max_identities, 20_000);
        assert_eq!(map_config.evict_timeout, Duration::from_secs(3600));
        assert_eq!(map_config.cleaner_interval, Duration::from_secs(300));
    }

    #[test]
    fn contradictory_sequencer_bounds_rejected() {
        let config = Config {
            sequencer_enabled: true,
            sequencer_start: 10,
            sequencer_rollover: 10,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
