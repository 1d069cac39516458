//! The merged-record type emitted by an [`crate::assembler::Assembler`]
//! (§3 `MergedEvent`, §6 "Emitted event shape").

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// Tag applied when a flush was triggered by the `max_lines` bound
/// (§4.4).
pub const MAX_LINES_REACHED_TAG: &str = "multiline_codec_max_lines_reached";
/// Tag applied when a flush was triggered by the `max_bytes` bound
/// (§4.4).
pub const MAX_BYTES_REACHED_TAG: &str = "multiline_codec_max_bytes_reached";

/// A single reassembled log record (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEvent {
    /// When the event was emitted (not when the first line arrived).
    pub timestamp: DateTime<Utc>,
    /// The joined message, lines separated by the configured delimiter.
    pub message: String,
    /// Tags describing how the event was produced (multiline / bound
    /// reached).
    pub tags: BTreeSet<String>,
    /// Present when the owning assembler has `sequencer_enabled`.
    pub sequence_field: Option<(String, i64)>,
    /// Set by the listener adapter, not by the assembler itself (§4.8).
    pub path: Option<String>,
}

impl MergedEvent {
    /// True when this event was formed by joining more than one line.
    pub fn is_multiline(&self, multiline_tag: &str) -> bool {
        !multiline_tag.is_empty() && self.tags.contains(multiline_tag)
    }
}
