//! Error taxonomy for the reassembler (§7).
//!
//! `ConfigError` is fatal at `register()` time. `CapacityExceeded` is
//! surfaced to the caller of `decode`/`accept` on the identity-map path.
//! Downstream sink failures never propagate past `decode` — they are
//! logged (see `internal_events`) and the buffer is retried on the next
//! flush — so there is no `DownstreamError` variant exposed to callers;
//! it only exists as the value carried into the internal log event.

use snafu::Snafu;

/// Errors raised while compiling or validating a [`crate::config::Config`].
#[derive(Debug, Snafu, PartialEq, Eq, Clone)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("invalid continuation pattern {:?}: {}", pattern, source_display))]
    InvalidPattern {
        pattern: String,
        source_display: String,
    },

    #[snafu(display(
        "sequencer_start ({}) must be less than sequencer_rollover ({})",
        start,
        rollover
    ))]
    ContradictorySequencerBounds { start: i64, rollover: i64 },

    #[snafu(display("unknown charset {:?}", charset))]
    UnknownCharset { charset: String },

    #[snafu(display("failed to load pattern directory {:?}: {}", dir, source_display))]
    PatternDirectory {
        dir: String,
        source_display: String,
    },
}

/// Raised by [`crate::identity_map::IdentityMap`] when, after an eviction
/// sweep, no slot could be freed for a new identity.
#[derive(Debug, Snafu, PartialEq, Eq, Clone)]
#[snafu(display(
    "identity map at capacity ({} identities, limit {}); cleanup freed no slots",
    size,
    max_identities
))]
pub struct CapacityExceeded {
    pub size: usize,
    pub max_identities: usize,
}
