//! Downstream sink interface and per-line provenance context (§4.8).
//!
//! §9's design notes flag the source's `@last_seen_listener` /
//! `@previous_listener` coupling as something a systems rewrite should
//! replace with "a value-level `EmissionContext` struct passed per
//! line" — that is the redesign this module implements (see
//! DESIGN.md, Open Question #1).

use async_trait::async_trait;

use crate::event::MergedEvent;

/// Per-line provenance, threaded through `decode`/`accept` instead of
/// living as mutable state on the assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmissionContext {
    /// Typically a file path or connection key; attached to the
    /// [`MergedEvent`] that the line ultimately contributes to.
    pub path: Option<String>,
}

impl EmissionContext {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

/// The downstream sink a merged event is delivered to (§6 "Listener
/// contract", §4.8).
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one event. An `Err` here is a §7 `DownstreamError`: the
    /// caller must preserve the buffer and retry on the next flush.
    async fn process_event(
        &self,
        event: MergedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A `Sink` built from a plain closure, for tests and simple pipeline
/// wiring — mirrors the teacher's frequent use of function-pointer
/// transforms in place of trait objects where state isn't needed.
pub struct FnSink<F>(pub F);

#[async_trait]
impl<F> Sink for FnSink<F>
where
    F: Fn(MergedEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    async fn process_event(
        &self,
        event: MergedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (self.0)(event)
    }
}
