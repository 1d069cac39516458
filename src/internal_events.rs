//! Structured internal logging, grounded on the teacher's
//! `InternalEvent` trait (see `src/internal_events/unix.rs` in the
//! retrieved pack): one struct per observable condition, emitted through
//! `tracing` macros. Unlike the teacher, there is no `emit_metrics` leg —
//! `spec.md` §1 scopes metrics sinks out as an external collaborator and
//! this crate has nothing to report them to.

/// A loggable internal condition.
pub trait InternalEvent {
    fn emit_logs(&self);
}

/// Emits `event.emit_logs()`. Mirrors the teacher's `emit!(...)` call
/// sites without pulling in its `metrics`-aware macro crate.
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::InternalEvent::emit_logs(&$event)
    };
}

pub(crate) use emit;

/// §7 `DownstreamError`: the sink raised during a flush. The buffer is
/// preserved for retry; this is purely observational.
#[derive(Debug)]
pub struct DownstreamFlushError<'a> {
    pub error: &'a (dyn std::error::Error + Send + Sync),
    pub identity: Option<&'a str>,
}

impl InternalEvent for DownstreamFlushError<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Downstream sink rejected a flush; buffer preserved for retry.",
            error = %self.error,
            identity = self.identity.unwrap_or("<standalone>"),
        );
    }
}

/// §4.6 capacity protocol, step 2: crossed the 80% warning threshold.
/// Logged once per crossing, not once per access.
#[derive(Debug)]
pub struct CapacityWarning {
    pub size: usize,
    pub max_identities: usize,
}

impl InternalEvent for CapacityWarning {
    fn emit_logs(&self) {
        warn!(
            message = "Identity map is approaching capacity.",
            size = self.size,
            max_identities = self.max_identities,
        );
    }
}

/// §4.6 capacity protocol, step 1: cleanup could not free a slot.
#[derive(Debug)]
pub struct CapacityExceededError {
    pub size: usize,
    pub max_identities: usize,
}

impl InternalEvent for CapacityExceededError {
    fn emit_logs(&self) {
        error!(
            message = "Identity map at capacity; cleanup freed no slots.",
            size = self.size,
            max_identities = self.max_identities,
        );
    }
}

/// §4.7: an identity was evicted by the reaper (or an explicit
/// `evict()` call).
#[derive(Debug)]
pub struct IdentityEvicted<'a> {
    pub identity: &'a str,
}

impl InternalEvent for IdentityEvicted<'_> {
    fn emit_logs(&self) {
        debug!(message = "Evicted idle identity.", identity = self.identity);
    }
}

/// §4.5: the quiet-period timer fired and ran a flush.
#[derive(Debug)]
pub struct AutoFlushFired<'a> {
    pub identity: Option<&'a str>,
}

impl InternalEvent for AutoFlushFired<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Auto-flush timer fired.",
            identity = self.identity.unwrap_or("<standalone>"),
        );
    }
}

/// §4.4: a flush was forced by `max_lines`/`max_bytes` rather than the
/// continuation predicate.
#[derive(Debug)]
pub struct BoundTriggeredFlush<'a> {
    pub tag: &'a str,
    pub line_count: usize,
    pub byte_count: u64,
}

impl InternalEvent for BoundTriggeredFlush<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Flush triggered by buffer bound.",
            tag = self.tag,
            line_count = self.line_count,
            byte_count = self.byte_count,
        );
    }
}
