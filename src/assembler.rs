//! The multiline state machine (§4.4) — the core of the crate.
//!
//! Generalizes the teacher's `src/line_agg.rs` (`Logic<K, C>` /
//! `Aggregate<C>`): that module's four `Mode` variants
//! (`ContinueThrough`/`ContinuePast`/`HaltBefore`/`HaltWith`) collapse
//! onto the spec's two (`previous`/`next`), and its `Stream`-combinator
//! shape (stash-and-poll) is replaced with a direct callback-driven
//! state machine, because this crate's contract is sink-based
//! (`decode(chunk, sink)`), not `Stream`-based. `Aggregate::merge`'s
//! byte-joining approach carries over almost unchanged into
//! [`merge_pending`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;

use crate::auto_flush_timer::AutoFlushTimer;
use crate::charset::CharsetConverter;
use crate::config::{Config, What};
use crate::error::ConfigError;
use crate::event::{MergedEvent, MAX_BYTES_REACHED_TAG, MAX_LINES_REACHED_TAG};
use crate::internal_events::{emit, AutoFlushFired, BoundTriggeredFlush, DownstreamFlushError};
use crate::line_matcher::LineMatcher;
use crate::listener::{EmissionContext, Sink};
use crate::tokenizer::Tokenizer;

/// The immutable, shareable parts of a registered assembler
/// configuration (§9: "configuration is an immutable shared value").
/// Cloning an [`Assembler`] instance (see [`Assembler::spawn_instance`])
/// is cheap because it only clones this `Arc`, not the compiled
/// matcher.
struct Shared {
    config: Config,
    matcher: LineMatcher,
    charset: CharsetConverter,
}

/// Per-instance mutable state, guarded by a single mutex held across
/// "append-and-possibly-flush" and across timer-fired flushes, per §5.
struct State {
    tokenizer: Tokenizer,
    buffer: Vec<String>,
    byte_count: u64,
    /// The context captured when the currently-open buffer's first line
    /// arrived; attached to the event produced when that buffer flushes.
    opened_context: EmissionContext,
    sequence: i64,
    /// The sink passed to the most recent `decode`/`accept` call, used
    /// by the auto-flush timer and (via `auto_flush`) by the identity
    /// map's reaper fallback chain (§4.7's `@decode_block`).
    last_sink: Option<Arc<dyn Sink>>,
}

impl State {
    fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new("\n"),
            buffer: Vec::new(),
            byte_count: 0,
            opened_context: EmissionContext::default(),
            sequence: 0,
            last_sink: None,
        }
    }
}

/// The multiline assembler (§4.4). Always used behind an `Arc`, because
/// the auto-flush timer holds a weak self-reference so it can call back
/// into `auto_flush` when it fires.
pub struct Assembler {
    shared: Arc<Shared>,
    state: AsyncMutex<State>,
    timer: AutoFlushTimer,
    closed: AtomicBool,
}

impl Assembler {
    /// One-time initialization (§4.4 `register`): compiles the pattern,
    /// resolves the charset, validates the sequencer bounds, and installs
    /// the auto-flush timer if `auto_flush_interval` is set.
    pub fn register(config: Config) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let matcher = LineMatcher::compile(&config.pattern, &config.patterns_dir)?;
        let charset = CharsetConverter::resolve(&config.charset)?;
        let sequence = config.sequencer_start;
        let delimiter = config.delimiter.clone();

        let shared = Arc::new(Shared {
            config,
            matcher,
            charset,
        });

        Ok(Self::from_shared(shared, delimiter, sequence))
    }

    /// Produce a new, independent assembler that shares this one's
    /// immutable configuration but starts with a fresh buffer, fresh
    /// pattern-match state, and its own timer (§9: replaces the
    /// source's duck-typed `clone`).
    pub fn spawn_instance(&self) -> Arc<Self> {
        let sequence = self.shared.config.sequencer_start;
        let delimiter = self.shared.config.delimiter.clone();
        Self::from_shared(Arc::clone(&self.shared), delimiter, sequence)
    }

    fn from_shared(shared: Arc<Shared>, delimiter: String, sequence_start: i64) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Assembler>| {
            let mut state = State::new();
            state.tokenizer = Tokenizer::new(delimiter);
            state.sequence = sequence_start;

            let interval = shared.config.auto_flush_interval;
            let weak_for_timer = Weak::clone(weak);
            let timer = AutoFlushTimer::new(interval, move || {
                let weak = Weak::clone(&weak_for_timer);
                Box::pin(async move {
                    if let Some(assembler) = weak.upgrade() {
                        emit!(AutoFlushFired {
                            identity: None
                        });
                        assembler.auto_flush().await;
                    }
                })
            });

            Assembler {
                shared,
                state: AsyncMutex::new(state),
                timer,
                closed: AtomicBool::new(false),
            }
        })
    }

    pub fn has_auto_flush(&self) -> bool {
        !self.timer.is_unset()
    }

    /// Feed `chunk` through the tokenizer, charset converter, and state
    /// machine, delivering merged events to `sink` as they materialize
    /// (§4.4 `decode`).
    pub async fn decode(&self, chunk: &[u8], context: EmissionContext, sink: Arc<dyn Sink>) {
        debug_assert!(
            !self.closed.load(Ordering::SeqCst),
            "decode() called after close()"
        );
        let mut state = self.state.lock().await;
        state.last_sink = Some(Arc::clone(&sink));

        let raw_lines = state.tokenizer.extract(chunk);
        for raw in raw_lines {
            let line = self.shared.charset.convert(&raw);
            self.handle_line(&mut state, sink.as_ref(), line, context.clone())
                .await;
        }
    }

    /// `accept` — the demultiplexed-mode entry point (§4.4, §4.8). The
    /// listener's own `path` becomes the line's [`EmissionContext`].
    pub async fn accept(&self, data: &[u8], path: Option<String>, sink: Arc<dyn Sink>) {
        self.decode(data, EmissionContext { path }, sink).await;
    }

    /// `encode` — pass-through; this codec is decode-oriented (§4.4).
    pub fn encode(&self, _event: MergedEvent) {}

    /// Force emission of the current buffer to `sink` (§4.4 `flush`).
    pub async fn flush(&self, sink: &dyn Sink) {
        let mut state = self.state.lock().await;
        self.attempt_flush(&mut state, sink, None).await;
    }

    /// Flush using the most recently seen decode sink, if any. Invoked
    /// by the auto-flush timer and by the identity map's reaper
    /// fallback chain (§4.5, §4.7).
    pub async fn auto_flush(&self) {
        let mut state = self.state.lock().await;
        if let Some(sink) = state.last_sink.clone() {
            self.attempt_flush(&mut state, sink.as_ref(), None).await;
        }
    }

    /// Terminal flush (§4.4 `close`): stop the timer, drain the
    /// tokenizer's residue as a final line, feed it through the state
    /// machine, then flush. `sink` takes priority; if `None`, the most
    /// recently seen decode sink (if any) is used instead, so that
    /// `IdentityMap::close` — which has no single sink to pass — still
    /// drains every assembler through the sink it was last decoding
    /// through. Only an assembler that was never decoded through any
    /// sink drops its buffer here, a supported lossy outcome per §5 and
    /// DESIGN.md Open Question #2.
    pub async fn close(&self, sink: Option<&dyn Sink>) {
        self.closed.store(true, Ordering::SeqCst);
        self.timer.stop().await;

        let mut state = self.state.lock().await;
        let fallback = state.last_sink.clone();
        let effective: Option<&dyn Sink> = sink.or_else(|| fallback.as_deref());

        let residue = state.tokenizer.flush();
        if !residue.is_empty() {
            let line = self.shared.charset.convert(&residue);
            match effective {
                Some(sink) => {
                    self.handle_line(&mut state, sink, line, state.opened_context.clone())
                        .await;
                }
                None => {
                    // No sink to deliver the final line through; fold it
                    // into the buffer so a subsequent explicit flush
                    // (if any) still sees it, then fall through to the
                    // no-sink flush below.
                    append_line(&mut state, line, state.opened_context.clone());
                }
            }
        }

        if let Some(sink) = effective {
            self.attempt_flush(&mut state, sink, None).await;
        }
        // With no sink at all, any remaining buffer is dropped here —
        // a supported lossy outcome per §5.
    }

    async fn handle_line(
        &self,
        state: &mut State,
        sink: &dyn Sink,
        line: String,
        context: EmissionContext,
    ) {
        let continues = self.shared.matcher.is_match(&line) ^ self.shared.config.negate;

        match self.shared.config.what {
            What::Previous => {
                if !continues {
                    self.attempt_flush(state, sink, None).await;
                }
                append_line(state, line, context);
                if let Some(tag) = check_bounds(state, &self.shared.config) {
                    self.attempt_flush(state, sink, Some(tag)).await;
                }
                if !state.buffer.is_empty() {
                    self.timer.start().await;
                }
            }
            What::Next => {
                append_line(state, line, context);
                if let Some(tag) = check_bounds(state, &self.shared.config) {
                    self.attempt_flush(state, sink, Some(tag)).await;
                }
                if !continues {
                    self.attempt_flush(state, sink, None).await;
                } else if !state.buffer.is_empty() {
                    self.timer.start().await;
                }
            }
        }
    }

    /// Build and deliver the pending merged event, if any. On success
    /// the buffer is cleared and the sequence counter advances; on
    /// failure the buffer (and sequence counter) are left untouched for
    /// a future flush attempt (§4.4 `flush`, §7 `DownstreamError`).
    async fn attempt_flush(&self, state: &mut State, sink: &dyn Sink, bound_tag: Option<&'static str>) -> bool {
        let event = match merge_pending(state, &self.shared.config, bound_tag) {
            Some(event) => event,
            None => return true,
        };

        if let Some(tag) = bound_tag {
            emit!(BoundTriggeredFlush {
                tag,
                line_count: state.buffer.len(),
                byte_count: state.byte_count,
            });
        }

        match sink.process_event(event).await {
            Ok(()) => {
                state.buffer.clear();
                state.byte_count = 0;
                state.opened_context = EmissionContext::default();
                if self.shared.config.sequencer_enabled {
                    state.sequence += 1;
                    if state.sequence >= self.shared.config.sequencer_rollover {
                        state.sequence = self.shared.config.sequencer_start;
                    }
                }
                true
            }
            Err(error) => {
                emit!(DownstreamFlushError {
                    error: error.as_ref(),
                    identity: None,
                });
                false
            }
        }
    }
}

fn append_line(state: &mut State, line: String, context: EmissionContext) {
    if state.buffer.is_empty() {
        state.opened_context = context;
    }
    state.byte_count += line.len() as u64;
    state.buffer.push(line);
}

fn check_bounds(state: &State, config: &Config) -> Option<&'static str> {
    if state.buffer.len() >= config.max_lines {
        Some(MAX_LINES_REACHED_TAG)
    } else if state.byte_count >= config.max_bytes {
        Some(MAX_BYTES_REACHED_TAG)
    } else {
        None
    }
}

/// Build the `MergedEvent` the current buffer would produce, without
/// mutating any state (§4.4 `merge`). Returns `None` for an empty
/// buffer, matching `flush`'s "if buffer is non-empty" contract.
fn merge_pending(state: &State, config: &Config, bound_tag: Option<&'static str>) -> Option<MergedEvent> {
    if state.buffer.is_empty() {
        return None;
    }

    let message = state.buffer.join(&config.delimiter);
    let mut tags = std::collections::BTreeSet::new();
    if state.buffer.len() > 1 && !config.multiline_tag.is_empty() {
        tags.insert(config.multiline_tag.clone());
    }
    if let Some(tag) = bound_tag {
        tags.insert(tag.to_string());
    }

    let sequence_field = if config.sequencer_enabled {
        Some((config.sequencer_field.clone(), state.sequence))
    } else {
        None
    };

    Some(MergedEvent {
        timestamp: Utc::now(),
        message,
        tags,
        sequence_field,
        path: state.opened_context.path.clone(),
    })
}
