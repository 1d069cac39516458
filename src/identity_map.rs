//! Identity-keyed demultiplexer (§4.6) with a background reaper
//! (§4.7, [`crate::map_cleaner::MapCleaner`]).
//!
//! Grounded on `dashmap::DashMap`, the same "key → mutable per-key
//! expiring state, many concurrent readers" shape the teacher's
//! `lib/tracing-limit` uses for `RateLimitedLayer.events:
//! DashMap<RateKeyIdentifier, State>`. `DashMap::retain` gives the
//! reaper an atomic delete-and-collect sweep the way that crate uses it
//! to expire rate-limit windows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::assembler::Assembler;
use crate::config::{Config, IdentityMapConfig};
use crate::error::ConfigError;
use crate::internal_events::{emit, CapacityExceededError, CapacityWarning, IdentityEvicted};
use crate::listener::{EmissionContext, Sink};
use crate::error::CapacityExceeded;
use crate::map_cleaner::MapCleaner;

struct Entry {
    assembler: Arc<Assembler>,
    eviction_deadline: Instant,
}

/// Routes `decode`/`accept` calls to a per-identity [`Assembler`]
/// clone, enforcing a capacity limit and reaping idle identities in the
/// background (§4.6, §4.7).
pub struct IdentityMap {
    /// Routed to when `identity` is `None` — shared, never cloned,
    /// never subject to capacity accounting or eviction.
    base: Arc<Assembler>,
    entries: DashMap<String, Entry>,
    map_config: IdentityMapConfig,
    /// Serializes the check-capacity-then-insert sequence on a miss, so
    /// two concurrent first-time accesses to distinct identities can't
    /// both pass a capacity check that only one of them should. Hits
    /// (the common case) never take this lock.
    insert_guard: AsyncMutex<()>,
    warned_near_capacity: AtomicBool,
    cleaner: MapCleaner,
}

impl IdentityMap {
    /// §4.6 `register`: compiles the shared per-identity template
    /// configuration once; each identity's assembler is a cheap clone
    /// of it (see [`Assembler::spawn_instance`]).
    pub fn register(config: Config, map_config: IdentityMapConfig) -> Result<Arc<Self>, ConfigError> {
        let base = Assembler::register(config)?;
        let cleaner_interval = map_config.cleaner_interval;

        Ok(Arc::new_cyclic(|weak: &Weak<IdentityMap>| {
            let weak_for_cleaner = Weak::clone(weak);
            let cleaner = MapCleaner::new(cleaner_interval, move || {
                let weak = Weak::clone(&weak_for_cleaner);
                Box::pin(async move {
                    if let Some(map) = weak.upgrade() {
                        map.sweep().await;
                    }
                })
            });

            IdentityMap {
                base,
                entries: DashMap::new(),
                map_config,
                insert_guard: AsyncMutex::new(()),
                warned_near_capacity: AtomicBool::new(false),
                cleaner,
            }
        }))
    }

    /// Starts the background reaper. Idempotent — safe to call on every
    /// routed access (§4.7).
    pub async fn start_cleaner(&self) {
        self.cleaner.start().await;
    }

    pub fn identity_count(&self) -> usize {
        self.entries.len()
    }

    /// §4.6 routing: resolve `identity` to its assembler, cloning the
    /// base template on first sight and refreshing the eviction
    /// deadline on every hit. `None` always routes to the shared base
    /// assembler, bypassing capacity accounting entirely.
    async fn route(&self, identity: Option<&str>) -> Result<Arc<Assembler>, CapacityExceeded> {
        let identity = match identity {
            None => return Ok(Arc::clone(&self.base)),
            Some(identity) => identity,
        };

        if let Some(mut entry) = self.entries.get_mut(identity) {
            entry.eviction_deadline = Instant::now() + self.map_config.evict_timeout;
            return Ok(Arc::clone(&entry.assembler));
        }

        let _guard = self.insert_guard.lock().await;
        // Re-check: another task may have inserted this identity (or
        // freed capacity via a sweep) while we waited for the guard.
        if let Some(mut entry) = self.entries.get_mut(identity) {
            entry.eviction_deadline = Instant::now() + self.map_config.evict_timeout;
            return Ok(Arc::clone(&entry.assembler));
        }

        self.ensure_capacity_for_insert().await?;

        let assembler = self.base.spawn_instance();
        self.entries.insert(
            identity.to_string(),
            Entry {
                assembler: Arc::clone(&assembler),
                eviction_deadline: Instant::now() + self.map_config.evict_timeout,
            },
        );
        Ok(assembler)
    }

    /// §4.6 capacity protocol: if at capacity, trigger an immediate
    /// sweep before giving up; otherwise, cross (or un-cross) the 80%
    /// warning threshold, logging only on the crossing.
    async fn ensure_capacity_for_insert(&self) -> Result<(), CapacityExceeded> {
        let max = self.map_config.max_identities;

        if self.entries.len() >= max {
            self.sweep().await;
            if self.entries.len() >= max {
                let size = self.entries.len();
                emit!(CapacityExceededError {
                    size,
                    max_identities: max,
                });
                return Err(CapacityExceeded {
                    size,
                    max_identities: max,
                });
            }
        }

        let size = self.entries.len() + 1; // accounting for the insert about to happen
        if max > 0 && size * 10 >= max * 8 {
            if !self.warned_near_capacity.swap(true, Ordering::SeqCst) {
                emit!(CapacityWarning {
                    size,
                    max_identities: max,
                });
            }
        } else {
            self.warned_near_capacity.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// §4.7: delete every identity past its eviction deadline, flushing
    /// each through its own last-seen sink before dropping it. Also the
    /// manually-triggered "cleanup" step of the capacity protocol.
    async fn sweep(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.entries.retain(|identity, entry| {
            let alive = entry.eviction_deadline > now;
            if !alive {
                expired.push((identity.clone(), Arc::clone(&entry.assembler)));
            }
            alive
        });

        for (identity, assembler) in expired {
            emit!(IdentityEvicted { identity: &identity });
            assembler.auto_flush().await;
        }
    }

    /// §4.6 `evict`: idempotent removal of a single identity, flushing
    /// its pending buffer through its own last-seen sink first.
    pub async fn evict(&self, identity: &str) {
        if let Some((_, entry)) = self.entries.remove(identity) {
            emit!(IdentityEvicted { identity });
            entry.assembler.auto_flush().await;
        }
    }

    /// §4.6/§4.8 `decode`, routed by identity.
    pub async fn decode(
        &self,
        identity: Option<&str>,
        chunk: &[u8],
        context: EmissionContext,
        sink: Arc<dyn Sink>,
    ) -> Result<(), CapacityExceeded> {
        let assembler = self.route(identity).await?;
        assembler.decode(chunk, context, sink).await;
        Ok(())
    }

    /// §4.6/§4.8 `accept`, routed by identity.
    pub async fn accept(
        &self,
        identity: Option<&str>,
        data: &[u8],
        path: Option<String>,
        sink: Arc<dyn Sink>,
    ) -> Result<(), CapacityExceeded> {
        let assembler = self.route(identity).await?;
        assembler.accept(data, path, sink).await;
        Ok(())
    }

    /// §4.6 `flush`: broadcast to every assembler. With a sink supplied,
    /// every identity (and the base assembler) flushes through it; with
    /// none, each assembler flushes through its own last-seen decode
    /// sink instead — the only sink-less flush this crate supports, and
    /// it is what "auto-flush-capable" collapses to once every assembler
    /// already remembers its last sink (see DESIGN.md).
    pub async fn flush(&self, sink: Option<&dyn Sink>) {
        let assemblers = self.snapshot_assemblers();
        match sink {
            Some(sink) => {
                self.base.flush(sink).await;
                for assembler in assemblers {
                    assembler.flush(sink).await;
                }
            }
            None => {
                self.base.auto_flush().await;
                for assembler in assemblers {
                    assembler.auto_flush().await;
                }
            }
        }
    }

    /// §4.6 `flush`, rebinding each identity's path for the duration of
    /// its own flush. Per-identity sink errors are already swallowed (and
    /// logged) inside [`Assembler::attempt_flush`]; nothing here can fail.
    pub async fn flush_mapped(&self, sink: &dyn Sink) {
        let entries: Vec<(String, Arc<Assembler>)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.assembler)))
            .collect();

        for (identity, assembler) in entries {
            let rebind = RebindPathSink {
                inner: sink,
                path: identity,
            };
            assembler.flush(&rebind).await;
        }
    }

    /// §4.6 `close`: stop the reaper, then close every assembler
    /// (including the base). Each closes through its own last-seen
    /// sink, per [`Assembler::close`].
    pub async fn close(&self) {
        self.cleaner.stop().await;
        self.base.close(None).await;
        for assembler in self.snapshot_assemblers() {
            assembler.close(None).await;
        }
    }

    /// Collect the current assemblers into a plain `Vec` before any
    /// `await`, so a broadcast operation never holds a `DashMap` shard
    /// guard across a (potentially slow) sink call.
    fn snapshot_assemblers(&self) -> Vec<Arc<Assembler>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(&entry.assembler))
            .collect()
    }
}

struct RebindPathSink<'a> {
    inner: &'a dyn Sink,
    path: String,
}

#[async_trait::async_trait]
impl Sink for RebindPathSink<'_> {
    async fn process_event(
        &self,
        mut event: crate::event::MergedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        event.path = Some(self.path.clone());
        self.inner.process_event(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::What;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::Mutex as StdAsyncMutex;

    struct VecSink(Arc<StdAsyncMutex<Vec<crate::event::MergedEvent>>>);

    #[async_trait::async_trait]
    impl Sink for VecSink {
        async fn process_event(
            &self,
            event: crate::event::MergedEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.lock().await.push(event);
            Ok(())
        }
    }

    fn vec_sink() -> (Arc<dyn Sink>, Arc<StdAsyncMutex<Vec<crate::event::MergedEvent>>>) {
        let events = Arc::new(StdAsyncMutex::new(Vec::new()));
        let sink: Arc<dyn Sink> = Arc::new(VecSink(Arc::clone(&events)));
        (sink, events)
    }

    fn base_config() -> Config {
        Config {
            pattern: r"^\s".to_string(),
            what: What::Previous,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn s5_distinct_identities_do_not_cross_pollinate() {
        let map = IdentityMap::register(
            base_config(),
            IdentityMapConfig {
                max_identities: 10,
                ..IdentityMapConfig::default()
            },
        )
        .unwrap();
        let (sink, events) = vec_sink();

        map.decode(Some("a"), b"alpha one\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();
        map.decode(Some("b"), b"beta one\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();
        map.decode(
            Some("a"),
            b"   alpha continuation\n",
            EmissionContext::default(),
            Arc::clone(&sink),
        )
        .await
        .unwrap();

        map.flush(Some(sink.as_ref())).await;

        let mut messages: Vec<String> = events.lock().await.iter().map(|e| e.message.clone()).collect();
        messages.sort();
        assert_eq!(messages, vec!["alpha one\n   alpha continuation", "beta one"]);
    }

    #[tokio::test]
    async fn capacity_exceeded_when_cleanup_frees_no_slots() {
        let map = IdentityMap::register(
            base_config(),
            IdentityMapConfig {
                max_identities: 2,
                evict_timeout: Duration::from_secs(3600),
                cleaner_interval: Duration::from_secs(300),
            },
        )
        .unwrap();
        let (sink, _events) = vec_sink();

        map.decode(Some("a"), b"a\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();
        map.decode(Some("b"), b"b\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();

        let result = map
            .decode(Some("c"), b"c\n", EmissionContext::default(), Arc::clone(&sink))
            .await;
        assert!(result.is_err());
        assert_eq!(map.identity_count(), 2);
    }

    /// §8 S6, literal: `max_identities=2`, `evict_timeout=1s`. Feed `A`;
    /// sleep 1.2s (past `A`'s deadline, but no periodic cleaner is
    /// running); feed `B` (now at capacity); feed `C`, which must not
    /// raise because `ensure_capacity_for_insert`'s own cleanup sweep —
    /// triggered by the capacity check itself, not the background
    /// reaper — evicts the stale `A` and frees a slot.
    #[tokio::test(start_paused = true)]
    async fn s6_stale_entry_freed_by_capacity_triggered_cleanup() {
        let map = IdentityMap::register(
            base_config(),
            IdentityMapConfig {
                max_identities: 2,
                evict_timeout: Duration::from_secs(1),
                cleaner_interval: Duration::from_secs(300),
            },
        )
        .unwrap();
        let (sink, _events) = vec_sink();

        map.decode(Some("a"), b"a\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1200)).await;

        map.decode(Some("b"), b"b\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();

        let result = map
            .decode(Some("c"), b"c\n", EmissionContext::default(), Arc::clone(&sink))
            .await;
        assert!(result.is_ok(), "C must not raise: A was evicted by cleanup");
        assert_eq!(map.identity_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_identity_is_reaped_and_flushed() {
        let map = IdentityMap::register(
            base_config(),
            IdentityMapConfig {
                max_identities: 10,
                evict_timeout: Duration::from_millis(100),
                cleaner_interval: Duration::from_millis(50),
            },
        )
        .unwrap();
        let (sink, events) = vec_sink();

        map.decode(Some("a"), b"alpha one\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();
        map.start_cleaner().await;

        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(map.identity_count(), 0);
        let events = events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "alpha one");
    }

    #[tokio::test]
    async fn evict_is_idempotent() {
        let map = IdentityMap::register(base_config(), IdentityMapConfig::default()).unwrap();
        let (sink, _events) = vec_sink();
        map.decode(Some("a"), b"a\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();

        map.evict("a").await;
        assert_eq!(map.identity_count(), 0);
        map.evict("a").await; // no-op, must not panic
    }

    #[tokio::test]
    async fn flush_mapped_rebinds_path_per_identity() {
        let map = IdentityMap::register(base_config(), IdentityMapConfig::default()).unwrap();
        let (sink, events) = vec_sink();

        map.decode(Some("host-a"), b"line one\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();
        map.decode(Some("host-b"), b"line two\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();

        map.flush_mapped(sink.as_ref()).await;

        let events = events.lock().await;
        let mut paths: Vec<Option<String>> = events.iter().map(|e| e.path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec![Some("host-a".to_string()), Some("host-b".to_string())]);
    }

    #[tokio::test]
    async fn nil_identity_routes_to_shared_base() {
        let map = IdentityMap::register(base_config(), IdentityMapConfig::default()).unwrap();
        let (sink, events) = vec_sink();

        map.decode(None, b"hello\n", EmissionContext::default(), Arc::clone(&sink))
            .await
            .unwrap();
        map.flush(Some(sink.as_ref())).await;

        assert_eq!(map.identity_count(), 0);
        assert_eq!(events.lock().await.len(), 1);
    }
}
