//! Periodic background reaper (§4.7).
//!
//! A single recurring task, parallel in shape to
//! [`crate::auto_flush_timer::AutoFlushTimer`] but looping instead of
//! one-shot: `start()` is idempotent (callable on every routed access
//! at no cost, per spec), and `stop()` clears a running latch and wakes
//! the task so shutdown doesn't wait out a full `cleaner_interval`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type SweepAction = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Runs `action` every `interval` until stopped.
pub struct MapCleaner {
    interval: Duration,
    action: SweepAction,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MapCleaner {
    pub fn new(
        interval: Duration,
        action: impl Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            interval,
            action: Arc::new(action),
            handle: Mutex::new(None),
        }
    }

    /// Idempotent: a second `start()` while already running is a no-op.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        let interval = self.interval;
        let action = Arc::clone(&self.action);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                (action)().await;
            }
        }));
    }

    /// Stop the loop. Safe to call even if never started.
    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_every_interval_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let cleaner = MapCleaner::new(Duration::from_millis(100), move || {
            let count = Arc::clone(&count2);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        cleaner.start().await;
        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_further_sweeps() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let cleaner = MapCleaner::new(Duration::from_millis(100), move || {
            let count = Arc::clone(&count2);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        cleaner.start().await;
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        cleaner.stop().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let cleaner = MapCleaner::new(Duration::from_secs(1), || Box::pin(async {}));
        cleaner.start().await;
        assert!(cleaner.is_running().await);
        cleaner.start().await;
        assert!(cleaner.is_running().await);
    }
}
