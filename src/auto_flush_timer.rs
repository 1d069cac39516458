//! A one-shot quiet-period timer, re-armed by every line arrival (§4.5).
//!
//! Grounded on `tokio::time` (already in the teacher's dependency set)
//! and on the design note's explicit instruction to prefer
//! "cancel + reschedule" over "reset-in-place": a `tokio::task::JoinHandle`
//! naturally gives cancel-vs-reschedule semantics that an in-place timer
//! reset cannot, since `abort()` on a handle whose task has already
//! started running cannot silently no-op the way resetting a shared
//! deadline can.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::AbortHandle;

type FlushAction = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

enum Phase {
    /// No task scheduled, none has ever run.
    Finished,
    /// A task is sleeping out the quiet period.
    Pending(AbortHandle),
    /// The flush callback is currently executing; `abort` cannot safely
    /// interrupt it, so a racing `start()` must wait on this instead.
    Running(Arc<Notify>),
    /// Terminal: `start()` is a permanent no-op.
    Stopped,
}

/// One-shot quiet-period timer (§4.5). When `interval` is `None` this is
/// the spec's `AutoFlushUnset`: `start`/`stop` are no-ops and the timer
/// reports itself as permanently finished and stopped.
pub struct AutoFlushTimer {
    interval: Option<Duration>,
    action: FlushAction,
    phase: Arc<Mutex<Phase>>,
}

impl AutoFlushTimer {
    pub fn new(
        interval: Option<Duration>,
        action: impl Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            interval,
            action: Arc::new(action),
            phase: Arc::new(Mutex::new(Phase::Finished)),
        }
    }

    pub fn is_unset(&self) -> bool {
        self.interval.is_none()
    }

    /// Arm (or re-arm) the timer. No-op if `stop()` was already called,
    /// or if the timer is unset.
    pub async fn start(&self) {
        let interval = match self.interval {
            Some(interval) => interval,
            None => return,
        };

        let mut phase = self.phase.lock().await;
        loop {
            match &*phase {
                Phase::Stopped => return,
                Phase::Pending(abort_handle) => {
                    abort_handle.abort();
                    break;
                }
                Phase::Running(notify) => {
                    let notify = Arc::clone(notify);
                    drop(phase);
                    notify.notified().await;
                    phase = self.phase.lock().await;
                    continue;
                }
                Phase::Finished => break,
            }
        }

        let action = Arc::clone(&self.action);
        let phase_handle = Arc::clone(&self.phase);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;

            // Transition Pending -> Running so a racing `start()` waits
            // for completion instead of aborting mid-flush.
            let notify = Arc::new(Notify::new());
            {
                let mut phase = phase_handle.lock().await;
                *phase = Phase::Running(Arc::clone(&notify));
            }

            (action)().await;

            let mut phase = phase_handle.lock().await;
            if matches!(&*phase, Phase::Running(_)) {
                *phase = Phase::Finished;
            }
            notify.notify_waiters();
        });

        *phase = Phase::Pending(handle.abort_handle());
    }

    /// Latch stopped; cancel the pending task if any. Subsequent
    /// `start()` calls are permanent no-ops.
    pub async fn stop(&self) {
        if self.interval.is_none() {
            return;
        }
        let mut phase = self.phase.lock().await;
        if let Phase::Pending(abort_handle) = &*phase {
            abort_handle.abort();
        }
        *phase = Phase::Stopped;
    }

    #[cfg(test)]
    pub async fn is_pending(&self) -> bool {
        matches!(&*self.phase.lock().await, Phase::Pending(_))
    }

    #[cfg(test)]
    pub async fn is_stopped(&self) -> bool {
        self.interval.is_none() || matches!(&*self.phase.lock().await, Phase::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_quiet_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let timer = AutoFlushTimer::new(
            Some(Duration::from_millis(100)),
            move || {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            },
        );

        timer.start().await;
        assert!(timer.is_pending().await);
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_cancels_the_pending_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let timer = AutoFlushTimer::new(
            Some(Duration::from_millis(100)),
            move || {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            },
        );

        timer.start().await;
        tokio::time::advance(Duration::from_millis(50)).await;
        timer.start().await; // re-arm: cancels the first, schedules a fresh 100ms wait
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "re-arm should have reset the deadline");

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_future_firing() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let timer = AutoFlushTimer::new(
            Some(Duration::from_millis(100)),
            move || {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            },
        );

        timer.start().await;
        timer.stop().await;
        assert!(timer.is_stopped().await);
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        timer.start().await; // no-op once stopped
        assert!(!timer.is_pending().await);
    }

    #[tokio::test]
    async fn unset_timer_is_always_finished_and_stopped() {
        let timer = AutoFlushTimer::new(None, || Box::pin(async {}));
        assert!(timer.is_unset());
        timer.start().await;
        assert!(!timer.is_pending().await);
        assert!(timer.is_stopped().await);
    }
}
