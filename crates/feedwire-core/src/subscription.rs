//! Cancellable polling subscriptions
//!
//! Every periodic activity (feed polling, live chapter reads, pull/push
//! loops) runs as a tokio task owned by a [`Subscription`]. Cancelling is
//! synchronous: once [`Subscription::cancel`] returns, no callback of that
//! subscription runs again. Restarting means creating a new subscription.
//!
//! Callbacks are delivered while holding the subscription's gate, and
//! `cancel` takes the same gate, so a cancel racing with a delivery waits
//! for the delivery to finish. The gate is reentrant, which lets a callback
//! cancel its own subscription.
//!
//! Callbacks must not block on locks that the cancelling side may hold
//! while calling `cancel`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::{FeedwireError, FeedwireResult};

/// One step of a polling loop.
#[async_trait]
pub trait Poller: Send + 'static {
    type Item: Send + 'static;

    /// Fetch once; `Ok(None)` means nothing new to deliver.
    async fn poll(&mut self) -> FeedwireResult<Option<Self::Item>>;
}

/// Delivery gate shared by a subscription and its task.
#[derive(Default)]
pub struct CancelGate {
    cancelled: AtomicBool,
    lock: ReentrantMutex<()>,
}

impl CancelGate {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run `f` unless cancelled, holding the gate for its duration.
    pub fn deliver<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _guard = self.lock.lock();
        if self.is_cancelled() {
            return None;
        }
        Some(f())
    }

    fn cancel(&self) {
        let _guard = self.lock.lock();
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Handle to a running background task with immediate cancellation.
///
/// Dropping the handle cancels the task.
pub struct Subscription {
    gate: Arc<CancelGate>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Spawn `run` on the tokio runtime, handing it the delivery gate.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(Arc<CancelGate>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let gate = Arc::new(CancelGate::default());
        let task = tokio::spawn(run(gate.clone()));
        Self {
            gate,
            task: Mutex::new(Some(task)),
        }
    }

    /// Poll every `interval` (first poll immediately), delivering items to
    /// `on_next`. The first error is delivered to `on_error` and ends the
    /// subscription; there is no automatic retry.
    pub fn poll<P, N, E>(interval: Duration, mut poller: P, mut on_next: N, mut on_error: E) -> Self
    where
        P: Poller,
        N: FnMut(P::Item) + Send + 'static,
        E: FnMut(Arc<FeedwireError>) + Send + 'static,
    {
        Self::spawn(move |gate| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if gate.is_cancelled() {
                    break;
                }
                match poller.poll().await {
                    Ok(Some(item)) => {
                        gate.deliver(|| on_next(item));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        debug!(error = %err, "Subscription ended with error");
                        let err = Arc::new(err);
                        gate.deliver(|| on_error(err));
                        break;
                    }
                }
            }
        })
    }

    /// Run `tick` every `interval` until cancelled. The first tick fires
    /// after one full period.
    ///
    /// Each tick gets the delivery gate. A tick in flight when the
    /// subscription is cancelled is dropped at its next await, and any state
    /// it publishes through [`CancelGate::deliver`] is skipped once cancel
    /// has returned.
    pub fn interval<F, Fut>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut(Arc<CancelGate>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(move |gate| async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if gate.is_cancelled() {
                    break;
                }
                tick(gate.clone()).await;
            }
        })
    }

    /// Stop the subscription. No callback fires after this returns.
    pub fn cancel(&self) {
        self.gate.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        n: usize,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl Poller for Counter {
        type Item = usize;

        async fn poll(&mut self) -> FeedwireResult<Option<usize>> {
            self.n += 1;
            if Some(self.n) == self.fail_at {
                return Err(FeedwireError::Store("boom".into()));
            }
            // Only even ticks produce a value
            Ok((self.n % 2 == 0).then_some(self.n))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_delivers_values() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = Subscription::poll(
            Duration::from_secs(1),
            Counter { n: 0, fail_at: None },
            move |v| sink.lock().push(v),
            |_| {},
        );

        tokio::time::sleep(Duration::from_millis(4500)).await;
        sub.cancel();
        assert_eq!(*seen.lock(), vec![2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delivery_after_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        let sub = Subscription::poll(
            Duration::from_secs(1),
            Counter { n: 1, fail_at: None },
            move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        sub.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
        assert!(sub.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_ends_subscription() {
        let errors = Arc::new(AtomicUsize::new(0));
        let values = Arc::new(AtomicUsize::new(0));
        let (e, v) = (errors.clone(), values.clone());
        let _sub = Subscription::poll(
            Duration::from_secs(1),
            Counter { n: 0, fail_at: Some(3) },
            move |_| {
                v.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(values.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_can_cancel_itself() {
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));
        let (s, c) = (slot.clone(), count.clone());

        let sub = Subscription::poll(
            Duration::from_secs(1),
            Counter { n: 1, fail_at: None },
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                let taken = s.lock().take();
                if let Some(sub) = taken {
                    sub.cancel();
                }
            },
            |_| {},
        );
        *slot.lock() = Some(sub);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_skips_immediate_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::interval(Duration::from_secs(2), move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        drop(sub);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_drops_tick_in_flight() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f) = (started.clone(), finished.clone());
        let sub = Subscription::interval(Duration::from_secs(1), move |gate| {
            let (s, f) = (s.clone(), f.clone());
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                gate.deliver(|| f.fetch_add(1, Ordering::SeqCst));
            }
        });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        sub.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
