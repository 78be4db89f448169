//! Guard around a push subscription: bounded buffering and a silence watchdog.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;

use chainstream_core::Block;

use crate::error::GuardError;

/// Teardown handle for a push subscription. `cancel` must be idempotent.
pub trait Subscription: Send {
    fn cancel(&mut self);
}

/// Configuration for [`LiveSubscriptionGuard`].
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Blocks buffered ahead of the consumer; overflow drops the oldest.
    pub block_buffer_size: usize,
    /// Max silence before the subscription is declared dead.
    pub watchdog_timeout: Duration,
    /// Pause before resubscribing after a lost subscription.
    pub resubscribe_delay: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            block_buffer_size: 10,
            watchdog_timeout: Duration::from_secs(10),
            resubscribe_delay: Duration::from_secs(1),
        }
    }
}

/// Wraps a head subscription channel with the two failure policies a live
/// feed needs: a bounded drop-oldest buffer (a slow consumer skips ahead
/// instead of stalling the producer) and a watchdog that tears the
/// subscription down after prolonged silence.
///
/// Errors carry [`delivered`](Self::delivered) so the reconnect loop can tell
/// a subscription that never worked (fatal) from one that died mid-flight
/// (reconnect from `last consumed + 1`).
pub struct LiveSubscriptionGuard {
    rx: mpsc::Receiver<Block>,
    subscription: Box<dyn Subscription>,
    buffer: VecDeque<Block>,
    config: GuardConfig,
    delivered: u64,
    dropped: u64,
    cancelled: bool,
}

impl LiveSubscriptionGuard {
    pub fn new(
        rx: mpsc::Receiver<Block>,
        subscription: Box<dyn Subscription>,
        config: GuardConfig,
    ) -> Self {
        Self {
            rx,
            subscription,
            buffer: VecDeque::new(),
            config,
            delivered: 0,
            dropped: 0,
            cancelled: false,
        }
    }

    /// Blocks handed to the consumer so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Blocks discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Move everything already sitting in the channel into the buffer,
    /// discarding the oldest entries beyond the bound.
    fn pump(&mut self) {
        while let Ok(block) = self.rx.try_recv() {
            if self.buffer.len() >= self.config.block_buffer_size {
                if let Some(dropped) = self.buffer.pop_front() {
                    self.dropped += 1;
                    tracing::warn!(
                        number = dropped.number,
                        hash = %dropped.hash,
                        "live buffer full, dropping oldest block"
                    );
                }
            }
            self.buffer.push_back(block);
        }
    }

    /// The next pushed block, oldest buffered first.
    ///
    /// Waits up to the watchdog timeout when nothing is buffered; on timeout
    /// or channel close the subscription is torn down and the error returned.
    pub async fn recv(&mut self) -> Result<Block, GuardError> {
        self.pump();
        if let Some(block) = self.buffer.pop_front() {
            self.delivered += 1;
            return Ok(block);
        }
        match tokio::time::timeout(self.config.watchdog_timeout, self.rx.recv()).await {
            Ok(Some(block)) => {
                self.delivered += 1;
                Ok(block)
            }
            Ok(None) => {
                self.teardown();
                Err(GuardError::Disconnected { delivered: self.delivered })
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.watchdog_timeout.as_millis() as u64,
                    delivered = self.delivered,
                    "head subscription went silent, tearing down"
                );
                self.teardown();
                Err(GuardError::Stalled {
                    timeout_ms: self.config.watchdog_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Tear the subscription down. Safe to call more than once.
    pub fn cancel(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.subscription.cancel();
        }
    }
}

impl Drop for LiveSubscriptionGuard {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ─── ResilientSubscription ────────────────────────────────────────────────────

/// The reconnect loop around [`LiveSubscriptionGuard`].
///
/// Owns a subscribe factory that is handed the height to resume from. A
/// subscription lost before it ever delivered a block is propagated as fatal
/// (the endpoint is presumed broken); one lost mid-flight is logged, waited
/// out for [`GuardConfig::resubscribe_delay`], and re-established from
/// `last consumed + 1`.
pub struct ResilientSubscription<F> {
    subscribe: F,
    config: GuardConfig,
    guard: Option<LiveSubscriptionGuard>,
    /// Height the next subscription resumes from.
    next: u64,
    delivered_any: bool,
}

impl<F, Fut> ResilientSubscription<F>
where
    F: FnMut(u64) -> Fut,
    Fut: std::future::Future<
        Output = Result<(mpsc::Receiver<Block>, Box<dyn Subscription>), GuardError>,
    >,
{
    pub fn new(subscribe: F, from: u64, config: GuardConfig) -> Self {
        Self {
            subscribe,
            config,
            guard: None,
            next: from,
            delivered_any: false,
        }
    }

    /// The next pushed block, resubscribing through losses as configured.
    pub async fn recv(&mut self) -> Result<Block, GuardError> {
        loop {
            if self.guard.is_none() {
                match (self.subscribe)(self.next).await {
                    Ok((rx, subscription)) => {
                        self.guard = Some(LiveSubscriptionGuard::new(
                            rx,
                            subscription,
                            self.config.clone(),
                        ));
                    }
                    Err(e) if self.delivered_any => {
                        tracing::warn!(error = %e, from = self.next, "resubscribe failed, retrying");
                        tokio::time::sleep(self.config.resubscribe_delay).await;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            let Some(guard) = self.guard.as_mut() else {
                continue;
            };
            match guard.recv().await {
                Ok(block) => {
                    self.delivered_any = true;
                    self.next = block.number + 1;
                    return Ok(block);
                }
                Err(e) => {
                    // recv already tore the subscription down.
                    self.guard = None;
                    if !self.delivered_any {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, from = self.next, "subscription lost, resubscribing");
                    tokio::time::sleep(self.config.resubscribe_delay).await;
                }
            }
        }
    }

    /// Tear down the current subscription, if any.
    pub fn cancel(&mut self) {
        if let Some(guard) = &mut self.guard {
            guard.cancel();
        }
        self.guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn block(number: u64) -> Block {
        Block {
            number,
            hash: format!("0x{number}"),
            parent_number: number.saturating_sub(1),
            parent_hash: format!("0x{}", number.saturating_sub(1)),
            timestamp: None,
            payload: Value::Null,
        }
    }

    struct MockSub(Arc<AtomicBool>);

    impl Subscription for MockSub {
        fn cancel(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn guard(buffer: usize) -> (mpsc::Sender<Block>, LiveSubscriptionGuard, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(64);
        let cancelled = Arc::new(AtomicBool::new(false));
        let guard = LiveSubscriptionGuard::new(
            rx,
            Box::new(MockSub(cancelled.clone())),
            GuardConfig {
                block_buffer_size: buffer,
                watchdog_timeout: Duration::from_secs(10),
                ..GuardConfig::default()
            },
        );
        (tx, guard, cancelled)
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_keeps_newest() {
        // Buffer of 3, five arrivals before the consumer reads anything.
        let (tx, mut guard, _) = guard(3);
        for n in 1..=5 {
            tx.send(block(n)).await.unwrap();
        }
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(guard.recv().await.unwrap().number);
        }
        assert_eq!(got, vec![3, 4, 5]);
        assert_eq!(guard.dropped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_fires_on_silence_and_tears_down() {
        let (_tx, mut guard, cancelled) = guard(10);
        match guard.recv().await {
            Err(GuardError::Stalled { timeout_ms }) => assert_eq!(timeout_ms, 10_000),
            other => panic!("expected watchdog, got {other:?}"),
        }
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn disconnect_reports_delivered_count() {
        let (tx, mut guard, _) = guard(10);
        tx.send(block(1)).await.unwrap();
        tx.send(block(2)).await.unwrap();
        drop(tx);

        assert_eq!(guard.recv().await.unwrap().number, 1);
        assert_eq!(guard.recv().await.unwrap().number, 2);
        match guard.recv().await {
            Err(GuardError::Disconnected { delivered }) => assert_eq!(delivered, 2),
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_before_first_block_is_distinguishable() {
        let (tx, mut guard, _) = guard(10);
        drop(tx);
        match guard.recv().await {
            Err(GuardError::Disconnected { delivered }) => assert_eq!(delivered, 0),
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drop_cancels_the_subscription() {
        let (_tx, guard, cancelled) = guard(10);
        drop(guard);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn zero_sized_buffer_stays_bounded() {
        let (tx, mut guard, _) = guard(0);
        for n in 1..=4 {
            tx.send(block(n)).await.unwrap();
        }
        // Only the newest survives; everything older was dropped.
        assert_eq!(guard.recv().await.unwrap().number, 4);
        assert_eq!(guard.dropped(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn resilient_subscription_resumes_after_loss() {
        let resumed_from: Arc<std::sync::Mutex<Vec<u64>>> = Arc::default();
        let keep_alive: Arc<std::sync::Mutex<Vec<mpsc::Sender<Block>>>> = Arc::default();

        let froms = resumed_from.clone();
        let keep = keep_alive.clone();
        let subscribe = move |from: u64| {
            let froms = froms.clone();
            let keep = keep.clone();
            async move {
                let attempt = {
                    let mut froms = froms.lock().unwrap();
                    froms.push(from);
                    froms.len()
                };
                let (tx, rx) = mpsc::channel(8);
                if attempt == 1 {
                    // Delivers two blocks, then the connection dies.
                    tx.send(block(1)).await.unwrap();
                    tx.send(block(2)).await.unwrap();
                } else {
                    tx.send(block(from)).await.unwrap();
                    keep.lock().unwrap().push(tx);
                }
                let sub = MockSub(Arc::new(AtomicBool::new(false)));
                Ok::<_, GuardError>((rx, Box::new(sub) as Box<dyn Subscription>))
            }
        };

        let mut feed = ResilientSubscription::new(subscribe, 1, GuardConfig::default());
        assert_eq!(feed.recv().await.unwrap().number, 1);
        assert_eq!(feed.recv().await.unwrap().number, 2);
        // The first channel is gone now; the loop resubscribes from 3.
        assert_eq!(feed.recv().await.unwrap().number, 3);
        assert_eq!(*resumed_from.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn resilient_subscription_fatal_before_first_block() {
        let attempts = Arc::new(std::sync::Mutex::new(0u32));
        let counter = attempts.clone();
        let subscribe = move |_from: u64| {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
                let (tx, rx) = mpsc::channel::<Block>(8);
                drop(tx); // dies without ever delivering
                let sub = MockSub(Arc::new(AtomicBool::new(false)));
                Ok::<_, GuardError>((rx, Box::new(sub) as Box<dyn Subscription>))
            }
        };

        let mut feed = ResilientSubscription::new(subscribe, 1, GuardConfig::default());
        match feed.recv().await {
            Err(GuardError::Disconnected { delivered: 0 }) => {}
            other => panic!("expected fatal disconnect, got {other:?}"),
        }
        // No retry happened.
        assert_eq!(*attempts.lock().unwrap(), 1);
    }
}
