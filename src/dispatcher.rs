use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::DispatcherConfig;
use crate::delivery::Delivery;
use crate::engine::EngineError;
use crate::model::{LockLease, Ms};
use crate::observability;
use crate::store::{LockStore, OutboxStore};

pub const DISPATCH_LOCK: &str = "outbox-dispatch";

/// Renew the lease after this many deliveries so a long batch outlives the TTL.
const RENEW_EVERY: usize = 16;

/// Delay before the first redelivery attempt; doubles per attempt.
const BACKOFF_BASE_MS: Ms = 30_000;
const BACKOFF_MAX_MS: Ms = 3_600_000;

/// What one dispatch cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Periodic job draining the outbox: claims pending messages under the
/// dispatch lock and delivers them, with retry/backoff and dead-lettering.
/// A delivery failure never touches the business transaction that enqueued
/// the message and never aborts the batch.
pub struct Dispatcher {
    outbox: Arc<dyn OutboxStore>,
    locks: Arc<dyn LockStore>,
    delivery: Arc<dyn Delivery>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        locks: Arc<dyn LockStore>,
        delivery: Arc<dyn Delivery>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self { outbox, locks, delivery, clock, config }
    }

    /// Exponential backoff gated by the attempt count, capped.
    pub fn backoff_delay(attempts: u32) -> Ms {
        let shift = attempts.min(16);
        BACKOFF_BASE_MS.saturating_mul(1_i64 << shift).min(BACKOFF_MAX_MS)
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            match self.run_cycle().await {
                Ok(stats) if stats.claimed > 0 => debug!(?stats, "dispatch cycle"),
                Ok(_) => {}
                Err(e) => warn!("dispatch cycle failed: {e}"),
            }
        }
        debug!("outbox dispatcher stopped");
    }

    /// One cycle: take the dispatch lock, drain one claimed batch, release.
    /// A busy lock means another instance is dispatching — skip, not an error.
    pub async fn run_cycle(&self) -> Result<DispatchStats, EngineError> {
        let now = self.clock.now_ms();
        let Some(lease) = self.locks.try_acquire(DISPATCH_LOCK, self.config.lock_ttl, now).await? else {
            metrics::counter!(observability::LOCK_BUSY_TOTAL).increment(1);
            debug!("dispatch lock busy, skipping cycle");
            return Ok(DispatchStats::default());
        };
        let started = std::time::Instant::now();
        let result = self.drain_batch(&lease).await;
        metrics::histogram!(observability::DISPATCH_CYCLE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        self.locks.release(&lease).await?;
        result
    }

    async fn drain_batch(&self, lease: &LockLease) -> Result<DispatchStats, EngineError> {
        let now = self.clock.now_ms();
        let batch = self
            .outbox
            .claim_batch(self.config.batch_size, self.config.lock_ttl, now)
            .await?;
        let mut stats = DispatchStats { claimed: batch.len(), ..Default::default() };

        for (i, msg) in batch.iter().enumerate() {
            if i > 0 && i % RENEW_EVERY == 0 {
                let now = self.clock.now_ms();
                if !self.locks.renew(lease, self.config.lock_ttl, now).await? {
                    // The lease is gone: stop writing. Messages left in
                    // Processing come back through the stale-claim path.
                    warn!("dispatch lease lost mid-batch, aborting cycle");
                    return Err(EngineError::LockLost);
                }
            }

            match self.delivery.send(msg).await {
                Ok(()) => {
                    self.outbox.mark_sent(msg.id, self.clock.now_ms()).await?;
                    metrics::counter!(observability::OUTBOX_SENT_TOTAL).increment(1);
                    stats.sent += 1;
                }
                Err(e) => {
                    let now = self.clock.now_ms();
                    if msg.attempts + 1 >= self.config.max_attempts {
                        warn!(id = %msg.id, attempts = msg.attempts + 1, "delivery exhausted, dead-lettering: {e}");
                        self.outbox.mark_failed(msg.id, e.to_string(), None).await?;
                        metrics::counter!(observability::OUTBOX_DEAD_LETTERED_TOTAL).increment(1);
                        stats.dead_lettered += 1;
                    } else {
                        let retry_at = now + Self::backoff_delay(msg.attempts);
                        debug!(id = %msg.id, retry_at, "delivery failed, will retry: {e}");
                        self.outbox.mark_failed(msg.id, e.to_string(), Some(retry_at)).await?;
                        metrics::counter!(observability::OUTBOX_RETRIED_TOTAL).increment(1);
                        stats.retried += 1;
                    }
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use ulid::Ulid;

    use crate::clock::ManualClock;
    use crate::delivery::DeliveryError;
    use crate::model::*;
    use crate::store::{LockStore, MemoryStore, OutboxStore, ReservationStore};

    use super::*;

    const H: Ms = 3_600_000;

    struct RecordingDelivery {
        sent: Mutex<Vec<Ulid>>,
    }

    impl RecordingDelivery {
        fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()) }
        }

        fn ids(&self) -> Vec<Ulid> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        async fn send(&self, msg: &OutboxMessage) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(msg.id);
            Ok(())
        }
    }

    /// Fails the first `failures` sends, then succeeds.
    struct FlakyDelivery {
        failures: AtomicU32,
    }

    impl FlakyDelivery {
        fn failing(failures: u32) -> Self {
            Self { failures: AtomicU32::new(failures) }
        }
    }

    #[async_trait]
    impl Delivery for FlakyDelivery {
        async fn send(&self, _msg: &OutboxMessage) -> Result<(), DeliveryError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(DeliveryError("smtp unavailable".into()));
            }
            Ok(())
        }
    }

    fn config(max_attempts: u32) -> DispatcherConfig {
        DispatcherConfig {
            interval: Duration::from_millis(10),
            batch_size: 50,
            max_attempts,
            lock_ttl: 30_000,
        }
    }

    fn reservation(start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            location_id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(start, end),
            status: ReservationStatus::Reserved,
            check_in_at: None,
            check_out_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            extension_count: 0,
            created_at: start,
            updated_at: start,
        }
    }

    async fn seed(store: &MemoryStore, n: usize, now: Ms) -> Vec<Ulid> {
        let mut ids = Vec::new();
        for i in 0..n {
            let r = reservation(10 * H + (i as Ms) * H, 11 * H + (i as Ms) * H);
            let m = OutboxMessage::new(
                &ReservationEvent::Created { reservation: r.clone() },
                now + i as Ms,
            );
            ids.push(m.id);
            store.insert_new(r, m).await.unwrap();
        }
        ids
    }

    fn dispatcher(
        store: &Arc<MemoryStore>,
        delivery: Arc<dyn Delivery>,
        clock: &Arc<ManualClock>,
        max_attempts: u32,
    ) -> Dispatcher {
        Dispatcher::new(store.clone(), store.clone(), delivery, clock.clone(), config(max_attempts))
    }

    #[tokio::test]
    async fn delivers_pending_in_order() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let recording = Arc::new(RecordingDelivery::new());
        let ids = seed(&store, 3, 500).await;

        let d = dispatcher(&store, recording.clone(), &clock, 5);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats, DispatchStats { claimed: 3, sent: 3, retried: 0, dead_lettered: 0 });
        assert_eq!(recording.ids(), ids);

        let sent = store.list_messages(Some(OutboxStatus::Sent)).await.unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m.processed_at == Some(1_000)));
    }

    #[tokio::test]
    async fn sent_is_never_redelivered() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let recording = Arc::new(RecordingDelivery::new());
        seed(&store, 1, 500).await;

        let d = dispatcher(&store, recording.clone(), &clock, 5);
        d.run_cycle().await.unwrap();
        clock.advance(10 * H);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.claimed, 0);
        assert_eq!(recording.ids().len(), 1);
    }

    #[tokio::test]
    async fn failure_retries_with_backoff() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let ids = seed(&store, 1, 500).await;

        let d = dispatcher(&store, Arc::new(FlakyDelivery::failing(1)), &clock, 5);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.retried, 1);

        let msg = store.get_message(ids[0]).await.unwrap();
        assert_eq!(msg.status, OutboxStatus::Pending);
        assert_eq!(msg.attempts, 1);
        assert_eq!(msg.not_before, 1_000 + Dispatcher::backoff_delay(0));

        // Not yet due: nothing is claimed.
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.claimed, 0);

        // Past the gate the redelivery succeeds.
        clock.set(msg.not_before);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.sent, 1);
        let msg = store.get_message(ids[0]).await.unwrap();
        assert_eq!(msg.status, OutboxStatus::Sent);
    }

    #[tokio::test]
    async fn exhausted_message_is_dead_lettered() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let ids = seed(&store, 1, 500).await;

        let d = dispatcher(&store, Arc::new(FlakyDelivery::failing(u32::MAX)), &clock, 2);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.retried, 1);

        clock.advance(Dispatcher::backoff_delay(0));
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.dead_lettered, 1);

        let msg = store.get_message(ids[0]).await.unwrap();
        assert_eq!(msg.status, OutboxStatus::Failed);
        assert_eq!(msg.attempts, 2);
        assert!(msg.last_error.is_some());

        // Dead letters stay dead.
        clock.advance(100 * H);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.claimed, 0);
    }

    #[tokio::test]
    async fn failing_message_does_not_abort_batch() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        seed(&store, 2, 500).await;

        // First send fails, the second still goes out in the same cycle.
        let d = dispatcher(&store, Arc::new(FlakyDelivery::failing(1)), &clock, 5);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats, DispatchStats { claimed: 2, sent: 1, retried: 1, dead_lettered: 0 });
    }

    #[tokio::test]
    async fn busy_lock_skips_cycle() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let recording = Arc::new(RecordingDelivery::new());
        seed(&store, 1, 500).await;

        let held = store.try_acquire(DISPATCH_LOCK, 30_000, 1_000).await.unwrap().unwrap();
        let d = dispatcher(&store, recording.clone(), &clock, 5);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.claimed, 0);
        assert!(recording.ids().is_empty());

        store.release(&held).await.unwrap();
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn cycle_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let d = dispatcher(&store, Arc::new(RecordingDelivery::new()), &clock, 5);
        d.run_cycle().await.unwrap();
        assert!(store.try_acquire(DISPATCH_LOCK, 30_000, 1_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_claim_is_recovered() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let recording = Arc::new(RecordingDelivery::new());
        let ids = seed(&store, 1, 500).await;

        // Another instance claimed the message and died.
        let claimed = store.claim_batch(10, 30_000, 1_000).await.unwrap();
        assert_eq!(claimed.len(), 1);

        clock.advance(31_000);
        let d = dispatcher(&store, recording.clone(), &clock, 5);
        let stats = d.run_cycle().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(recording.ids(), ids);
    }

    #[tokio::test]
    async fn backoff_grows_and_caps() {
        assert_eq!(Dispatcher::backoff_delay(0), 30_000);
        assert_eq!(Dispatcher::backoff_delay(1), 60_000);
        assert_eq!(Dispatcher::backoff_delay(2), 120_000);
        assert_eq!(Dispatcher::backoff_delay(10), BACKOFF_MAX_MS);
        assert_eq!(Dispatcher::backoff_delay(u32::MAX), BACKOFF_MAX_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let d = Arc::new(dispatcher(&store, Arc::new(RecordingDelivery::new()), &clock, 5));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(d.run(shutdown.clone()));
        tokio::task::yield_now().await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
