use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SweeperConfig;
use crate::engine::{Engine, EngineError};
use crate::observability;
use crate::store::LockStore;

pub const SWEEP_LOCK: &str = "reservation-autocancel";

/// Periodic job reclaiming no-show bookings. At most one instance runs a
/// sweep at a time across the whole deployment: each cycle runs under the
/// sweep lock and a busy lock just means another instance got there first.
pub struct Sweeper {
    engine: Arc<Engine>,
    locks: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(
        engine: Arc<Engine>,
        locks: Arc<dyn LockStore>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self { engine, locks, clock, config }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            match self.run_cycle().await {
                Ok(0) => {}
                Ok(n) => info!("auto-cancelled {n} no-show reservations"),
                Err(e) => warn!("sweep cycle failed: {e}"),
            }
        }
        debug!("auto-cancellation sweeper stopped");
    }

    /// One cycle: under the sweep lock, move every overdue `Reserved` row to
    /// `AutoCancelled`. Returns how many rows were transitioned.
    pub async fn run_cycle(&self) -> Result<usize, EngineError> {
        let now = self.clock.now_ms();
        let Some(lease) = self.locks.try_acquire(SWEEP_LOCK, self.config.lock_ttl, now).await? else {
            metrics::counter!(observability::LOCK_BUSY_TOTAL).increment(1);
            debug!("sweep lock busy, skipping cycle");
            return Ok(0);
        };
        let started = std::time::Instant::now();
        let result = self.engine.auto_cancel_overdue(now).await;
        metrics::histogram!(observability::SWEEP_CYCLE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        self.locks.release(&lease).await?;
        let cancelled = result?;
        if !cancelled.is_empty() {
            metrics::counter!(observability::SWEEPER_CANCELLED_TOTAL).increment(cancelled.len() as u64);
        }
        Ok(cancelled.len())
    }
}
