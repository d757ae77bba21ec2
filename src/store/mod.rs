//! Persistence boundary. Each trait method is one transaction; the engine
//! relies on reservation writes and their outbox messages committing
//! together, and on the conflict check running inside the same transaction
//! as the insert or update it guards.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// Sort order for reservation listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    StartAsc,
    StartDesc,
}

/// Filter for `ReservationStore::list`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub user_id: Option<Ulid>,
    pub room_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
    pub window: Option<Span>,
    pub order: Order,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        if let Some(user_id) = self.user_id
            && r.user_id != user_id
        {
            return false;
        }
        if let Some(room_id) = self.room_id
            && r.room_id != room_id
        {
            return false;
        }
        if let Some(location_id) = self.location_id
            && r.location_id != location_id
        {
            return false;
        }
        if let Some(window) = &self.window
            && !r.span.overlaps(window)
        {
            return false;
        }
        true
    }
}

/// Transactional reservation persistence. Implementations must make the
/// check-then-write paths atomic: two concurrent `insert_new` calls for the
/// same room can never both observe "no conflict" and both commit.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Atomic insert-if-no-conflict. The outbox message commits with the row.
    async fn insert_new(&self, res: Reservation, msg: OutboxMessage) -> Result<(), EngineError>;

    /// State-guarded conditional replace. Fails `NotFound` if the row is
    /// absent and `Conflict` if its current status is not in `expect` (the
    /// caller lost a concurrent-transition race). While the updated row is
    /// still active its interval is re-checked against the room, excluding
    /// the row itself. The outbox message commits with the row.
    async fn replace_if(
        &self,
        updated: Reservation,
        expect: &[ReservationStatus],
        msg: OutboxMessage,
    ) -> Result<(), EngineError>;

    /// Hard delete; returns the removed row.
    async fn remove(&self, id: Ulid) -> Result<Reservation, EngineError>;

    async fn get(&self, id: Ulid) -> Result<Reservation, EngineError>;

    async fn list(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError>;

    /// `Reserved` rows starting strictly before `cutoff`.
    async fn overdue_reserved(&self, cutoff: Ms) -> Result<Vec<Reservation>, EngineError>;
}

/// Outbox consumption side, used by the dispatcher.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` deliverable messages in `created_at` order and
    /// mark them `Processing`. Deliverable: `Pending` past its retry gate,
    /// or `Processing` whose claim is older than `claim_timeout` (a crashed
    /// claimer never blocks redelivery forever).
    async fn claim_batch(
        &self,
        limit: usize,
        claim_timeout: Ms,
        now: Ms,
    ) -> Result<Vec<OutboxMessage>, EngineError>;

    async fn mark_sent(&self, id: Ulid, now: Ms) -> Result<(), EngineError>;

    /// Record a delivery failure. `retry_at = Some(t)` puts the message back
    /// to `Pending` gated at `t`; `None` dead-letters it as `Failed`.
    async fn mark_failed(
        &self,
        id: Ulid,
        error: String,
        retry_at: Option<Ms>,
    ) -> Result<(), EngineError>;

    async fn get_message(&self, id: Ulid) -> Result<OutboxMessage, EngineError>;

    async fn list_messages(&self, status: Option<OutboxStatus>) -> Result<Vec<OutboxMessage>, EngineError>;
}

/// Lease-based mutual exclusion across processes.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Single atomic conditional write: grant iff `name` is free or its
    /// current lease has expired. `None` means busy — a normal skip signal
    /// for periodic jobs, not an error.
    async fn try_acquire(&self, name: &str, ttl: Ms, now: Ms) -> Result<Option<LockLease>, EngineError>;

    /// Extend iff still owned and unexpired. `false` means the lease was
    /// lost; the holder must stop writing and abort its cycle.
    async fn renew(&self, lease: &LockLease, ttl: Ms, now: Ms) -> Result<bool, EngineError>;

    /// Delete iff still owned. Releasing a lost lease is a no-op.
    async fn release(&self, lease: &LockLease) -> Result<(), EngineError>;
}
