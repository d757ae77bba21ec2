use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::engine::{conflict, EngineError};
use crate::model::*;

use super::{LockStore, Order, OutboxStore, ReservationFilter, ReservationStore};

type SharedRoom = Arc<RwLock<Vec<Reservation>>>;

/// In-memory implementation of all three store traits. The per-room write
/// lock is held across check-then-write, which gives `insert_new` and
/// `replace_if` the isolation the traits demand; the outbox append happens
/// inside the same critical section, so a row change and its message are
/// never observed apart.
pub struct MemoryStore {
    rooms: DashMap<Ulid, SharedRoom>,
    /// Reverse lookup: reservation id → room id.
    room_of: DashMap<Ulid, Ulid>,
    outbox: Mutex<Vec<OutboxMessage>>,
    leases: DashMap<String, LockLease>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            room_of: DashMap::new(),
            outbox: Mutex::new(Vec::new()),
            leases: DashMap::new(),
        }
    }

    fn room(&self, room_id: Ulid) -> SharedRoom {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .clone()
    }

    fn room_for(&self, id: Ulid) -> Result<SharedRoom, EngineError> {
        let room_id = self
            .room_of
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        self.rooms
            .get(&room_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Snapshot of the room Arcs, so iteration never awaits while holding a
    /// map shard.
    fn room_snapshot(&self) -> Vec<SharedRoom> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert_new(&self, res: Reservation, msg: OutboxMessage) -> Result<(), EngineError> {
        let room = self.room(res.room_id);
        let mut rows = room.write().await;
        conflict::check_availability(&rows, &res.span, None)?;
        self.room_of.insert(res.id, res.room_id);
        rows.push(res);
        self.outbox.lock().await.push(msg);
        Ok(())
    }

    async fn replace_if(
        &self,
        updated: Reservation,
        expect: &[ReservationStatus],
        msg: OutboxMessage,
    ) -> Result<(), EngineError> {
        let room = self.room_for(updated.id)?;
        let mut rows = room.write().await;
        let pos = rows
            .iter()
            .position(|r| r.id == updated.id)
            .ok_or(EngineError::NotFound(updated.id))?;
        if !expect.contains(&rows[pos].status) {
            return Err(EngineError::Conflict(updated.id));
        }
        if updated.status.is_active() {
            conflict::check_availability(&rows, &updated.span, Some(updated.id))?;
        }
        rows[pos] = updated;
        self.outbox.lock().await.push(msg);
        Ok(())
    }

    async fn remove(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let room = self.room_for(id)?;
        let mut rows = room.write().await;
        let pos = rows.iter().position(|r| r.id == id).ok_or(EngineError::NotFound(id))?;
        let removed = rows.remove(pos);
        self.room_of.remove(&id);
        Ok(removed)
    }

    async fn get(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let room = self.room_for(id)?;
        let rows = room.read().await;
        rows.iter().find(|r| r.id == id).cloned().ok_or(EngineError::NotFound(id))
    }

    async fn list(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        let mut out = Vec::new();
        for room in self.room_snapshot() {
            let rows = room.read().await;
            out.extend(rows.iter().filter(|r| filter.matches(r)).cloned());
        }
        match filter.order {
            Order::StartAsc => out.sort_by_key(|r| r.span.start),
            Order::StartDesc => out.sort_by_key(|r| std::cmp::Reverse(r.span.start)),
        }
        Ok(out)
    }

    async fn overdue_reserved(&self, cutoff: Ms) -> Result<Vec<Reservation>, EngineError> {
        let mut out = Vec::new();
        for room in self.room_snapshot() {
            let rows = room.read().await;
            out.extend(
                rows.iter()
                    .filter(|r| r.status == ReservationStatus::Reserved && r.span.start < cutoff)
                    .cloned(),
            );
        }
        Ok(out)
    }
}

fn claimable(msg: &OutboxMessage, claim_timeout: Ms, now: Ms) -> bool {
    match msg.status {
        OutboxStatus::Pending => msg.not_before <= now,
        OutboxStatus::Processing => msg.claimed_at.is_some_and(|t| now - t >= claim_timeout),
        OutboxStatus::Sent | OutboxStatus::Failed => false,
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn claim_batch(
        &self,
        limit: usize,
        claim_timeout: Ms,
        now: Ms,
    ) -> Result<Vec<OutboxMessage>, EngineError> {
        let mut queue = self.outbox.lock().await;
        let mut idx: Vec<usize> = queue
            .iter()
            .enumerate()
            .filter(|(_, m)| claimable(m, claim_timeout, now))
            .map(|(i, _)| i)
            .collect();
        idx.sort_by_key(|&i| queue[i].created_at);
        let mut out = Vec::new();
        for &i in idx.iter().take(limit) {
            let msg = &mut queue[i];
            msg.status = OutboxStatus::Processing;
            msg.claimed_at = Some(now);
            out.push(msg.clone());
        }
        Ok(out)
    }

    async fn mark_sent(&self, id: Ulid, now: Ms) -> Result<(), EngineError> {
        let mut queue = self.outbox.lock().await;
        let msg = queue.iter_mut().find(|m| m.id == id).ok_or(EngineError::NotFound(id))?;
        msg.status = OutboxStatus::Sent;
        msg.processed_at = Some(now);
        msg.claimed_at = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Ulid,
        error: String,
        retry_at: Option<Ms>,
    ) -> Result<(), EngineError> {
        let mut queue = self.outbox.lock().await;
        let msg = queue.iter_mut().find(|m| m.id == id).ok_or(EngineError::NotFound(id))?;
        msg.attempts += 1;
        msg.last_error = Some(error);
        msg.claimed_at = None;
        match retry_at {
            Some(t) => {
                msg.status = OutboxStatus::Pending;
                msg.not_before = t;
            }
            None => msg.status = OutboxStatus::Failed,
        }
        Ok(())
    }

    async fn get_message(&self, id: Ulid) -> Result<OutboxMessage, EngineError> {
        let queue = self.outbox.lock().await;
        queue.iter().find(|m| m.id == id).cloned().ok_or(EngineError::NotFound(id))
    }

    async fn list_messages(&self, status: Option<OutboxStatus>) -> Result<Vec<OutboxMessage>, EngineError> {
        let queue = self.outbox.lock().await;
        Ok(queue
            .iter()
            .filter(|m| status.is_none_or(|s| m.status == s))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_acquire(&self, name: &str, ttl: Ms, now: Ms) -> Result<Option<LockLease>, EngineError> {
        // The entry guard holds the shard lock, making check-then-write atomic.
        match self.leases.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Ok(None);
                }
                let lease = LockLease { name: name.to_string(), owner: Ulid::new(), expires_at: now + ttl };
                occupied.insert(lease.clone());
                Ok(Some(lease))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let lease = LockLease { name: name.to_string(), owner: Ulid::new(), expires_at: now + ttl };
                vacant.insert(lease.clone());
                Ok(Some(lease))
            }
        }
    }

    async fn renew(&self, lease: &LockLease, ttl: Ms, now: Ms) -> Result<bool, EngineError> {
        match self.leases.get_mut(&lease.name) {
            Some(mut current) if current.owner == lease.owner && !current.is_expired(now) => {
                current.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<(), EngineError> {
        self.leases.remove_if(&lease.name, |_, current| current.owner == lease.owner);
        Ok(())
    }
}
