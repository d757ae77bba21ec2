use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Where a reservation sits in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Reserved,
    CheckedIn,
    CheckedOut,
    Cancelled,
    AutoCancelled,
}

impl ReservationStatus {
    /// Active rows are the ones that occupy the room for conflict purposes.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Reserved | ReservationStatus::CheckedIn)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn label(self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::CheckedOut => "checked_out",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::AutoCancelled => "auto_cancelled",
        }
    }
}

/// A room booking. `span` holds `[start, end)` in UTC unix-ms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub location_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub check_in_at: Option<Ms>,
    pub check_out_at: Option<Ms>,
    pub cancelled_by: Option<Ulid>,
    pub cancellation_reason: Option<String>,
    pub extension_count: u32,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Input to `Engine::create` — everything else is stamped by the engine.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub room_id: Ulid,
    pub location_id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

// ── Lifecycle events ─────────────────────────────────────────────

/// One event per lifecycle transition, carrying the post-transition row.
/// This is the outbox payload format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEvent {
    Created { reservation: Reservation },
    Updated { reservation: Reservation },
    Cancelled { reservation: Reservation },
    CheckedIn { reservation: Reservation },
    CheckedOut { reservation: Reservation },
    Extended { reservation: Reservation, previous_end: Ms },
    AutoCancelled { reservation: Reservation },
}

impl ReservationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ReservationEvent::Created { .. } => "ReservationCreated",
            ReservationEvent::Updated { .. } => "ReservationUpdated",
            ReservationEvent::Cancelled { .. } => "ReservationCancelled",
            ReservationEvent::CheckedIn { .. } => "ReservationCheckedIn",
            ReservationEvent::CheckedOut { .. } => "ReservationCheckedOut",
            ReservationEvent::Extended { .. } => "ReservationExtended",
            ReservationEvent::AutoCancelled { .. } => "ReservationAutoCancelled",
        }
    }

    pub fn reservation(&self) -> &Reservation {
        match self {
            ReservationEvent::Created { reservation }
            | ReservationEvent::Updated { reservation }
            | ReservationEvent::Cancelled { reservation }
            | ReservationEvent::CheckedIn { reservation }
            | ReservationEvent::CheckedOut { reservation }
            | ReservationEvent::Extended { reservation, .. }
            | ReservationEvent::AutoCancelled { reservation } => reservation,
        }
    }
}

// ── Outbox ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

/// A pending side effect, committed in the same transaction as the state
/// change that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Ulid,
    pub kind: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Retry gate: the dispatcher will not claim this message earlier.
    pub not_before: Ms,
    /// Set while `Processing`; lets a later cycle reclaim a stale claim.
    pub claimed_at: Option<Ms>,
    pub created_at: Ms,
    pub processed_at: Option<Ms>,
}

impl OutboxMessage {
    pub fn new(event: &ReservationEvent, now: Ms) -> Self {
        Self {
            id: Ulid::new(),
            kind: event.kind().to_string(),
            payload: serde_json::to_string(event).expect("event serializes"),
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            not_before: now,
            claimed_at: None,
            created_at: now,
            processed_at: None,
        }
    }
}

// ── Lock lease ───────────────────────────────────────────────────

/// A time-boxed, renewable ownership token for a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub name: String,
    /// Fresh per acquisition attempt; renew/release are owner-checked.
    pub owner: Ulid,
    pub expires_at: Ms,
}

impl LockLease {
    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at <= now
    }
}
