use tracing::debug;
use ulid::Ulid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::observability;

use super::conflict::validate_range;
use super::{Engine, EngineError};

impl Engine {
    /// Book a room. The conflict check and the insert run atomically inside
    /// the store, so two racing creators for the same interval can never
    /// both succeed.
    pub async fn create(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let span = validate_range(req.start, req.end)?;
        let now = self.now();
        let res = Reservation {
            id: Ulid::new(),
            room_id: req.room_id,
            location_id: req.location_id,
            user_id: req.user_id,
            span,
            status: ReservationStatus::Reserved,
            check_in_at: None,
            check_out_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            extension_count: 0,
            created_at: now,
            updated_at: now,
        };
        let event = ReservationEvent::Created { reservation: res.clone() };
        match self.store().insert_new(res.clone(), OutboxMessage::new(&event, now)).await {
            Ok(()) => {
                metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                Ok(res)
            }
            Err(e) => {
                if matches!(e, EngineError::Conflict(_)) {
                    metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
                }
                Err(e)
            }
        }
    }

    /// Move a reservation to a new interval. Conflicts are re-checked
    /// excluding the reservation itself.
    pub async fn update(&self, id: Ulid, start: Ms, end: Ms) -> Result<Reservation, EngineError> {
        let span = validate_range(start, end)?;
        let current = self.store().get(id).await?;
        if current.status.is_terminal() {
            return Err(EngineError::NotAllowed("reservation is already finalized"));
        }
        let now = self.now();
        let mut updated = current;
        updated.span = span;
        updated.updated_at = now;
        let event = ReservationEvent::Updated { reservation: updated.clone() };
        self.store()
            .replace_if(
                updated.clone(),
                &[ReservationStatus::Reserved, ReservationStatus::CheckedIn],
                OutboxMessage::new(&event, now),
            )
            .await?;
        Ok(updated)
    }

    pub async fn cancel(
        &self,
        id: Ulid,
        by_user: Option<Ulid>,
        reason: Option<String>,
    ) -> Result<Reservation, EngineError> {
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::Validation("cancellation reason too long"));
        }
        let current = self.store().get(id).await?;
        if !current.status.is_active() {
            return Err(EngineError::NotAllowed("reservation is already finalized"));
        }
        let now = self.now();
        let mut updated = current;
        updated.status = ReservationStatus::Cancelled;
        updated.cancelled_by = by_user;
        updated.cancellation_reason = reason;
        updated.updated_at = now;
        let event = ReservationEvent::Cancelled { reservation: updated.clone() };
        self.store()
            .replace_if(
                updated.clone(),
                &[ReservationStatus::Reserved, ReservationStatus::CheckedIn],
                OutboxMessage::new(&event, now),
            )
            .await?;
        Ok(updated)
    }

    /// Check in, accepted only inside the grace window around the start:
    /// `[start - check_in_lead, start + auto_cancel_grace]`.
    pub async fn check_in(&self, id: Ulid, at: Ms) -> Result<Reservation, EngineError> {
        let current = self.store().get(id).await?;
        if current.status != ReservationStatus::Reserved {
            return Err(EngineError::NotAllowed("check-in requires a reserved reservation"));
        }
        let earliest = current.span.start - self.config().check_in_lead;
        let latest = current.span.start + self.config().auto_cancel_grace;
        if at < earliest || at > latest {
            return Err(EngineError::NotAllowed("outside the check-in window"));
        }
        let now = self.now();
        let mut updated = current;
        updated.status = ReservationStatus::CheckedIn;
        updated.check_in_at = Some(at);
        updated.updated_at = now;
        let event = ReservationEvent::CheckedIn { reservation: updated.clone() };
        self.store()
            .replace_if(updated.clone(), &[ReservationStatus::Reserved], OutboxMessage::new(&event, now))
            .await?;
        Ok(updated)
    }

    pub async fn check_out(&self, id: Ulid, at: Ms) -> Result<Reservation, EngineError> {
        let current = self.store().get(id).await?;
        if current.status != ReservationStatus::CheckedIn {
            return Err(EngineError::NotAllowed("check-out requires a checked-in reservation"));
        }
        let now = self.now();
        let mut updated = current;
        updated.status = ReservationStatus::CheckedOut;
        updated.check_out_at = Some(at);
        updated.updated_at = now;
        let event = ReservationEvent::CheckedOut { reservation: updated.clone() };
        self.store()
            .replace_if(updated.clone(), &[ReservationStatus::CheckedIn], OutboxMessage::new(&event, now))
            .await?;
        Ok(updated)
    }

    /// Push the end time out by the configured default extension. The store
    /// re-checks the new interval against the room excluding this row, so a
    /// booking right behind it makes this fail with `Conflict` and nothing
    /// changes.
    pub async fn extend_default(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let current = self.store().get(id).await?;
        if current.status != ReservationStatus::CheckedIn {
            return Err(EngineError::NotAllowed("extension requires a checked-in reservation"));
        }
        let previous_end = current.span.end;
        let span = validate_range(current.span.start, previous_end + self.config().default_extension)?;
        let now = self.now();
        let mut updated = current;
        updated.span = span;
        updated.extension_count += 1;
        updated.updated_at = now;
        let event = ReservationEvent::Extended { reservation: updated.clone(), previous_end };
        match self
            .store()
            .replace_if(updated.clone(), &[ReservationStatus::CheckedIn], OutboxMessage::new(&event, now))
            .await
        {
            Ok(()) => Ok(updated),
            Err(e) => {
                if matches!(e, EngineError::Conflict(_)) {
                    metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
                }
                Err(e)
            }
        }
    }

    /// Hard removal, administrative override. Not a lifecycle transition:
    /// no event is enqueued.
    pub async fn delete(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store().remove(id).await
    }

    /// Reclaim no-show bookings: every `Reserved` row whose check-in grace
    /// window elapsed before `now` moves to `AutoCancelled`. Rows that were
    /// checked in or cancelled since the query are skipped silently — the
    /// state-guarded transition only fires from `Reserved`, which also makes
    /// re-running the sweep a no-op.
    pub async fn auto_cancel_overdue(&self, now: Ms) -> Result<Vec<Ulid>, EngineError> {
        let cutoff = now - self.config().auto_cancel_grace;
        let overdue = self.store().overdue_reserved(cutoff).await?;
        let mut cancelled = Vec::new();
        for res in overdue {
            let id = res.id;
            let mut updated = res;
            updated.status = ReservationStatus::AutoCancelled;
            updated.cancellation_reason = Some("no-show: check-in window elapsed".to_string());
            updated.updated_at = now;
            let event = ReservationEvent::AutoCancelled { reservation: updated.clone() };
            match self
                .store()
                .replace_if(updated, &[ReservationStatus::Reserved], OutboxMessage::new(&event, now))
                .await
            {
                Ok(()) => cancelled.push(id),
                Err(EngineError::Conflict(_)) | Err(EngineError::NotFound(_)) => {
                    // Checked in, cancelled, or deleted since the query.
                    debug!(%id, "auto-cancel skipped, reservation moved on");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }
}
