use ulid::Ulid;

use crate::limits::MAX_LIST_WINDOW_MS;
use crate::model::Reservation;
use crate::store::ReservationFilter;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store().get(id).await
    }

    /// List reservations by user, room, location and/or time window.
    pub async fn list(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        if let Some(window) = &filter.window
            && window.duration_ms() > MAX_LIST_WINDOW_MS
        {
            return Err(EngineError::Validation("listing window too wide"));
        }
        self.store().list(filter).await
    }
}
