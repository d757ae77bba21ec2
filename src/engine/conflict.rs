use ulid::Ulid;

use crate::limits::*;
use crate::model::{Ms, Reservation, Span};

use super::EngineError;

/// First active reservation whose interval intersects `span`, skipping
/// `exclude` (the update/extend path excludes the row being moved).
/// Pure: reads only the snapshot it is given.
pub fn first_conflict(existing: &[Reservation], span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    existing
        .iter()
        .filter(|r| r.status.is_active())
        .filter(|r| exclude != Some(r.id))
        .find(|r| r.span.overlaps(span))
        .map(|r| r.id)
}

pub fn check_availability(
    existing: &[Reservation],
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_conflict(existing, span, exclude) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}

/// Validate a raw `[start, end)` pair and turn it into a `Span`.
pub(crate) fn validate_range(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Validation("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::Validation("span too wide"));
    }
    Ok(span)
}
