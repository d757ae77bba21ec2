use crate::model::Ms;

/// Earliest timestamp accepted anywhere (the unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest timestamp accepted anywhere (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single reservation may not span more than 30 days.
pub const MAX_SPAN_DURATION_MS: Ms = 30 * 24 * 3_600_000;

/// Listing queries may not span more than one year.
pub const MAX_LIST_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

/// Cancellation reasons are capped; longer input is rejected, not truncated.
pub const MAX_REASON_LEN: usize = 512;
