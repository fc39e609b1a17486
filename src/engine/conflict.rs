use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::store::Schedule;

/// Parse a requested range into a `Span`, rejecting empty, inverted,
/// out-of-range and overly wide requests.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidSpan { start, end })?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// First pending/approved booking overlapping `span`. Rejected bookings
/// never block; touching endpoints are not an overlap.
fn first_blocking<'a>(schedule: &'a Schedule, span: &Span) -> Option<&'a Booking> {
    schedule
        .overlapping(span)
        .find(|b| b.status.holds_room())
}

pub fn has_conflict(schedule: &Schedule, span: &Span) -> bool {
    first_blocking(schedule, span).is_some()
}

pub(crate) fn check_no_conflict(schedule: &Schedule, span: &Span) -> Result<(), EngineError> {
    match first_blocking(schedule, span) {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}
