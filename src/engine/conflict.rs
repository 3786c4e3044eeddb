use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_day(day: NaiveDate) -> Result<(), EngineError> {
    use crate::limits::*;
    if day.year() < MIN_VALID_YEAR || day.year() > MAX_VALID_YEAR {
        return Err(EngineError::InvalidStay("date outside supported years"));
    }
    Ok(())
}

fn validate_days(range: &StayRange) -> Result<(), EngineError> {
    validate_day(range.start)?;
    validate_day(range.end)
}

/// A bookable stay: strictly positive night count, bounded length.
pub(crate) fn validate_stay(stay: &StayRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if stay.end <= stay.start {
        return Err(EngineError::InvalidStay("check-out must be after check-in"));
    }
    validate_days(stay)?;
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::InvalidStay("stay too long"));
    }
    Ok(())
}

/// A query window (search date range, calendar window): a single day is
/// legal, inversion is not.
pub(crate) fn validate_window(window: &StayRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if window.end < window.start {
        return Err(EngineError::InvalidStay("range end before start"));
    }
    validate_days(window)?;
    if window.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::InvalidStay("query window too wide"));
    }
    Ok(())
}

/// The conflict resolver: the candidate stay may not share a calendar day
/// with any ACCEPTED booking on the property. `exclude` names the booking
/// under evaluation when it already exists as a record (the accept path).
/// PENDING and CANCELLED bookings never conflict.
pub(crate) fn check_no_conflict(
    ps: &PropertyState,
    stay: &StayRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if let Some(blocking) = ps.accepted_overlapping(stay, exclude).next() {
        return Err(EngineError::Conflict(blocking.id));
    }
    Ok(())
}
