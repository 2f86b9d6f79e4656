use chrono::{NaiveDate, NaiveTime, Utc};

use crate::limits::*;
use crate::model::*;

use super::availability::available_slots;
use super::{ConflictKind, EngineError};

/// The current calendar date in UTC. Dates carry no timezone anywhere else.
pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) fn validate_window(start: NaiveTime, end: NaiveTime) -> Result<TimeWindow, EngineError> {
    TimeWindow::try_new(start, end).ok_or(EngineError::InvalidInput("end time must be after start time"))
}

pub(crate) fn validate_day(day_of_week: DayOfWeek) -> Result<(), EngineError> {
    if day_of_week > 6 {
        return Err(EngineError::InvalidInput("day_of_week must be 0-6 (Sunday = 0)"));
    }
    Ok(())
}

/// Dates in the past and dates beyond the booking horizon are refused.
pub(crate) fn validate_date(date: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
    if date < today {
        return Err(EngineError::InvalidInput("date is in the past"));
    }
    if (date - today).num_days() > MAX_DAYS_AHEAD {
        return Err(EngineError::LimitExceeded("date too far ahead"));
    }
    Ok(())
}

pub(crate) fn validate_text(
    text: &Option<String>,
    max: usize,
    what: &'static str,
) -> Result<(), EngineError> {
    if let Some(s) = text
        && s.len() > max {
            return Err(EngineError::LimitExceeded(what));
        }
    Ok(())
}

/// Refuse a weekly rule identical to an active one on the same day.
pub(crate) fn check_no_duplicate_rule(
    cs: &CounselorState,
    day_of_week: DayOfWeek,
    window: &TimeWindow,
) -> Result<(), EngineError> {
    if let Some(existing) = cs
        .weekly_rules
        .iter()
        .find(|r| r.is_active && r.day_of_week == day_of_week && r.window == *window)
    {
        return Err(ConflictKind::DuplicateRule(existing.id).into());
    }
    Ok(())
}

/// At most one override per (counselor, date).
pub(crate) fn check_no_override(cs: &CounselorState, date: NaiveDate) -> Result<(), EngineError> {
    if cs.override_on(date).is_some() {
        return Err(ConflictKind::DuplicateOverride(date).into());
    }
    Ok(())
}

/// The guard of the booking write: the slot must be free and currently offered.
/// Called with the counselor's write lock held, so check and insert are one step.
pub(crate) fn check_slot_bookable(
    cs: &CounselorState,
    date: NaiveDate,
    slot: Slot,
) -> Result<(), EngineError> {
    if let Some(holder) = cs.active_appointment_at(date, slot.start) {
        return Err(ConflictKind::SlotTaken(holder.id).into());
    }
    let offered = available_slots(&cs.weekly_rules, &cs.overrides, cs.appointments_on(date), date);
    if offered.binary_search(&slot).is_err() {
        return Err(EngineError::SlotUnavailable {
            date,
            start: slot.start,
        });
    }
    Ok(())
}
