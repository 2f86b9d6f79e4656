use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::*;

// ── Slot resolution ───────────────────────────────────────────────

/// True iff a blocking override exists for `date`. Past dates are not special here.
pub fn is_date_blocked(overrides: &[DateOverride], date: NaiveDate) -> bool {
    overrides
        .iter()
        .any(|o| o.date == date && o.kind == OverrideKind::Blocked)
}

/// The special-hours override for `date`, if there is one.
pub fn special_availability(overrides: &[DateOverride], date: NaiveDate) -> Option<&DateOverride> {
    overrides.iter().find(|o| o.date == date && o.is_available())
}

/// Compute the bookable one-hour slots for one counselor on `date`.
///
/// Exactly one source of hours applies, in priority order:
/// 1. a blocking override: nothing is bookable;
/// 2. a special-hours override: its window REPLACES the weekly rules;
/// 3. otherwise the union of every active weekly rule for the weekday.
///
/// Slots held by a pending or confirmed appointment are then removed. The
/// result is sorted and free of duplicates. Empty inputs mean no availability.
pub fn available_slots(
    weekly: &[WeeklyRule],
    overrides: &[DateOverride],
    appointments: &[Appointment],
    date: NaiveDate,
) -> Vec<Slot> {
    if is_date_blocked(overrides, date) {
        return Vec::new();
    }

    let mut slots: BTreeSet<Slot> =
        match special_availability(overrides, date).and_then(DateOverride::special_hours) {
            Some(window) => window.hour_slots().collect(),
            None => weekly_slots(weekly, day_of_week(date)),
        };

    slots.retain(|slot| !appointments.iter().any(|a| a.occupies(date, slot.start)));

    slots.into_iter().collect()
}

/// Union of the hour slots of every active rule for `day`. Overlapping rules collapse.
fn weekly_slots(weekly: &[WeeklyRule], day: DayOfWeek) -> BTreeSet<Slot> {
    weekly
        .iter()
        .filter(|r| r.is_active && r.day_of_week == day)
        .flat_map(|r| r.window.hour_slots())
        .collect()
}

// ── Calendar predicates ───────────────────────────────────────────

/// Whether the date picker should offer `date` at all.
///
/// Past and blocked dates are never selectable; special hours always make a
/// date selectable; otherwise some active weekly rule must exist for the weekday.
/// Existing bookings are ignored, so a fully booked date stays selectable.
pub fn is_date_selectable(
    weekly: &[WeeklyRule],
    overrides: &[DateOverride],
    date: NaiveDate,
    today: NaiveDate,
) -> bool {
    if date < today || is_date_blocked(overrides, date) {
        return false;
    }
    if special_availability(overrides, date).is_some() {
        return true;
    }
    let day = day_of_week(date);
    weekly.iter().any(|r| r.is_active && r.day_of_week == day)
}

/// False when the counselor has configured neither weekly hours nor special hours.
pub fn has_any_availability(weekly: &[WeeklyRule], overrides: &[DateOverride]) -> bool {
    weekly.iter().any(|r| r.is_active) || overrides.iter().any(DateOverride::is_available)
}
