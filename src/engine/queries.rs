use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;
use crate::session::Session;

use super::availability::{self, special_availability};
use super::conflict::today;
use super::{Engine, EngineError};

impl Engine {
    /// Bookable one-hour slots for `counselor_id` on `date`.
    /// An unknown counselor has no availability, which is not an error.
    pub async fn available_slots(&self, counselor_id: Ulid, date: NaiveDate) -> Vec<Slot> {
        let Some(cs) = self.get_counselor(&counselor_id) else {
            return Vec::new();
        };
        let guard = cs.read().await;
        availability::available_slots(
            &guard.weekly_rules,
            &guard.overrides,
            guard.appointments_on(date),
            date,
        )
    }

    pub async fn date_status(&self, counselor_id: Ulid, date: NaiveDate) -> DateStatus {
        let Some(cs) = self.get_counselor(&counselor_id) else {
            return DateStatus {
                date,
                blocked: false,
                special_hours: None,
                selectable: false,
            };
        };
        let guard = cs.read().await;
        DateStatus {
            date,
            blocked: availability::is_date_blocked(&guard.overrides, date),
            special_hours: special_availability(&guard.overrides, date)
                .and_then(|o| o.special_hours()),
            selectable: availability::is_date_selectable(
                &guard.weekly_rules,
                &guard.overrides,
                date,
                today(),
            ),
        }
    }

    pub async fn has_any_availability(&self, counselor_id: Ulid) -> bool {
        match self.get_counselor(&counselor_id) {
            Some(cs) => {
                let guard = cs.read().await;
                availability::has_any_availability(&guard.weekly_rules, &guard.overrides)
            }
            None => false,
        }
    }

    /// Active weekly rules ordered by (day_of_week, start).
    pub async fn weekly_rules(&self, counselor_id: Ulid) -> Result<Vec<WeeklyRuleInfo>, EngineError> {
        let cs = self
            .get_counselor(&counselor_id)
            .ok_or(EngineError::NotFound(counselor_id))?;
        let guard = cs.read().await;
        Ok(guard
            .weekly_rules
            .iter()
            .filter(|r| r.is_active)
            .map(|r| WeeklyRuleInfo {
                id: r.id,
                counselor_id,
                day_of_week: r.day_of_week,
                start: r.window.start,
                end: r.window.end,
                is_active: r.is_active,
            })
            .collect())
    }

    /// Overrides dated `from` or later (today when `from` is None).
    pub async fn date_overrides(
        &self,
        counselor_id: Ulid,
        from: Option<NaiveDate>,
    ) -> Result<Vec<DateOverrideInfo>, EngineError> {
        let cs = self
            .get_counselor(&counselor_id)
            .ok_or(EngineError::NotFound(counselor_id))?;
        let floor = from.unwrap_or_else(today);
        let guard = cs.read().await;
        let first = guard.overrides.partition_point(|o| o.date < floor);
        Ok(guard.overrides[first..]
            .iter()
            .map(|o| {
                let hours = o.special_hours();
                DateOverrideInfo {
                    id: o.id,
                    counselor_id,
                    date: o.date,
                    is_available: o.is_available(),
                    start: hours.map(|w| w.start),
                    end: hours.map(|w| w.end),
                    reason: o.reason.clone(),
                }
            })
            .collect())
    }

    pub async fn counselor_appointments(
        &self,
        session: &Session,
        counselor_id: Ulid,
    ) -> Result<Vec<AppointmentInfo>, EngineError> {
        if !session.manages(counselor_id) {
            return Err(EngineError::Unauthorized("not your appointment book"));
        }
        let cs = self
            .get_counselor(&counselor_id)
            .ok_or(EngineError::NotFound(counselor_id))?;
        let guard = cs.read().await;
        Ok(guard
            .appointments
            .iter()
            .map(|a| appointment_info(counselor_id, a))
            .collect())
    }

    /// Every appointment booked by `user_id`, across counselors.
    pub async fn user_appointments(
        &self,
        session: &Session,
        user_id: Ulid,
    ) -> Result<Vec<AppointmentInfo>, EngineError> {
        if !session.is_admin() && session.user_id() != Some(user_id) {
            return Err(EngineError::Unauthorized("not your appointments"));
        }
        let counselors: Vec<_> = self.counselors.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for cs in counselors {
            let guard = cs.read().await;
            out.extend(
                guard
                    .appointments
                    .iter()
                    .filter(|a| a.user_id == user_id)
                    .map(|a| appointment_info(guard.id, a)),
            );
        }
        out.sort_by_key(|a| (a.date, a.start));
        Ok(out)
    }
}

fn appointment_info(counselor_id: Ulid, a: &Appointment) -> AppointmentInfo {
    AppointmentInfo {
        id: a.id,
        user_id: a.user_id,
        counselor_id,
        date: a.date,
        start: a.start,
        end: a.end,
        status: a.status,
        notes: a.notes.clone(),
    }
}

/// Split into (upcoming, past). Upcoming means starting at or after `now` and not
/// cancelled; everything else is past. Input order is preserved on both sides.
pub fn partition_upcoming(
    appointments: Vec<AppointmentInfo>,
    now: NaiveDateTime,
) -> (Vec<AppointmentInfo>, Vec<AppointmentInfo>) {
    appointments
        .into_iter()
        .partition(|a| a.status != AppointmentStatus::Cancelled && a.starts_at() >= now)
}
