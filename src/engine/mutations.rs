use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::session::Session;

use super::conflict::{
    check_no_duplicate_rule, check_no_override, check_slot_bookable, today, validate_date,
    validate_day, validate_text, validate_window,
};
use super::{ConflictKind, Engine, EngineError, WalCommand};

fn require_manager(session: &Session, counselor_id: Ulid) -> Result<(), EngineError> {
    if !session.manages(counselor_id) {
        return Err(EngineError::Unauthorized(
            "only the counselor or an admin can change this schedule",
        ));
    }
    Ok(())
}

impl Engine {
    async fn counselor_write(
        &self,
        counselor_id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<CounselorState>, EngineError> {
        let cs = self
            .get_counselor(&counselor_id)
            .ok_or(EngineError::NotFound(counselor_id))?;
        let guard = cs.write_owned().await;
        if guard.entity_count() >= MAX_ENTITIES_PER_COUNSELOR {
            return Err(EngineError::LimitExceeded("too many entries for counselor"));
        }
        Ok(guard)
    }

    // ── Profiles ─────────────────────────────────────────────

    pub async fn register_profile(
        &self,
        session: &Session,
        id: Ulid,
        role: Role,
        full_name: Option<String>,
    ) -> Result<(), EngineError> {
        if !session.is_admin() {
            return Err(EngineError::Unauthorized("only an admin can register profiles"));
        }
        validate_text(&full_name, MAX_NAME_LEN, "full name too long")?;
        if self.profiles.len() >= MAX_PROFILES {
            return Err(EngineError::LimitExceeded("too many profiles"));
        }
        if role == Role::Counselor && self.counselors.len() >= MAX_COUNSELORS {
            return Err(EngineError::LimitExceeded("too many counselors"));
        }
        let _gate = self.write_gate.read().await;

        // Lock order: the `entity_to_counselor` shard, then `profiles`.
        {
            let Entry::Vacant(_entity) = self.entity_to_counselor.entry(id) else {
                return Err(ConflictKind::DuplicateId(id).into());
            };
            let Entry::Vacant(slot) = self.profiles.entry(id) else {
                return Err(ConflictKind::DuplicateId(id).into());
            };
            slot.insert(Profile { id, role, full_name: full_name.clone() });
        }

        let event = Event::ProfileRegistered { id, role, full_name };
        if let Err(e) = self.wal_append(&event).await {
            self.profiles.remove(&id);
            return Err(e);
        }
        if role == Role::Counselor {
            self.counselors
                .insert(id, Arc::new(RwLock::new(CounselorState::new(id))));
        }
        info!("registered {role} profile {id}");
        Ok(())
    }

    // ── Weekly rules ─────────────────────────────────────────

    pub async fn add_weekly_rule(
        &self,
        session: &Session,
        id: Ulid,
        counselor_id: Ulid,
        day_of_week: DayOfWeek,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<(), EngineError> {
        require_manager(session, counselor_id)?;
        validate_day(day_of_week)?;
        let window = validate_window(start, end)?;

        let _gate = self.write_gate.read().await;
        let mut guard = self.counselor_write(counselor_id).await?;
        if guard.weekly_rules.len() >= MAX_WEEKLY_RULES_PER_COUNSELOR {
            return Err(EngineError::LimitExceeded("too many weekly rules"));
        }
        check_no_duplicate_rule(&guard, day_of_week, &window)?;

        let event = Event::WeeklyRuleAdded { id, counselor_id, day_of_week, window };
        self.persist_new_entity(&mut guard, id, &event).await
    }

    pub async fn set_weekly_rule_active(
        &self,
        session: &Session,
        id: Ulid,
        is_active: bool,
    ) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let (counselor_id, mut guard) = self.resolve_entity_write(&id).await?;
        require_manager(session, counselor_id)?;
        let rule = guard
            .weekly_rules
            .iter()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;
        if is_active && !rule.is_active {
            let (day, window) = (rule.day_of_week, rule.window);
            check_no_duplicate_rule(&guard, day, &window)?;
        }

        let event = Event::WeeklyRuleToggled { id, counselor_id, is_active };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(counselor_id)
    }

    pub async fn remove_weekly_rule(&self, session: &Session, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let (counselor_id, mut guard) = self.resolve_entity_write(&id).await?;
        require_manager(session, counselor_id)?;
        if !guard.weekly_rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::WeeklyRuleRemoved { id, counselor_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(counselor_id)
    }

    // ── Date overrides ───────────────────────────────────────

    pub async fn block_date(
        &self,
        session: &Session,
        id: Ulid,
        counselor_id: Ulid,
        date: NaiveDate,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        self.add_override(session, id, counselor_id, date, OverrideKind::Blocked, reason)
            .await
    }

    pub async fn add_special_hours(
        &self,
        session: &Session,
        id: Ulid,
        counselor_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let window = validate_window(start, end)?;
        self.add_override(session, id, counselor_id, date, OverrideKind::SpecialHours(window), reason)
            .await
    }

    async fn add_override(
        &self,
        session: &Session,
        id: Ulid,
        counselor_id: Ulid,
        date: NaiveDate,
        kind: OverrideKind,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        require_manager(session, counselor_id)?;
        validate_date(date, today())?;
        validate_text(&reason, MAX_REASON_LEN, "reason too long")?;

        let _gate = self.write_gate.read().await;
        let mut guard = self.counselor_write(counselor_id).await?;
        check_no_override(&guard, date)?;

        let event = Event::OverrideAdded { id, counselor_id, date, kind, reason };
        self.persist_new_entity(&mut guard, id, &event).await
    }

    pub async fn remove_override(&self, session: &Session, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let (counselor_id, mut guard) = self.resolve_entity_write(&id).await?;
        require_manager(session, counselor_id)?;
        if !guard.overrides.iter().any(|o| o.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::OverrideRemoved { id, counselor_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(counselor_id)
    }

    // ── Booking ──────────────────────────────────────────────

    /// Book `start` on `date` for the session's user.
    ///
    /// The availability check and the insert happen under the counselor's write
    /// lock, so two requests for the same slot cannot both succeed: the second
    /// gets `Conflict(SlotTaken)`.
    pub async fn book_appointment(
        &self,
        session: &Session,
        id: Ulid,
        counselor_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        let Session::User { id: user_id, role: Role::Client } = *session else {
            return Err(EngineError::Unauthorized("appointments are booked by clients"));
        };
        let slot = Slot::from_start(start)
            .ok_or(EngineError::InvalidInput("appointments start on the hour"))?;
        let end = slot
            .end()
            .ok_or(EngineError::InvalidInput("appointment would end past midnight"))?;
        validate_date(date, today())?;
        validate_text(&notes, MAX_NOTES_LEN, "notes too long")?;

        let _gate = self.write_gate.read().await;
        let mut guard = self.counselor_write(counselor_id).await?;
        if let Err(e) = check_slot_bookable(&guard, date, slot) {
            if matches!(e, EngineError::Conflict(_)) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            }
            debug!("booking {id} refused: {e}");
            return Err(e);
        }

        let event = Event::AppointmentBooked {
            id,
            counselor_id,
            user_id,
            date,
            start,
            end,
            notes,
        };
        self.persist_new_entity(&mut guard, id, &event).await?;
        metrics::counter!(observability::APPOINTMENTS_BOOKED_TOTAL).increment(1);
        info!("appointment {id} booked with {counselor_id} on {date} at {slot}");
        Ok(())
    }

    // ── Appointment lifecycle ────────────────────────────────

    pub async fn confirm_appointment(&self, session: &Session, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition_appointment(session, id, AppointmentStatus::Confirmed).await
    }

    pub async fn complete_appointment(&self, session: &Session, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition_appointment(session, id, AppointmentStatus::Completed).await
    }

    pub async fn cancel_appointment(&self, session: &Session, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition_appointment(session, id, AppointmentStatus::Cancelled).await
    }

    /// Move an appointment along `pending → confirmed → completed`, or cancel it.
    /// Confirming and completing belong to the counselor; the booking user may also cancel.
    pub async fn transition_appointment(
        &self,
        session: &Session,
        id: Ulid,
        to: AppointmentStatus,
    ) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let (counselor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let appt = guard
            .appointments
            .iter()
            .find(|a| a.id == id)
            .ok_or(EngineError::NotFound(id))?;

        let allowed = match to {
            AppointmentStatus::Cancelled => session.can_see_appointment(counselor_id, appt.user_id),
            _ => session.manages(counselor_id),
        };
        if !allowed {
            return Err(EngineError::Unauthorized("not allowed to change this appointment"));
        }
        if !appt.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { from: appt.status, to });
        }

        let event = Event::AppointmentStatusChanged { id, counselor_id, status: to };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("appointment {id} is now {to}");
        Ok(counselor_id)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Mutations wait on the write gate until the new file is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let mut events: Vec<Event> = self
            .profiles
            .iter()
            .map(|p| Event::ProfileRegistered {
                id: p.id,
                role: p.role,
                full_name: p.full_name.clone(),
            })
            .collect();

        let counselors: Vec<_> = self.counselors.iter().map(|e| e.value().clone()).collect();
        for cs in counselors {
            let guard = cs.read().await;
            emit_counselor(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::TransportFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::TransportFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::TransportFailure(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn emit_counselor(cs: &CounselorState, events: &mut Vec<Event>) {
    let counselor_id = cs.id;
    for rule in &cs.weekly_rules {
        events.push(Event::WeeklyRuleAdded {
            id: rule.id,
            counselor_id,
            day_of_week: rule.day_of_week,
            window: rule.window,
        });
        if !rule.is_active {
            events.push(Event::WeeklyRuleToggled { id: rule.id, counselor_id, is_active: false });
        }
    }
    for ov in &cs.overrides {
        events.push(Event::OverrideAdded {
            id: ov.id,
            counselor_id,
            date: ov.date,
            kind: ov.kind,
            reason: ov.reason.clone(),
        });
    }
    for appt in &cs.appointments {
        events.push(Event::AppointmentBooked {
            id: appt.id,
            counselor_id,
            user_id: appt.user_id,
            date: appt.date,
            start: appt.start,
            end: appt.end,
            notes: appt.notes.clone(),
        });
        if appt.status != AppointmentStatus::Pending {
            events.push(Event::AppointmentStatusChanged {
                id: appt.id,
                counselor_id,
                status: appt.status,
            });
        }
    }
}
