use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Day of week, 0–6 with Sunday = 0.
pub type DayOfWeek = u8;

pub fn day_of_week(date: NaiveDate) -> DayOfWeek {
    date.weekday().num_days_from_sunday() as DayOfWeek
}

/// Half-open time-of-day window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeWindow start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Start times of every whole-hour slot that fits entirely inside the window.
    pub fn hour_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        let first = if is_whole_hour(self.start) {
            self.start.hour()
        } else {
            self.start.hour() + 1
        };
        (first..24)
            .filter_map(Slot::at_hour)
            .take_while(move |slot| slot.end().is_some_and(|end| end <= self.end))
    }
}

pub fn is_whole_hour(t: NaiveTime) -> bool {
    t.minute() == 0 && t.second() == 0 && t.nanosecond() == 0
}

/// A one-hour bookable window, identified by its start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub start: NaiveTime,
}

impl Slot {
    pub fn at_hour(hour: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, 0, 0).map(|start| Self { start })
    }

    /// `None` for anything that is not a whole hour.
    pub fn from_start(start: NaiveTime) -> Option<Self> {
        is_whole_hour(start).then_some(Self { start })
    }

    /// One hour after `start`. `None` for the 23:00 slot, which would end at midnight.
    pub fn end(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.start.hour() + 1, 0, 0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.format("%H:%M:%S"))
    }
}

/// A recurring weekly open window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyRule {
    pub id: Ulid,
    pub day_of_week: DayOfWeek,
    pub window: TimeWindow,
    pub is_active: bool,
}

/// A date-specific exception to the weekly rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideKind {
    /// The whole date is unavailable.
    Blocked,
    /// These hours replace the weekly rules for the date.
    SpecialHours(TimeWindow),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateOverride {
    pub id: Ulid,
    pub date: NaiveDate,
    pub kind: OverrideKind,
    pub reason: Option<String>,
}

impl DateOverride {
    pub fn is_available(&self) -> bool {
        matches!(self.kind, OverrideKind::SpecialHours(_))
    }

    pub fn special_hours(&self) -> Option<TimeWindow> {
        match self.kind {
            OverrideKind::SpecialHours(window) => Some(window),
            OverrideKind::Blocked => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Only pending and confirmed appointments hold their slot.
    pub fn occupies_slot(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    /// `pending → confirmed → completed`, and `pending | confirmed → cancelled`.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "cancelled" | "canceled" => Ok(AppointmentStatus::Cancelled),
            "completed" => Ok(AppointmentStatus::Completed),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub id: Ulid,
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl Appointment {
    pub fn occupies(&self, date: NaiveDate, start: NaiveTime) -> bool {
        self.status.occupies_slot() && self.date == date && self.start == start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    Counselor,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" | "user" => Ok(Role::Client),
            "counselor" => Ok(Role::Counselor),
            other => Err(format!("unknown user_type: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Counselor => f.write_str("counselor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: Ulid,
    pub role: Role,
    pub full_name: Option<String>,
}

/// Everything the resolver needs for one counselor.
#[derive(Debug, Clone)]
pub struct CounselorState {
    pub id: Ulid,
    /// Sorted by `(day_of_week, window.start)`.
    pub weekly_rules: Vec<WeeklyRule>,
    /// Sorted by `date`, at most one per date.
    pub overrides: Vec<DateOverride>,
    /// Sorted by `(date, start)`. Cancelled and completed appointments are kept.
    pub appointments: Vec<Appointment>,
}

impl CounselorState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            weekly_rules: Vec::new(),
            overrides: Vec::new(),
            appointments: Vec::new(),
        }
    }

    pub fn insert_rule(&mut self, rule: WeeklyRule) {
        let key = (rule.day_of_week, rule.window.start);
        let pos = self
            .weekly_rules
            .partition_point(|r| (r.day_of_week, r.window.start) <= key);
        self.weekly_rules.insert(pos, rule);
    }

    pub fn remove_rule(&mut self, id: Ulid) -> Option<WeeklyRule> {
        let pos = self.weekly_rules.iter().position(|r| r.id == id)?;
        Some(self.weekly_rules.remove(pos))
    }

    pub fn rule_mut(&mut self, id: Ulid) -> Option<&mut WeeklyRule> {
        self.weekly_rules.iter_mut().find(|r| r.id == id)
    }

    /// Insert an override keeping date order. Caller guarantees the date is free.
    pub fn insert_override(&mut self, ov: DateOverride) {
        let pos = self
            .overrides
            .binary_search_by_key(&ov.date, |o| o.date)
            .unwrap_or_else(|e| e);
        self.overrides.insert(pos, ov);
    }

    pub fn remove_override(&mut self, id: Ulid) -> Option<DateOverride> {
        let pos = self.overrides.iter().position(|o| o.id == id)?;
        Some(self.overrides.remove(pos))
    }

    pub fn override_on(&self, date: NaiveDate) -> Option<&DateOverride> {
        self.overrides
            .binary_search_by_key(&date, |o| o.date)
            .ok()
            .map(|i| &self.overrides[i])
    }

    pub fn insert_appointment(&mut self, appt: Appointment) {
        let key = (appt.date, appt.start);
        let pos = self
            .appointments
            .partition_point(|a| (a.date, a.start) <= key);
        self.appointments.insert(pos, appt);
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments on `date`, found by binary search on the sorted list.
    pub fn appointments_on(&self, date: NaiveDate) -> &[Appointment] {
        let lo = self.appointments.partition_point(|a| a.date < date);
        let hi = self.appointments.partition_point(|a| a.date <= date);
        &self.appointments[lo..hi]
    }

    /// The pending or confirmed appointment holding `(date, start)`, if any.
    pub fn active_appointment_at(&self, date: NaiveDate, start: NaiveTime) -> Option<&Appointment> {
        self.appointments_on(date)
            .iter()
            .find(|a| a.occupies(date, start))
    }

    pub fn entity_count(&self) -> usize {
        self.weekly_rules.len() + self.overrides.len() + self.appointments.len()
    }
}

/// The event types, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProfileRegistered {
        id: Ulid,
        role: Role,
        full_name: Option<String>,
    },
    WeeklyRuleAdded {
        id: Ulid,
        counselor_id: Ulid,
        day_of_week: DayOfWeek,
        window: TimeWindow,
    },
    WeeklyRuleToggled {
        id: Ulid,
        counselor_id: Ulid,
        is_active: bool,
    },
    WeeklyRuleRemoved {
        id: Ulid,
        counselor_id: Ulid,
    },
    OverrideAdded {
        id: Ulid,
        counselor_id: Ulid,
        date: NaiveDate,
        kind: OverrideKind,
        reason: Option<String>,
    },
    OverrideRemoved {
        id: Ulid,
        counselor_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        counselor_id: Ulid,
        user_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        notes: Option<String>,
    },
    AppointmentStatusChanged {
        id: Ulid,
        counselor_id: Ulid,
        status: AppointmentStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyRuleInfo {
    pub id: Ulid,
    pub counselor_id: Ulid,
    pub day_of_week: DayOfWeek,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateOverrideInfo {
    pub id: Ulid,
    pub counselor_id: Ulid,
    pub date: NaiveDate,
    pub is_available: bool,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub id: Ulid,
    pub user_id: Ulid,
    pub counselor_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl AppointmentInfo {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateStatus {
    pub date: NaiveDate,
    pub blocked: bool,
    pub special_hours: Option<TimeWindow>,
    pub selectable: bool,
}
