use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictKind {
    #[error("slot already booked by appointment {0}")]
    SlotTaken(Ulid),
    #[error("this time slot already exists (rule {0})")]
    DuplicateRule(Ulid),
    #[error("date {0} already has an override")]
    DuplicateOverride(NaiveDate),
    #[error("id already in use: {0}")]
    DuplicateId(Ulid),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("conflict: {0}")]
    Conflict(ConflictKind),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("slot {start} on {date} is not available")]
    SlotUnavailable { date: NaiveDate, start: NaiveTime },
    #[error("cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store failure: {0}")]
    TransportFailure(String),
}

impl From<ConflictKind> for EngineError {
    fn from(kind: ConflictKind) -> Self {
        EngineError::Conflict(kind)
    }
}
