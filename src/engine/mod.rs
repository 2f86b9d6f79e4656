mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{
    available_slots, has_any_availability, is_date_blocked, is_date_selectable, special_availability,
};
pub use error::{ConflictKind, EngineError};
pub use queries::partition_upcoming;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedCounselorState = Arc<RwLock<CounselorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub(super) counselors: DashMap<Ulid, SharedCounselorState>,
    pub(super) profiles: DashMap<Ulid, Profile>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: entity (rule/override/appointment) id → counselor id
    pub(super) entity_to_counselor: DashMap<Ulid, Ulid>,
    /// Mutations hold this for read from validation until apply. Compaction
    /// holds it for write so no append lands between snapshot and swap.
    /// Always taken before any counselor lock.
    pub(super) write_gate: RwLock<()>,
}

/// Apply an event to one counselor's state (no locking, caller holds the lock).
fn apply_to_counselor(cs: &mut CounselorState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WeeklyRuleAdded {
            id,
            counselor_id,
            day_of_week,
            window,
        } => {
            cs.insert_rule(WeeklyRule {
                id: *id,
                day_of_week: *day_of_week,
                window: *window,
                is_active: true,
            });
            entity_map.insert(*id, *counselor_id);
        }
        Event::WeeklyRuleToggled { id, is_active, .. } => {
            if let Some(rule) = cs.rule_mut(*id) {
                rule.is_active = *is_active;
            }
        }
        Event::WeeklyRuleRemoved { id, .. } => {
            cs.remove_rule(*id);
            entity_map.remove(id);
        }
        Event::OverrideAdded {
            id,
            counselor_id,
            date,
            kind,
            reason,
        } => {
            cs.insert_override(DateOverride {
                id: *id,
                date: *date,
                kind: *kind,
                reason: reason.clone(),
            });
            entity_map.insert(*id, *counselor_id);
        }
        Event::OverrideRemoved { id, .. } => {
            cs.remove_override(*id);
            entity_map.remove(id);
        }
        Event::AppointmentBooked {
            id,
            counselor_id,
            user_id,
            date,
            start,
            end,
            notes,
        } => {
            cs.insert_appointment(Appointment {
                id: *id,
                user_id: *user_id,
                date: *date,
                start: *start,
                end: *end,
                status: AppointmentStatus::Pending,
                notes: notes.clone(),
            });
            entity_map.insert(*id, *counselor_id);
        }
        Event::AppointmentStatusChanged { id, status, .. } => {
            if let Some(appt) = cs.appointment_mut(*id) {
                appt.status = *status;
            }
        }
        // Profiles live in their own map, not on a counselor
        Event::ProfileRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            counselors: DashMap::new(),
            profiles: DashMap::new(),
            wal_tx,
            entity_to_counselor: DashMap::new(),
            write_gate: RwLock::new(()),
        };

        // We are the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never blocking_write: this may run inside an async context.
        for event in &events {
            match event {
                Event::ProfileRegistered { .. } => engine.register_profile_state(event),
                other => {
                    if let Some(counselor_id) = event_counselor_id(other)
                        && let Some(entry) = engine.counselors.get(&counselor_id) {
                            let cs = entry.clone();
                            let mut guard = cs.try_write().expect("replay: uncontended write");
                            apply_to_counselor(&mut guard, other, &engine.entity_to_counselor);
                        }
                }
            }
        }

        info!(
            "replayed {} events: {} profiles, {} counselors",
            events.len(),
            engine.profiles.len(),
            engine.counselors.len()
        );
        Ok(engine)
    }

    fn register_profile_state(&self, event: &Event) {
        if let Event::ProfileRegistered { id, role, full_name } = event {
            self.profiles.insert(
                *id,
                Profile {
                    id: *id,
                    role: *role,
                    full_name: full_name.clone(),
                },
            );
            if *role == Role::Counselor {
                self.counselors
                    .insert(*id, Arc::new(RwLock::new(CounselorState::new(*id))));
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::TransportFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::TransportFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::TransportFailure(e.to_string()))
    }

    pub fn get_counselor(&self, id: &Ulid) -> Option<SharedCounselorState> {
        self.counselors.get(id).map(|e| e.value().clone())
    }

    pub fn get_profile(&self, id: &Ulid) -> Option<Profile> {
        self.profiles.get(id).map(|e| e.value().clone())
    }

    pub fn get_counselor_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_counselor.get(entity_id).map(|e| *e.value())
    }

    /// Claim a fresh id for a new rule, override or appointment of `counselor_id`.
    /// Lock order: the `entity_to_counselor` shard, then `profiles`.
    pub(super) fn reserve_entity_id(&self, id: Ulid, counselor_id: Ulid) -> Result<(), EngineError> {
        let Entry::Vacant(slot) = self.entity_to_counselor.entry(id) else {
            return Err(ConflictKind::DuplicateId(id).into());
        };
        if self.profiles.contains_key(&id) {
            return Err(ConflictKind::DuplicateId(id).into());
        }
        slot.insert(counselor_id);
        Ok(())
    }

    /// Persist an event that creates entity `id`. The id is reserved first and
    /// released again if the WAL append fails.
    pub(super) async fn persist_new_entity(
        &self,
        cs: &mut CounselorState,
        id: Ulid,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.reserve_entity_id(id, cs.id)?;
        if let Err(e) = self.persist_and_apply(cs, event).await {
            self.entity_to_counselor.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// WAL-append then apply, in one call.
    pub(super) async fn persist_and_apply(
        &self,
        cs: &mut CounselorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_counselor(cs, event, &self.entity_to_counselor);
        Ok(())
    }

    /// Lookup entity → counselor, get counselor, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<CounselorState>), EngineError> {
        let counselor_id = self
            .get_counselor_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let cs = self
            .get_counselor(&counselor_id)
            .ok_or(EngineError::NotFound(counselor_id))?;
        let guard = cs.write_owned().await;
        Ok((counselor_id, guard))
    }
}

/// The counselor an event belongs to (None for profile events).
fn event_counselor_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::WeeklyRuleAdded { counselor_id, .. }
        | Event::WeeklyRuleToggled { counselor_id, .. }
        | Event::WeeklyRuleRemoved { counselor_id, .. }
        | Event::OverrideAdded { counselor_id, .. }
        | Event::OverrideRemoved { counselor_id, .. }
        | Event::AppointmentBooked { counselor_id, .. }
        | Event::AppointmentStatusChanged { counselor_id, .. } => Some(*counselor_id),
        Event::ProfileRegistered { .. } => None,
    }
}
