mod activities;
mod conflict;
mod error;
mod finalize;
mod participation;
mod queries;
mod store;
mod volunteering;

pub use conflict::{check_shift_window, ConflictHit};
pub use error::{EngineError, ErrorKind};
pub use finalize::FinalizeReport;
pub use store::{SharedActivityState, Store};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::{Config, SchedulingPolicy};
use crate::directory::UserDirectory;
use crate::model::*;
use crate::wal::Wal;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// wait for one append, drain whatever else is already queued, write the
/// whole batch, fsync once, answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
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
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after an append error so half-buffered bytes don't leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL commit of {} events failed: {e}", batch.len());
    }

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

async fn join_commit<T>(task: JoinHandle<Result<T, EngineError>>) -> Result<T, EngineError> {
    task.await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
}

/// Locks a mutation keeps until its record is applied. They move into the
/// commit task, so a caller that gives up early cannot release them while
/// the record is still in flight.
pub(super) struct Held {
    _gate: OwnedRwLockReadGuard<()>,
    user: Option<(Ulid, OwnedMutexGuard<()>)>,
    store: Arc<Store>,
}

impl Drop for Held {
    fn drop(&mut self) {
        if let Some((user_id, guard)) = self.user.take() {
            drop(guard);
            self.store.prune_user_lock(user_id);
        }
    }
}

/// Knobs the engine needs from the process configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub policy: SchedulingPolicy,
    pub page_size: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::default(),
            page_size: 25,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            policy: config.policy,
            page_size: config.page_size,
        }
    }
}

/// The scheduling core: activity registry, shift conflict resolution,
/// volunteering ledger, participation lifecycle and finalization, over a
/// WAL-backed in-memory store.
///
/// Lock order is commit gate → user lock → one activity lock. No code path
/// holds two activity locks at once.
pub struct Engine {
    pub(super) store: Arc<Store>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every mutation and exclusively by compaction, so a
    /// snapshot never misses an event appended while it was being taken.
    pub(super) commit_gate: Arc<RwLock<()>>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) directory: Arc<dyn UserDirectory>,
    pub(super) settings: EngineSettings,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn UserDirectory>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Arc::new(Store::new()),
            wal_tx,
            commit_gate: Arc::new(RwLock::new(())),
            clock,
            directory,
            settings,
        };
        let replayed = events.len();
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {replayed} WAL events into {} activities",
            engine.store.activity_count()
        );
        Ok(engine)
    }

    /// We're the sole owner of every Arc during replay, so try_write always
    /// succeeds. Never block here: this may run inside a runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::ActivityCreated { activity, organizer } => {
                self.store.insert_activity(activity.clone(), organizer.clone());
            }
            other => {
                if let Some(shared) = self.store.get_activity(&other.activity_id())
                    && let Ok(mut guard) = shared.try_write()
                {
                    self.store.apply_event(&mut guard, other);
                }
            }
        }
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.settings.policy
    }

    /// Take the commit gate for a mutation.
    pub(super) async fn hold(&self) -> Held {
        Held {
            _gate: self.commit_gate.clone().read_owned().await,
            user: None,
            store: self.store.clone(),
        }
    }

    /// Take the commit gate and then `user_id`'s lock.
    pub(super) async fn hold_user(&self, user_id: Ulid) -> Held {
        let gate = self.commit_gate.clone().read_owned().await;
        let user = self.store.user_lock(user_id).lock_owned().await;
        Held {
            _gate: gate,
            user: Some((user_id, user)),
            store: self.store.clone(),
        }
    }

    /// WAL-append `event`, then apply it to the write-locked activity.
    ///
    /// Runs on its own task: once called it completes even if the caller is
    /// dropped, and `held` is released only after the event is applied.
    /// Returns the guard so the caller can read the result.
    pub(super) async fn commit(
        &self,
        mut st: OwnedRwLockWriteGuard<ActivityState>,
        event: Event,
        held: Held,
    ) -> Result<OwnedRwLockWriteGuard<ActivityState>, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        join_commit(tokio::spawn(async move {
            let _held = held;
            wal_append(&wal_tx, &event).await?;
            store.apply_event(&mut st, &event);
            Ok::<_, EngineError>(st)
        }))
        .await
    }

    /// `commit` for a new activity, which has no lock to hold yet.
    pub(super) async fn commit_created(
        &self,
        activity: Activity,
        organizer: Volunteering,
        held: Held,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        join_commit(tokio::spawn(async move {
            let _held = held;
            let event = Event::ActivityCreated {
                activity: activity.clone(),
                organizer: organizer.clone(),
            };
            wal_append(&wal_tx, &event).await?;
            store.insert_activity(activity, organizer);
            Ok::<_, EngineError>(())
        }))
        .await
    }

    /// Read-lock an activity. Fails if it was deleted while we waited.
    pub(super) async fn activity_read(&self, id: Ulid) -> Result<OwnedRwLockReadGuard<ActivityState>, EngineError> {
        let shared = self
            .store
            .get_activity(&id)
            .ok_or(EngineError::activity_not_found(id))?;
        let guard = shared.read_owned().await;
        if self.store.get_activity(&id).is_none() {
            return Err(EngineError::activity_not_found(id));
        }
        Ok(guard)
    }

    /// Write-lock an activity. Fails if it was deleted while we waited.
    pub(super) async fn activity_write(&self, id: Ulid) -> Result<OwnedRwLockWriteGuard<ActivityState>, EngineError> {
        let shared = self
            .store
            .get_activity(&id)
            .ok_or(EngineError::activity_not_found(id))?;
        let guard = shared.write_owned().await;
        if self.store.get_activity(&id).is_none() {
            return Err(EngineError::activity_not_found(id));
        }
        Ok(guard)
    }

    /// Lookup entity → activity, then write-lock that activity.
    pub(super) async fn resolve_entity_write(
        &self,
        entity: &'static str,
        entity_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ActivityState>, EngineError> {
        let activity_id = self
            .store
            .get_activity_for_entity(&entity_id)
            .ok_or(EngineError::NotFound { entity, id: entity_id })?;
        self.activity_write(activity_id).await.map_err(|e| match e {
            EngineError::NotFound { .. } => EngineError::NotFound { entity, id: entity_id },
            other => other,
        })
    }

    pub(super) async fn resolve_entity_read(
        &self,
        entity: &'static str,
        entity_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<ActivityState>, EngineError> {
        let activity_id = self
            .store
            .get_activity_for_entity(&entity_id)
            .ok_or(EngineError::NotFound { entity, id: entity_id })?;
        self.activity_read(activity_id).await.map_err(|e| match e {
            EngineError::NotFound { .. } => EngineError::NotFound { entity, id: entity_id },
            other => other,
        })
    }

    pub(super) async fn resolve_user(&self, id: Ulid) -> Result<User, EngineError> {
        self.directory
            .get_by_id(id)
            .await
            .ok_or(EngineError::NotFound { entity: "user", id })
    }

    /// Look a user up by login name, as the request layer does for the
    /// authenticated principal.
    pub async fn user_by_username(&self, username: &str) -> Result<User, EngineError> {
        self.directory
            .get_by_username(username)
            .await
            .ok_or_else(|| EngineError::UnknownUser(username.to_string()))
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();
        for id in self.store.activity_ids() {
            let Some(shared) = self.store.get_activity(&id) else { continue };
            let st = shared.read().await;
            let Some(organizer) = st.organizer().cloned() else {
                tracing::error!("compaction: activity {id} has no main organizer shift, skipping");
                continue;
            };
            events.push(Event::ActivityCreated {
                activity: st.activity.clone(),
                organizer,
            });
            events.extend(
                st.shifts
                    .iter()
                    .filter(|s| !s.is_main_organizer)
                    .map(|s| Event::ShiftAdded { shift: s.clone() }),
            );
            events.extend(st.participations.iter().map(|p| Event::ParticipationEnrolled {
                participation: p.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
