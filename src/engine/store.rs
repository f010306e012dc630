use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;

pub type SharedActivityState = Arc<RwLock<ActivityState>>;

/// In-memory datastore: one lockable `ActivityState` per activity plus the
/// reverse indexes needed to find rows by id or by user.
pub struct Store {
    activities: DashMap<Ulid, SharedActivityState>,
    /// Shift or participation id → owning activity id.
    entity_to_activity: DashMap<Ulid, Ulid>,
    /// User id → (shift id, activity id).
    user_shifts: DashMap<Ulid, Vec<(Ulid, Ulid)>>,
    /// User id → (participation id, activity id).
    user_participations: DashMap<Ulid, Vec<(Ulid, Ulid)>>,
    /// Serializes validate+write on one user's shift set.
    user_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            activities: DashMap::new(),
            entity_to_activity: DashMap::new(),
            user_shifts: DashMap::new(),
            user_participations: DashMap::new(),
            user_locks: DashMap::new(),
        }
    }

    // ── Activities ───────────────────────────────────────────

    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }

    pub fn get_activity(&self, id: &Ulid) -> Option<SharedActivityState> {
        self.activities.get(id).map(|e| e.value().clone())
    }

    /// Ids in ascending order, which for ULIDs is creation order.
    pub fn activity_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.activities.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn insert_activity(&self, activity: Activity, organizer: Volunteering) {
        let id = activity.id;
        let mut st = ActivityState::new(activity);
        self.index_shift(&organizer);
        st.insert_shift(organizer);
        self.activities.insert(id, Arc::new(RwLock::new(st)));
    }

    /// Drop an activity and every index entry pointing at its rows.
    /// Caller holds the activity's write lock (or is the sole owner).
    pub fn remove_activity(&self, st: &ActivityState) {
        for shift in &st.shifts {
            self.unindex_shift(shift.id, shift.user_id);
        }
        for p in &st.participations {
            self.unindex_participation(p.id, p.user_id);
        }
        self.activities.remove(&st.activity.id);
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn get_activity_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_activity.get(entity_id).map(|e| *e.value())
    }

    fn index_shift(&self, shift: &Volunteering) {
        self.entity_to_activity.insert(shift.id, shift.activity_id);
        self.user_shifts
            .entry(shift.user_id)
            .or_default()
            .push((shift.id, shift.activity_id));
    }

    fn unindex_shift(&self, shift_id: Ulid, user_id: Ulid) {
        self.entity_to_activity.remove(&shift_id);
        if let Some(mut shifts) = self.user_shifts.get_mut(&user_id) {
            shifts.retain(|(id, _)| *id != shift_id);
        }
        self.user_shifts.remove_if(&user_id, |_, shifts| shifts.is_empty());
    }

    fn index_participation(&self, p: &Participation) {
        self.entity_to_activity.insert(p.id, p.activity_id);
        self.user_participations
            .entry(p.user_id)
            .or_default()
            .push((p.id, p.activity_id));
    }

    fn unindex_participation(&self, participation_id: Ulid, user_id: Ulid) {
        self.entity_to_activity.remove(&participation_id);
        if let Some(mut rows) = self.user_participations.get_mut(&user_id) {
            rows.retain(|(id, _)| *id != participation_id);
        }
        self.user_participations.remove_if(&user_id, |_, rows| rows.is_empty());
    }

    // ── User indexes ─────────────────────────────────────────

    /// Distinct activities in which `user_id` holds shifts.
    pub fn activities_with_shifts_of(&self, user_id: &Ulid) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self
            .user_shifts
            .get(user_id)
            .map(|e| e.value().iter().map(|(_, aid)| *aid).collect())
            .unwrap_or_default();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn participations_of(&self, user_id: &Ulid) -> Vec<(Ulid, Ulid)> {
        self.user_participations
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// The mutex guarding `user_id`'s shift set. Created on first use.
    pub fn user_lock(&self, user_id: Ulid) -> Arc<Mutex<()>> {
        self.user_locks.entry(user_id).or_default().clone()
    }

    /// Forget `user_id`'s mutex once nobody holds or waits on it.
    pub fn prune_user_lock(&self, user_id: Ulid) {
        self.user_locks.remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn user_lock_count(&self) -> usize {
        self.user_locks.len()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event to an existing activity. No locking here: caller holds
    /// the lock. Creation is handled by `insert_activity`.
    pub fn apply_event(&self, st: &mut ActivityState, event: &Event) {
        match event {
            Event::ShiftAdded { shift } => {
                self.index_shift(shift);
                st.insert_shift(shift.clone());
            }
            Event::ShiftUpdated {
                id,
                span,
                activity_role,
                ..
            } => {
                if let Some(mut shift) = st.remove_shift(*id) {
                    shift.start_shift = span.start;
                    shift.end_shift = span.end;
                    shift.activity_role = activity_role.clone();
                    st.insert_shift(shift);
                }
            }
            Event::ShiftRemoved { id, .. } => {
                if let Some(shift) = st.remove_shift(*id) {
                    self.unindex_shift(*id, shift.user_id);
                }
            }
            Event::ParticipationEnrolled { participation } => {
                self.index_participation(participation);
                st.participations.push(participation.clone());
            }
            Event::ParticipationStarted { id, at, .. } => {
                if let Some(p) = st.participation_mut(*id) {
                    p.state = ParticipationState::InProgress;
                    p.start_at = Some(*at);
                }
            }
            Event::ParticipationCancelled { id, at, .. } => {
                if let Some(p) = st.participation_mut(*id) {
                    p.state = ParticipationState::Cancelled;
                    p.end_at = Some(*at);
                }
            }
            Event::ParticipationRemoved { id, .. } => {
                if let Some(p) = st.remove_participation(*id) {
                    self.unindex_participation(p.id, p.user_id);
                }
            }
            Event::ActivityFinalized {
                at,
                completed,
                cancelled,
                ..
            } => {
                st.activity.is_finalized = true;
                for id in completed {
                    if let Some(p) = st.participation_mut(*id) {
                        p.state = ParticipationState::Completed;
                        p.end_at = Some(*at);
                    }
                }
                // Automatic cancellation leaves end_at unset.
                for id in cancelled {
                    if let Some(p) = st.participation_mut(*id) {
                        p.state = ParticipationState::Cancelled;
                    }
                }
            }
            Event::ActivityDeleted { .. } => self.remove_activity(st),
            Event::ActivityCreated { .. } => {}
        }
    }
}
