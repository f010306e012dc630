use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, SHIFTS_CREATED_TOTAL};

use super::{Engine, EngineError};

fn validate_role(role: &str) -> Result<(), EngineError> {
    if role.trim().is_empty() {
        return Err(EngineError::InvalidField("activity role must not be empty"));
    }
    if role.chars().count() > MAX_ROLE_LEN {
        return Err(EngineError::LimitExceeded("activity role too long"));
    }
    Ok(())
}

/// Pass scheduling rejections through, counting them on the way.
fn counted<T>(result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(e) = &result {
        observability::record_rejection(e);
    }
    result
}

impl Engine {
    /// Sign `draft.user_id` up for a shift. The requester must be that user,
    /// the activity's main organizer, or an administrator.
    pub async fn create_shift(&self, draft: ShiftDraft, requester: &User) -> Result<Volunteering, EngineError> {
        validate_role(&draft.activity_role)?;
        if requester.id != draft.user_id && !requester.is_admin {
            let organizer_id = self.find_organizer(draft.activity_id).await?;
            if organizer_id != requester.id {
                return Err(EngineError::Forbidden(
                    "only the volunteer, the main organizer or an administrator can add this shift",
                ));
            }
        }
        self.commit_shift(draft).await
    }

    /// Add several shifts to one activity on behalf of its main organizer or
    /// an administrator.
    ///
    /// Every element must target `activity_id`; that is checked before
    /// anything is written. Elements are then committed one at a time, each
    /// as its own WAL record. The first failing element stops the batch and
    /// is returned as the error: shifts committed before it stay committed.
    pub async fn create_batch(
        &self,
        activity_id: Ulid,
        drafts: Vec<ShiftDraft>,
        requester: &User,
    ) -> Result<Vec<Volunteering>, EngineError> {
        if drafts.is_empty() {
            return Err(EngineError::EmptyBatch);
        }
        if drafts.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        if let Some(stray) = drafts.iter().find(|d| d.activity_id != activity_id) {
            let err = EngineError::BatchMismatch {
                expected: activity_id,
                found: stray.activity_id,
            };
            observability::record_rejection(&err);
            return Err(err);
        }
        if !requester.is_admin && self.find_organizer(activity_id).await? != requester.id {
            return Err(EngineError::Forbidden(
                "only the main organizer or an administrator can add shifts in bulk",
            ));
        }

        let total = drafts.len();
        let mut created = Vec::with_capacity(total);
        for draft in drafts {
            let result = match validate_role(&draft.activity_role) {
                Ok(()) => self.commit_shift(draft).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(shift) => created.push(shift),
                Err(e) => {
                    tracing::warn!(
                        "shift batch for activity {activity_id} stopped at element {} of {total}: {e}",
                        created.len() + 1
                    );
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    /// Validate and commit one non-organizer shift, holding the user's lock
    /// for the whole check-then-write.
    async fn commit_shift(&self, draft: ShiftDraft) -> Result<Volunteering, EngineError> {
        let user = self.resolve_user(draft.user_id).await?;
        if !user.is_active {
            return Err(EngineError::InactiveUser(user.id));
        }

        let held = self.hold_user(user.id).await;

        let (activity, organizer_id) = self.activity_snapshot(draft.activity_id).await?;
        let window = counted(
            self.validate_shift_against(&activity, organizer_id, draft.start_shift, draft.end_shift, user.id)
                .await,
        )?;

        let st = self.activity_write(draft.activity_id).await?;
        // The finalizer does not take user locks, so re-check under the activity lock.
        if st.activity.is_finalized {
            return Err(EngineError::Finalized(draft.activity_id));
        }
        let shift = Volunteering {
            id: Ulid::new(),
            activity_id: draft.activity_id,
            user_id: user.id,
            start_shift: window.start,
            end_shift: window.end,
            activity_role: draft.activity_role,
            is_main_organizer: false,
        };
        self.commit(st, Event::ShiftAdded { shift: shift.clone() }, held)
            .await?;

        metrics::counter!(SHIFTS_CREATED_TOTAL).increment(1);
        tracing::debug!(
            "shift {} for {} on activity {} at {window}",
            shift.id,
            user.username,
            shift.activity_id
        );
        Ok(shift)
    }

    /// Move a shift to a new window and role, re-running validation against
    /// the new window. The main organizer's shift cannot be changed.
    pub async fn update_shift(
        &self,
        id: Ulid,
        new_start: Ms,
        new_end: Ms,
        new_role: String,
    ) -> Result<Volunteering, EngineError> {
        validate_role(&new_role)?;
        let current = self.get_shift(id).await?;
        if current.is_main_organizer {
            return Err(EngineError::ImmutableOrganizerShift(id));
        }

        let held = self.hold_user(current.user_id).await;

        let (activity, organizer_id) = self.activity_snapshot(current.activity_id).await?;
        let window = counted(
            self.validate_shift_against(&activity, organizer_id, new_start, new_end, current.user_id)
                .await,
        )?;

        let st = self.activity_write(current.activity_id).await?;
        if st.activity.is_finalized {
            return Err(EngineError::Finalized(current.activity_id));
        }
        if st.shift(id).is_none() {
            return Err(EngineError::NotFound { entity: "shift", id });
        }
        let event = Event::ShiftUpdated {
            id,
            activity_id: current.activity_id,
            span: window,
            activity_role: new_role,
        };
        let st = self.commit(st, event, held).await?;
        st.shift(id)
            .cloned()
            .ok_or(EngineError::NotFound { entity: "shift", id })
    }

    /// Remove a shift. The main organizer's shift goes only with its
    /// activity; finalized activities are read-only except to administrators;
    /// otherwise only the volunteer or an administrator may remove it.
    pub async fn delete_shift(&self, id: Ulid, requester: &User) -> Result<(), EngineError> {
        let held = self.hold().await;
        let st = self.resolve_entity_write("shift", id).await?;
        let shift = st
            .shift(id)
            .cloned()
            .ok_or(EngineError::NotFound { entity: "shift", id })?;

        if shift.is_main_organizer {
            return Err(EngineError::ImmutableOrganizerShift(id));
        }
        if st.activity.is_finalized && !requester.is_admin {
            return Err(EngineError::Finalized(shift.activity_id));
        }
        if !requester.is_admin && requester.id != shift.user_id {
            return Err(EngineError::NotOwner {
                entity: "shift",
                id,
                user_id: requester.id,
            });
        }

        let event = Event::ShiftRemoved {
            id,
            activity_id: shift.activity_id,
        };
        self.commit(st, event, held).await.map(|_| ())
    }

    /// The user id holding the activity's main-organizer shift.
    pub async fn find_organizer(&self, activity_id: Ulid) -> Result<Ulid, EngineError> {
        let st = self.activity_read(activity_id).await?;
        match st.organizer() {
            Some(o) => Ok(o.user_id),
            None => Err(self.missing_organizer(activity_id)),
        }
    }

    pub async fn is_user_organizer(&self, activity_id: Ulid, user_id: Ulid) -> Result<bool, EngineError> {
        Ok(self.find_organizer(activity_id).await? == user_id)
    }
}
