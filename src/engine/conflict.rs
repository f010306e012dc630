use ulid::Ulid;

use crate::config::SchedulingPolicy;
use crate::model::*;

use super::{Engine, EngineError};

/// An existing shift that a proposal collides with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictHit {
    pub activity_id: Ulid,
    pub existing: Span,
}

/// Checks 1–4 of shift validation, in order; the first failure wins.
/// Needs only the activity row, so it is pure.
pub fn check_shift_window(
    activity: &Activity,
    start: Ms,
    end: Ms,
    policy: &SchedulingPolicy,
) -> Result<Span, EngineError> {
    if activity.is_finalized {
        return Err(EngineError::Finalized(activity.id));
    }
    if start >= end {
        return Err(EngineError::Ordering { start, end });
    }
    let window = Span::new(start, end);
    if !activity.span().contains_span(&window) {
        return Err(EngineError::OutOfRange {
            shift: window,
            activity: activity.span(),
        });
    }
    let duration = window.duration_ms();
    if duration < policy.min_shift || duration > policy.max_shift {
        return Err(EngineError::ShiftLength {
            duration,
            min: policy.min_shift,
            max: policy.max_shift,
        });
    }
    Ok(window)
}

impl Engine {
    /// First shift of `user_id` matching `pred` on a non-finalized activity
    /// other than `except` that overlaps `window`.
    ///
    /// Reads one activity at a time; callers must not hold an activity lock.
    pub(super) async fn shift_overlap(
        &self,
        user_id: Ulid,
        window: Span,
        except: Option<Ulid>,
        pred: impl Fn(&Volunteering) -> bool,
    ) -> Option<ConflictHit> {
        for activity_id in self.store.activities_with_shifts_of(&user_id) {
            if Some(activity_id) == except {
                continue;
            }
            let Ok(st) = self.activity_read(activity_id).await else { continue };
            if st.activity.is_finalized {
                continue;
            }
            let hit = st
                .overlapping(&window)
                .find(|s| s.user_id == user_id && pred(s))
                .map(|s| ConflictHit {
                    activity_id,
                    existing: s.span(),
                });
            if hit.is_some() {
                return hit;
            }
        }
        None
    }

    /// First main-organizer shift of `user_id` on a non-finalized activity
    /// overlapping `window`.
    pub(super) async fn organizer_conflict(&self, user_id: Ulid, window: Span) -> Option<ConflictHit> {
        self.shift_overlap(user_id, window, None, |s| s.is_main_organizer)
            .await
    }

    /// First shift of `user_id` on another non-finalized activity organized
    /// by `organizer_id` that overlaps `window`. Organizing shifts are exempt.
    ///
    /// Reads one activity at a time; callers must not hold an activity lock.
    pub(super) async fn same_organizer_conflict(
        &self,
        user_id: Ulid,
        organizer_id: Ulid,
        activity_id: Ulid,
        window: Span,
    ) -> Option<ConflictHit> {
        for other_id in self.store.activities_with_shifts_of(&user_id) {
            if other_id == activity_id {
                continue;
            }
            let Ok(st) = self.activity_read(other_id).await else { continue };
            if st.activity.is_finalized {
                continue;
            }
            if st.organizer().map(|o| o.user_id) != Some(organizer_id) {
                continue;
            }
            let hit = st
                .overlapping(&window)
                .find(|s| s.user_id == user_id && !s.is_main_organizer)
                .map(|s| ConflictHit {
                    activity_id: other_id,
                    existing: s.span(),
                });
            if hit.is_some() {
                return hit;
            }
        }
        None
    }

    /// The organizing shift of `user_id` on a non-finalized activity whose
    /// window overlaps `[start, end)`, if any.
    pub async fn check_organizer_conflict(&self, user_id: Ulid, start: Ms, end: Ms) -> Option<ConflictHit> {
        if start >= end {
            return None;
        }
        self.organizer_conflict(user_id, Span::new(start, end)).await
    }

    pub async fn has_organizer_conflict(&self, user_id: Ulid, start: Ms, end: Ms) -> bool {
        self.check_organizer_conflict(user_id, start, end).await.is_some()
    }

    /// An overlapping shift of `user_id` on a different non-finalized
    /// activity whose main organizer is `organizer_id`, if any.
    pub async fn check_same_organizer_conflict(
        &self,
        user_id: Ulid,
        organizer_id: Ulid,
        activity_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Option<ConflictHit> {
        if start >= end {
            return None;
        }
        self.same_organizer_conflict(user_id, organizer_id, activity_id, Span::new(start, end))
            .await
    }

    pub async fn has_same_organizer_conflict(
        &self,
        user_id: Ulid,
        organizer_id: Ulid,
        activity_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> bool {
        self.check_same_organizer_conflict(user_id, organizer_id, activity_id, start, end)
            .await
            .is_some()
    }

    /// Full validation of a proposed non-organizer shift against a snapshot
    /// of its activity. Must be called with the user's lock held and no
    /// activity lock held.
    pub(super) async fn validate_shift_against(
        &self,
        activity: &Activity,
        organizer_id: Ulid,
        start: Ms,
        end: Ms,
        user_id: Ulid,
    ) -> Result<Span, EngineError> {
        let window = check_shift_window(activity, start, end, &self.settings.policy)?;
        if let Some(hit) = self
            .shift_overlap(user_id, window, Some(activity.id), |s| s.is_main_organizer)
            .await
        {
            return Err(EngineError::OrganizerConflict {
                user_id,
                existing_activity: hit.activity_id,
                existing: hit.existing,
                proposed: window,
            });
        }
        if user_id != organizer_id
            && let Some(hit) = self
                .same_organizer_conflict(user_id, organizer_id, activity.id, window)
                .await
        {
            return Err(EngineError::SameOrganizerConflict {
                user_id,
                organizer_id,
                existing_activity: hit.activity_id,
                existing: hit.existing,
                proposed: window,
            });
        }
        Ok(window)
    }

    /// Check whether `user_id` could take `[start, end)` on `activity_id`
    /// without writing anything.
    pub async fn validate_shift(&self, activity_id: Ulid, start: Ms, end: Ms, user_id: Ulid) -> Result<(), EngineError> {
        let (activity, organizer_id) = self.activity_snapshot(activity_id).await?;
        self.validate_shift_against(&activity, organizer_id, start, end, user_id)
            .await
            .map(|_| ())
    }

    /// Clone an activity row and its organizer id, releasing the lock.
    pub(super) async fn activity_snapshot(&self, activity_id: Ulid) -> Result<(Activity, Ulid), EngineError> {
        let st = self.activity_read(activity_id).await?;
        let organizer_id = match st.organizer() {
            Some(o) => o.user_id,
            None => return Err(self.missing_organizer(activity_id)),
        };
        Ok((st.activity.clone(), organizer_id))
    }

    /// Build the consistency error for an activity without an organizer row
    /// and raise the alarm.
    pub(super) fn missing_organizer(&self, activity_id: Ulid) -> EngineError {
        tracing::error!("consistency violation: activity {activity_id} has no main organizer shift");
        metrics::counter!(crate::observability::CONSISTENCY_VIOLATIONS_TOTAL).increment(1);
        EngineError::MissingOrganizer(activity_id)
    }
}
