use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, ACTIVITIES_CREATED_TOTAL, ACTIVITIES_DELETED_TOTAL};

use super::{Engine, EngineError};

/// Text checks shared by every entry point that takes an `ActivityDraft`.
fn validate_draft_text(draft: &ActivityDraft) -> Result<(), EngineError> {
    let fields = [
        (&draft.title, MAX_TITLE_LEN, "title must not be empty", "title too long"),
        (
            &draft.description,
            MAX_DESCRIPTION_LEN,
            "description must not be empty",
            "description too long",
        ),
        (&draft.location, MAX_LOCATION_LEN, "location must not be empty", "location too long"),
    ];
    for (value, max, empty_msg, long_msg) in fields {
        if value.trim().is_empty() {
            return Err(EngineError::InvalidField(empty_msg));
        }
        if value.chars().count() > max {
            return Err(EngineError::LimitExceeded(long_msg));
        }
    }
    Ok(())
}

impl Engine {
    /// Create an activity and make `creator` its main organizer over the
    /// whole window. The activity and the organizer shift are one WAL record:
    /// either both exist afterwards or neither does.
    pub async fn create_activity(&self, draft: ActivityDraft, creator: &User) -> Result<Activity, EngineError> {
        validate_draft_text(&draft)?;
        let policy = self.settings.policy;
        let now = self.now();

        let earliest = now + policy.min_lead_time;
        if draft.start_at < earliest {
            return Err(EngineError::LeadTime {
                start_at: draft.start_at,
                earliest,
            });
        }
        if draft.start_at >= draft.end_at {
            return Err(EngineError::Ordering {
                start: draft.start_at,
                end: draft.end_at,
            });
        }
        let duration = draft.end_at - draft.start_at;
        if duration < policy.min_activity_duration {
            return Err(EngineError::ActivityTooShort {
                duration,
                min: policy.min_activity_duration,
            });
        }
        if !creator.is_active {
            return Err(EngineError::InactiveUser(creator.id));
        }

        let held = self.hold_user(creator.id).await;

        let activity = Activity {
            id: Ulid::new(),
            title: draft.title,
            description: draft.description,
            location: draft.location,
            is_on_site: draft.is_on_site,
            start_at: draft.start_at,
            end_at: draft.end_at,
            is_finalized: false,
        };
        let organizer = self.attach_organizer(&activity, creator.id).await?;

        self.commit_created(activity.clone(), organizer, held).await?;

        metrics::counter!(ACTIVITIES_CREATED_TOTAL).increment(1);
        tracing::info!(
            "activity {} created by {} for {}",
            activity.id,
            creator.username,
            activity.span()
        );
        Ok(activity)
    }

    /// Build the main-organizer shift for a not-yet-stored activity, refusing
    /// if any shift the user holds on a live activity overlaps it. Caller
    /// holds the user's lock and writes nothing when this fails.
    pub(super) async fn attach_organizer(&self, activity: &Activity, user_id: Ulid) -> Result<Volunteering, EngineError> {
        let window = activity.span();
        if let Some(hit) = self.shift_overlap(user_id, window, None, |_| true).await {
            let err = EngineError::OrganizerConflict {
                user_id,
                existing_activity: hit.activity_id,
                existing: hit.existing,
                proposed: window,
            };
            observability::record_rejection(&err);
            return Err(err);
        }
        Ok(Volunteering {
            id: Ulid::new(),
            activity_id: activity.id,
            user_id,
            start_shift: activity.start_at,
            end_shift: activity.end_at,
            activity_role: ORGANIZER_ROLE.to_string(),
            is_main_organizer: true,
        })
    }

    /// Delete an activity with all its shifts and participations. Only its
    /// main organizer or an administrator may do this.
    pub async fn delete_activity(&self, id: Ulid, requester: &User) -> Result<(), EngineError> {
        let held = self.hold().await;
        let st = self.activity_write(id).await?;
        let organizer_id = match st.organizer() {
            Some(o) => o.user_id,
            None => return Err(self.missing_organizer(id)),
        };
        if !requester.is_admin && requester.id != organizer_id {
            return Err(EngineError::Forbidden(
                "only the main organizer or an administrator can delete an activity",
            ));
        }

        let (shifts, participations) = (st.shifts.len(), st.participations.len());
        self.commit(st, Event::ActivityDeleted { id }, held).await?;
        metrics::counter!(ACTIVITIES_DELETED_TOTAL).increment(1);
        tracing::info!(
            "activity {id} deleted by {} ({shifts} shifts, {participations} participations)",
            requester.username
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str) -> ActivityDraft {
        ActivityDraft {
            title: title.into(),
            description: "Plant trees along the river".into(),
            location: "Riverside park".into(),
            is_on_site: true,
            start_at: 0,
            end_at: HOUR_MS,
        }
    }

    #[test]
    fn draft_text_rules() {
        assert!(validate_draft_text(&draft("Tree planting")).is_ok());
        assert!(matches!(
            validate_draft_text(&draft("   ")),
            Err(EngineError::InvalidField(_))
        ));
        assert!(matches!(
            validate_draft_text(&draft(&"x".repeat(MAX_TITLE_LEN + 1))),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_draft_text(&draft(&"ñ".repeat(MAX_TITLE_LEN))).is_ok());
    }
}
