use ulid::Ulid;

use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    fn page_size(&self) -> u32 {
        self.settings.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub async fn get_activity(&self, id: Ulid) -> Result<Activity, EngineError> {
        let st = self.activity_read(id).await?;
        Ok(st.activity.clone())
    }

    /// Non-finalized activities in creation order.
    pub async fn list_active(&self, page: u32) -> Page<Activity> {
        let mut active = Vec::new();
        for id in self.store.activity_ids() {
            let Ok(st) = self.activity_read(id).await else { continue };
            if !st.activity.is_finalized {
                active.push(st.activity.clone());
            }
        }
        Page::from_sorted(active, page, self.page_size())
    }

    pub async fn get_shift(&self, id: Ulid) -> Result<Volunteering, EngineError> {
        let st = self.resolve_entity_read("shift", id).await?;
        st.shift(id)
            .cloned()
            .ok_or(EngineError::NotFound { entity: "shift", id })
    }

    /// The user's shifts on activities that are still open, earliest first.
    pub async fn my_pending_shifts(&self, user_id: Ulid, page: u32) -> Page<Volunteering> {
        let mut shifts = Vec::new();
        for activity_id in self.store.activities_with_shifts_of(&user_id) {
            let Ok(st) = self.activity_read(activity_id).await else { continue };
            if st.activity.is_finalized {
                continue;
            }
            shifts.extend(st.shifts.iter().filter(|s| s.user_id == user_id).cloned());
        }
        shifts.sort_by_key(|s| (s.start_shift, s.id));
        Page::from_sorted(shifts, page, self.page_size())
    }

    /// Every shift of an activity in creation order. Only the activity's
    /// main organizer and administrators may list them.
    pub async fn shifts_for_activity(
        &self,
        activity_id: Ulid,
        requester: &User,
        page: u32,
    ) -> Result<Page<Volunteering>, EngineError> {
        let st = self.activity_read(activity_id).await?;
        let organizer_id = match st.organizer() {
            Some(o) => o.user_id,
            None => return Err(self.missing_organizer(activity_id)),
        };
        if !requester.is_admin && requester.id != organizer_id {
            return Err(EngineError::Forbidden(
                "only the main organizer or an administrator can list an activity's shifts",
            ));
        }
        let mut shifts = st.shifts.clone();
        drop(st);
        shifts.sort_by_key(|s| s.id);
        Ok(Page::from_sorted(shifts, page, self.page_size()))
    }

    pub async fn get_participation(&self, id: Ulid) -> Result<Participation, EngineError> {
        let st = self.resolve_entity_read("participation", id).await?;
        st.participation(id)
            .cloned()
            .ok_or(EngineError::NotFound {
                entity: "participation",
                id,
            })
    }

    /// The user's live enrolments: not cancelled, on activities that are not
    /// finalized. Creation order.
    pub async fn my_participations(&self, user_id: Ulid, page: u32) -> Page<Participation> {
        let mut rows = self.store.participations_of(&user_id);
        rows.sort();

        let mut items = Vec::new();
        for (participation_id, activity_id) in rows {
            let Ok(st) = self.activity_read(activity_id).await else { continue };
            if st.activity.is_finalized {
                continue;
            }
            if let Some(p) = st.participation(participation_id)
                && p.state != ParticipationState::Cancelled
            {
                items.push(p.clone());
            }
        }
        Page::from_sorted(items, page, self.page_size())
    }
}
