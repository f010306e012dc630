use ulid::Ulid;

use crate::model::*;
use crate::observability::PARTICIPATION_TRANSITIONS_TOTAL;

use super::{Engine, EngineError};

fn count_transition(to: ParticipationState) {
    metrics::counter!(PARTICIPATION_TRANSITIONS_TOTAL, "to" => to.label()).increment(1);
}

impl Engine {
    /// Register `user` as a participant. Allowed only before the activity
    /// starts and while it is not finalized.
    pub async fn enroll(&self, activity_id: Ulid, user: &User) -> Result<Participation, EngineError> {
        if !user.is_active {
            return Err(EngineError::InactiveUser(user.id));
        }
        let held = self.hold().await;
        let st = self.activity_write(activity_id).await?;
        if st.activity.is_finalized {
            return Err(EngineError::Finalized(activity_id));
        }
        let now = self.now();
        if st.activity.start_at <= now {
            return Err(EngineError::AlreadyStarted {
                activity_id,
                start_at: st.activity.start_at,
            });
        }

        let participation = Participation {
            id: Ulid::new(),
            activity_id,
            user_id: user.id,
            registered_at: now,
            start_at: None,
            end_at: None,
            state: ParticipationState::Pending,
        };
        let event = Event::ParticipationEnrolled {
            participation: participation.clone(),
        };
        self.commit(st, event, held).await?;
        count_transition(ParticipationState::Pending);
        tracing::debug!("{} enrolled in activity {activity_id}", user.username);
        Ok(participation)
    }

    /// Pending → InProgress, stamping `start_at`.
    pub async fn begin(&self, id: Ulid, requester: &User) -> Result<Participation, EngineError> {
        self.transition(id, requester, ParticipationState::InProgress).await
    }

    /// Pending | InProgress → Cancelled, stamping `end_at`.
    pub async fn cancel(&self, id: Ulid, requester: &User) -> Result<Participation, EngineError> {
        self.transition(id, requester, ParticipationState::Cancelled).await
    }

    async fn transition(
        &self,
        id: Ulid,
        requester: &User,
        to: ParticipationState,
    ) -> Result<Participation, EngineError> {
        let held = self.hold().await;
        let st = self.resolve_entity_write("participation", id).await?;
        let current = st.participation(id).cloned().ok_or(EngineError::NotFound {
            entity: "participation",
            id,
        })?;
        check_owner(&current, requester)?;
        if st.activity.is_finalized {
            return Err(EngineError::Finalized(current.activity_id));
        }
        if !current.state.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.state,
                to,
            });
        }

        let at = self.now();
        let event = match to {
            ParticipationState::InProgress => Event::ParticipationStarted {
                id,
                activity_id: current.activity_id,
                at,
            },
            ParticipationState::Cancelled => Event::ParticipationCancelled {
                id,
                activity_id: current.activity_id,
                at,
            },
            // Completion only happens through finalization.
            ParticipationState::Pending | ParticipationState::Completed => {
                return Err(EngineError::InvalidTransition {
                    id,
                    from: current.state,
                    to,
                });
            }
        };
        let st = self.commit(st, event, held).await?;
        count_transition(to);

        st.participation(id).cloned().ok_or(EngineError::NotFound {
            entity: "participation",
            id,
        })
    }

    /// Remove a participation. Administrators may always do this; anyone
    /// else must own it and the activity must still be open.
    pub async fn delete_participation(&self, id: Ulid, requester: &User) -> Result<(), EngineError> {
        let held = self.hold().await;
        let st = self.resolve_entity_write("participation", id).await?;
        let current = st.participation(id).cloned().ok_or(EngineError::NotFound {
            entity: "participation",
            id,
        })?;
        if !requester.is_admin {
            check_owner(&current, requester)?;
            if st.activity.is_finalized {
                return Err(EngineError::Finalized(current.activity_id));
            }
        }
        let event = Event::ParticipationRemoved {
            id,
            activity_id: current.activity_id,
        };
        self.commit(st, event, held).await.map(|_| ())
    }
}

fn check_owner(p: &Participation, requester: &User) -> Result<(), EngineError> {
    if p.user_id != requester.id {
        return Err(EngineError::NotOwner {
            entity: "participation",
            id: p.id,
            user_id: requester.id,
        });
    }
    Ok(())
}
