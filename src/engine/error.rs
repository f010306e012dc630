use ulid::Ulid;

use crate::model::{Ms, ParticipationState, Span};

/// Coarse classification used by callers to map errors onto their transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    State,
    Authorization,
    NotFound,
    /// Stored data breaks an invariant. Not a user error.
    Consistency,
    Storage,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound {
        entity: &'static str,
        id: Ulid,
    },
    LeadTime {
        start_at: Ms,
        earliest: Ms,
    },
    Ordering {
        start: Ms,
        end: Ms,
    },
    ActivityTooShort {
        duration: Ms,
        min: Ms,
    },
    ShiftLength {
        duration: Ms,
        min: Ms,
        max: Ms,
    },
    OutOfRange {
        shift: Span,
        activity: Span,
    },
    InvalidField(&'static str),
    LimitExceeded(&'static str),
    OrganizerConflict {
        user_id: Ulid,
        existing_activity: Ulid,
        existing: Span,
        proposed: Span,
    },
    SameOrganizerConflict {
        user_id: Ulid,
        organizer_id: Ulid,
        existing_activity: Ulid,
        existing: Span,
        proposed: Span,
    },
    BatchMismatch {
        expected: Ulid,
        found: Ulid,
    },
    EmptyBatch,
    Finalized(Ulid),
    AlreadyStarted {
        activity_id: Ulid,
        start_at: Ms,
    },
    InvalidTransition {
        id: Ulid,
        from: ParticipationState,
        to: ParticipationState,
    },
    ImmutableOrganizerShift(Ulid),
    NotOwner {
        entity: &'static str,
        id: Ulid,
        user_id: Ulid,
    },
    Forbidden(&'static str),
    InactiveUser(Ulid),
    MissingOrganizer(Ulid),
    UnknownUser(String),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            LeadTime { .. }
            | Ordering { .. }
            | ActivityTooShort { .. }
            | ShiftLength { .. }
            | OutOfRange { .. }
            | InvalidField(_)
            | LimitExceeded(_) => ErrorKind::Validation,
            OrganizerConflict { .. } | SameOrganizerConflict { .. } | BatchMismatch { .. } | EmptyBatch => {
                ErrorKind::Conflict
            }
            Finalized(_) | AlreadyStarted { .. } | InvalidTransition { .. } | ImmutableOrganizerShift(_) => {
                ErrorKind::State
            }
            NotOwner { .. } | Forbidden(_) | InactiveUser(_) => ErrorKind::Authorization,
            NotFound { .. } | UnknownUser(_) => ErrorKind::NotFound,
            MissingOrganizer(_) => ErrorKind::Consistency,
            WalError(_) => ErrorKind::Storage,
        }
    }

    /// Short stable label for metrics.
    pub fn label(&self) -> &'static str {
        use EngineError::*;
        match self {
            NotFound { .. } => "not_found",
            LeadTime { .. } => "lead_time",
            Ordering { .. } => "ordering",
            ActivityTooShort { .. } => "activity_too_short",
            ShiftLength { .. } => "shift_length",
            OutOfRange { .. } => "out_of_range",
            InvalidField(_) => "invalid_field",
            LimitExceeded(_) => "limit_exceeded",
            OrganizerConflict { .. } => "organizer_conflict",
            SameOrganizerConflict { .. } => "same_organizer_conflict",
            BatchMismatch { .. } => "batch_mismatch",
            EmptyBatch => "empty_batch",
            Finalized(_) => "finalized",
            AlreadyStarted { .. } => "already_started",
            InvalidTransition { .. } => "invalid_transition",
            ImmutableOrganizerShift(_) => "immutable_organizer_shift",
            NotOwner { .. } => "not_owner",
            Forbidden(_) => "forbidden",
            InactiveUser(_) => "inactive_user",
            MissingOrganizer(_) => "missing_organizer",
            UnknownUser(_) => "unknown_user",
            WalError(_) => "wal",
        }
    }

    pub(crate) fn activity_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "activity", id }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::LeadTime { start_at, earliest } => write!(
                f,
                "activity must be announced in advance: starts at {start_at}, earliest allowed start is {earliest}"
            ),
            EngineError::Ordering { start, end } => {
                write!(f, "start {start} must be before end {end}")
            }
            EngineError::ActivityTooShort { duration, min } => write!(
                f,
                "activity lasts {} min, minimum is {} min",
                duration / 60_000,
                min / 60_000
            ),
            EngineError::ShiftLength { duration, min, max } => write!(
                f,
                "shift lasts {} min, allowed range is {} to {} min",
                duration / 60_000,
                min / 60_000,
                max / 60_000
            ),
            EngineError::OutOfRange { shift, activity } => {
                write!(f, "shift {shift} falls outside activity window {activity}")
            }
            EngineError::InvalidField(msg) => write!(f, "invalid field: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::OrganizerConflict {
                user_id,
                existing_activity,
                existing,
                proposed,
            } => write!(
                f,
                "user {user_id} holds {existing} on activity {existing_activity}, which overlaps {proposed}; an organizer's shifts may not overlap"
            ),
            EngineError::SameOrganizerConflict {
                user_id,
                organizer_id,
                existing_activity,
                existing,
                proposed,
            } => write!(
                f,
                "user {user_id} already holds shift {existing} on activity {existing_activity} of organizer {organizer_id}, which overlaps {proposed}"
            ),
            EngineError::BatchMismatch { expected, found } => write!(
                f,
                "batch targets activity {expected} but contains a shift for activity {found}"
            ),
            EngineError::EmptyBatch => write!(f, "shift batch is empty"),
            EngineError::Finalized(id) => write!(f, "activity {id} is finalized"),
            EngineError::AlreadyStarted { activity_id, start_at } => {
                write!(f, "activity {activity_id} already started at {start_at}")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "participation {id} cannot go from {from} to {to}")
            }
            EngineError::ImmutableOrganizerShift(id) => write!(
                f,
                "shift {id} is the main organizer's shift and only changes with its activity"
            ),
            EngineError::NotOwner { entity, id, user_id } => {
                write!(f, "{entity} {id} does not belong to user {user_id}")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InactiveUser(id) => write!(f, "user {id} is not active"),
            EngineError::MissingOrganizer(id) => {
                write!(f, "activity {id} has no main organizer shift")
            }
            EngineError::UnknownUser(name) => write!(f, "no user named {name:?}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
