use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Strict on both sides: a span ending at T and one starting at T do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other` (closed on both ends).
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A scheduled, time-boxed community event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub location: String,
    pub is_on_site: bool,
    pub start_at: Ms,
    pub end_at: Ms,
    pub is_finalized: bool,
}

impl Activity {
    pub fn span(&self) -> Span {
        Span::new(self.start_at, self.end_at)
    }
}

/// One person's commitment to staff an activity in a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volunteering {
    pub id: Ulid,
    pub activity_id: Ulid,
    pub user_id: Ulid,
    pub start_shift: Ms,
    pub end_shift: Ms,
    pub activity_role: String,
    pub is_main_organizer: bool,
}

impl Volunteering {
    pub fn span(&self) -> Span {
        Span::new(self.start_shift, self.end_shift)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipationState {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl ParticipationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ParticipationState::Completed | ParticipationState::Cancelled)
    }

    /// Pending → InProgress → Completed, and Pending|InProgress → Cancelled.
    pub fn can_transition_to(self, next: ParticipationState) -> bool {
        use ParticipationState::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (InProgress, Completed) | (Pending, Cancelled) | (InProgress, Cancelled)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ParticipationState::Pending => "pending",
            ParticipationState::InProgress => "in_progress",
            ParticipationState::Completed => "completed",
            ParticipationState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ParticipationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A member's enrollment to attend an activity (not to staff it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub id: Ulid,
    pub activity_id: Ulid,
    pub user_id: Ulid,
    pub registered_at: Ms,
    pub start_at: Option<Ms>,
    pub end_at: Option<Ms>,
    pub state: ParticipationState,
}

/// Identity as seen through the external user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub is_admin: bool,
    pub is_active: bool,
}

// ── Command inputs ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ActivityDraft {
    pub title: String,
    pub description: String,
    pub location: String,
    pub is_on_site: bool,
    pub start_at: Ms,
    pub end_at: Ms,
}

#[derive(Debug, Clone)]
pub struct ShiftDraft {
    pub activity_id: Ulid,
    pub user_id: Ulid,
    pub start_shift: Ms,
    pub end_shift: Ms,
    pub activity_role: String,
}

// ── Per-activity state ───────────────────────────────────────────

/// An activity together with the rows it owns. Lives behind one lock so that
/// finalization and participation transitions on the same activity serialize.
#[derive(Debug, Clone)]
pub struct ActivityState {
    pub activity: Activity,
    /// Shifts sorted by `start_shift`.
    pub shifts: Vec<Volunteering>,
    pub participations: Vec<Participation>,
}

impl ActivityState {
    pub fn new(activity: Activity) -> Self {
        Self {
            activity,
            shifts: Vec::new(),
            participations: Vec::new(),
        }
    }

    /// Insert shift maintaining sort order by start.
    pub fn insert_shift(&mut self, shift: Volunteering) {
        let pos = self
            .shifts
            .binary_search_by_key(&shift.start_shift, |s| s.start_shift)
            .unwrap_or_else(|e| e);
        self.shifts.insert(pos, shift);
    }

    pub fn remove_shift(&mut self, id: Ulid) -> Option<Volunteering> {
        let pos = self.shifts.iter().position(|s| s.id == id)?;
        Some(self.shifts.remove(pos))
    }

    pub fn shift(&self, id: Ulid) -> Option<&Volunteering> {
        self.shifts.iter().find(|s| s.id == id)
    }

    pub fn organizer(&self) -> Option<&Volunteering> {
        self.shifts.iter().find(|s| s.is_main_organizer)
    }

    /// Shifts whose window overlaps the query window.
    /// Uses binary search to skip shifts starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Volunteering> {
        let right_bound = self.shifts.partition_point(|s| s.start_shift < query.end);
        self.shifts[..right_bound]
            .iter()
            .filter(move |s| s.end_shift > query.start)
    }

    pub fn participation(&self, id: Ulid) -> Option<&Participation> {
        self.participations.iter().find(|p| p.id == id)
    }

    pub fn participation_mut(&mut self, id: Ulid) -> Option<&mut Participation> {
        self.participations.iter_mut().find(|p| p.id == id)
    }

    pub fn remove_participation(&mut self, id: Ulid) -> Option<Participation> {
        let pos = self.participations.iter().position(|p| p.id == id)?;
        Some(self.participations.remove(pos))
    }

    /// Participations the finalizer still has to close.
    pub fn open_participations(&self) -> impl Iterator<Item = &Participation> {
        self.participations.iter().filter(|p| !p.state.is_terminal())
    }
}

/// The event types. This is the WAL record format: every mutation is exactly
/// one record, so every record is applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ActivityCreated {
        activity: Activity,
        organizer: Volunteering,
    },
    ActivityDeleted {
        id: Ulid,
    },
    ActivityFinalized {
        id: Ulid,
        at: Ms,
        completed: Vec<Ulid>,
        cancelled: Vec<Ulid>,
    },
    ShiftAdded {
        shift: Volunteering,
    },
    ShiftUpdated {
        id: Ulid,
        activity_id: Ulid,
        span: Span,
        activity_role: String,
    },
    ShiftRemoved {
        id: Ulid,
        activity_id: Ulid,
    },
    ParticipationEnrolled {
        participation: Participation,
    },
    ParticipationStarted {
        id: Ulid,
        activity_id: Ulid,
        at: Ms,
    },
    ParticipationCancelled {
        id: Ulid,
        activity_id: Ulid,
        at: Ms,
    },
    ParticipationRemoved {
        id: Ulid,
        activity_id: Ulid,
    },
}

impl Event {
    /// The activity whose state this event mutates.
    pub fn activity_id(&self) -> Ulid {
        match self {
            Event::ActivityCreated { activity, .. } => activity.id,
            Event::ActivityDeleted { id } | Event::ActivityFinalized { id, .. } => *id,
            Event::ShiftAdded { shift } => shift.activity_id,
            Event::ParticipationEnrolled { participation } => participation.activity_id,
            Event::ShiftUpdated { activity_id, .. }
            | Event::ShiftRemoved { activity_id, .. }
            | Event::ParticipationStarted { activity_id, .. }
            | Event::ParticipationCancelled { activity_id, .. }
            | Event::ParticipationRemoved { activity_id, .. } => *activity_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// One page of a listing. Pages are zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub current_page: u32,
}

impl<T> Page<T> {
    /// Slice an already-ordered collection into the requested page.
    pub fn from_sorted(all: Vec<T>, page: u32, page_size: u32) -> Self {
        let page_size = page_size.max(1);
        let total_elements = all.len() as u64;
        let total_pages = total_elements.div_ceil(page_size as u64) as u32;
        let skip = page as usize * page_size as usize;
        let items = all.into_iter().skip(skip).take(page_size as usize).collect();
        Self {
            items,
            total_elements,
            total_pages,
            current_page: page,
        }
    }
}
