//! Hard caps. Scheduling thresholds are policy and live in `config::SchedulingPolicy`.

pub const MAX_TITLE_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 255;
pub const MAX_LOCATION_LEN: usize = 255;
pub const MAX_ROLE_LEN: usize = 15;

/// Shifts accepted in one batch request.
pub const MAX_BATCH_SIZE: usize = 200;

pub const MAX_PAGE_SIZE: u32 = 500;

/// Any WAL length prefix above this is treated as corruption.
pub const MAX_WAL_ENTRY_BYTES: usize = 1 << 20;

/// Role recorded on the shift created together with an activity.
pub const ORGANIZER_ROLE: &str = "Organizer";
