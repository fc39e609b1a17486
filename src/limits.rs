use crate::model::Ms;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;
pub const MAX_ADMINS: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_PURPOSE_LEN: usize = 1_024;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 1_024;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single booking may not run longer than a week.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 24 * 3_600_000;

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 100;

pub const RESET_OTP_TTL_MS: Ms = 10 * 60_000;
