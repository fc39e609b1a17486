use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Unix milliseconds. The only time type inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// RFC 3339 in UTC with whole seconds; empty when out of chrono's range.
pub fn to_rfc3339(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

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

    /// `None` for empty or inverted ranges.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BookingStatus {
    /// Pending and approved bookings hold the room; rejected ones don't.
    pub fn holds_room(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "approved" => Ok(BookingStatus::Approved),
            "rejected" => Ok(BookingStatus::Rejected),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_name: String,
    pub user_email: String,
    pub purpose: String,
    pub attendees: u32,
    pub span: Span,
    pub status: BookingStatus,
    /// Bearer capability for the no-auth checkout path. Never reused.
    pub checkout_token: String,
    pub created_at: Ms,
}

/// How far an approved booking has run past its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overtime {
    /// Whole minutes past `end`, truncated.
    pub minutes: Ms,
    pub extended_until: Ms,
}

impl Booking {
    /// Overtime is derived at read time and never stored.
    pub fn overtime(&self, now: Ms) -> Option<Overtime> {
        if self.status == BookingStatus::Approved && now > self.span.end {
            Some(Overtime {
                minutes: (now - self.span.end) / MINUTE_MS,
                extended_until: now,
            })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    /// Any role this service doesn't grant privileges to.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOtp {
    pub code: String,
    pub expires_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub id: Ulid,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub role: Role,
    pub reset: Option<ResetOtp>,
}

/// Flat event log record; one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
    },
    /// Full replacement; `previous_room_id` differs from `booking.room_id`
    /// when the booking moved.
    BookingUpdated {
        previous_room_id: Ulid,
        booking: Booking,
    },
    BookingDeleted {
        id: Ulid,
        room_id: Ulid,
    },
    AdminRegistered {
        admin: Admin,
    },
    ResetOtpIssued {
        admin_id: Ulid,
        otp: ResetOtp,
    },
    PasswordReset {
        admin_id: Ulid,
        password_hash: String,
    },
}

// ── Inputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub room_id: Ulid,
    pub user_name: String,
    pub user_email: String,
    pub purpose: String,
    pub attendees: u32,
    pub start: Ms,
    pub end: Ms,
}

/// Partial overwrite: every `Some` field replaces the stored value.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub room_id: Option<Ulid>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub status: Option<BookingStatus>,
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BookingFilter {
    pub room_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

/// 1-based page with a clamped page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(page: Option<usize>, limit: Option<usize>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(1);
        let limit = limit
            .filter(|l| *l >= 1)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT);
        Self { page, limit }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

// ── Query result types ───────────────────────────────────────────

/// A booking as seen by readers: joined with its room name and carrying
/// the live overtime fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub booking: Booking,
    /// Empty when the room has since been deleted.
    pub room_name: String,
    pub overtime: Option<Overtime>,
    /// Checkout link (the QR payload), present only while overtime.
    pub checkout_url: Option<String>,
}

impl BookingView {
    pub fn is_overtime(&self) -> bool {
        self.overtime.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RoomDetail {
    pub room: Room,
    pub bookings: Vec<BookingView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(status: BookingStatus, start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_name: "Ana".into(),
            user_email: "ana@example.com".into(),
            purpose: "standup".into(),
            attendees: 3,
            span: Span::new(start, end),
            status,
            checkout_token: "tok".into(),
            created_at: 0,
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_containing_other_overlaps() {
        let outer = Span::new(0, 1000);
        let inner = Span::new(400, 500);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 101), Some(Span::new(100, 101)));
    }

    #[test]
    fn status_holds_room() {
        assert!(BookingStatus::Pending.holds_room());
        assert!(BookingStatus::Approved.holds_room());
        assert!(!BookingStatus::Rejected.holds_room());
    }

    #[test]
    fn status_parse_and_display() {
        for s in [BookingStatus::Pending, BookingStatus::Approved, BookingStatus::Rejected] {
            assert_eq!(s.to_string().parse::<BookingStatus>().unwrap(), s);
        }
        assert!("cancelled".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn status_json_is_lowercase() {
        let json = serde_json::to_string(&BookingStatus::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
    }

    #[test]
    fn overtime_thirty_minutes() {
        let now = 10 * 3_600_000;
        let b = booking(BookingStatus::Approved, now - 90 * MINUTE_MS, now - 30 * MINUTE_MS);
        let ot = b.overtime(now).unwrap();
        assert_eq!(ot.minutes, 30);
        assert_eq!(ot.extended_until, now);
    }

    #[test]
    fn overtime_minutes_truncate() {
        let end = 1_000_000;
        let b = booking(BookingStatus::Approved, end - MINUTE_MS, end);
        // 59.999 seconds past end → 0 whole minutes, but still overtime
        let ot = b.overtime(end + MINUTE_MS - 1).unwrap();
        assert_eq!(ot.minutes, 0);
        assert_eq!(b.overtime(end + 2 * MINUTE_MS + 59_999).unwrap().minutes, 2);
    }

    #[test]
    fn no_overtime_before_or_at_end() {
        let b = booking(BookingStatus::Approved, 0, 1000);
        assert!(b.overtime(999).is_none());
        assert!(b.overtime(1000).is_none()); // strictly after end
        assert!(b.overtime(1001).is_some());
    }

    #[test]
    fn only_approved_bookings_run_overtime() {
        let pending = booking(BookingStatus::Pending, 0, 1000);
        let rejected = booking(BookingStatus::Rejected, 0, 1000);
        assert!(pending.overtime(5_000_000).is_none());
        assert!(rejected.overtime(5_000_000).is_none());
    }

    #[test]
    fn unknown_role_decodes_as_other() {
        let role: Role = serde_json::from_str("\"superuser\"").unwrap();
        assert_eq!(role, Role::Other);
        let admin: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(admin, Role::Admin);
    }

    #[test]
    fn page_defaults_and_clamps() {
        assert_eq!(Page::new(None, None), Page { page: 1, limit: DEFAULT_PAGE_LIMIT });
        assert_eq!(Page::new(Some(0), Some(0)), Page { page: 1, limit: DEFAULT_PAGE_LIMIT });
        assert_eq!(Page::new(Some(3), Some(10_000)).limit, MAX_PAGE_LIMIT);
        assert_eq!(Page::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn event_bincode_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking(BookingStatus::Pending, 100, 200),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
