//! Wire shapes. Timestamps are RFC 3339 on the wire and unix milliseconds
//! inside the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::api::error::ApiError;
use crate::api::parse_id;
use crate::model::*;

pub fn to_ms(t: DateTime<Utc>) -> Ms {
    t.timestamp_millis()
}

pub use crate::model::to_rfc3339;

/// Every response body: `{success, message, data}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub room_id: Ulid,
    pub user_name: String,
    pub user_email: String,
    pub purpose: String,
    pub attendees: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl From<CreateBookingRequest> for NewBooking {
    fn from(r: CreateBookingRequest) -> Self {
        NewBooking {
            room_id: r.room_id,
            user_name: r.user_name,
            user_email: r.user_email,
            purpose: r.purpose,
            attendees: r.attendees,
            start: to_ms(r.start_time),
            end: to_ms(r.end_time),
        }
    }
}

/// Partial update. Fields arrive as strings so that a blank value (and
/// `"null"` for `room_id`) reads as "leave unchanged".
#[derive(Debug, Default, Deserialize)]
pub struct UpdateBookingRequest {
    pub room_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub status: Option<String>,
    pub purpose: Option<String>,
}

fn present(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

fn parse_time(field: &str, raw: &str) -> Result<Ms, ApiError> {
    raw.trim()
        .parse::<DateTime<Utc>>()
        .map(to_ms)
        .map_err(|e| ApiError::BadRequest(format!("invalid {field}: {e}")))
}

impl TryFrom<UpdateBookingRequest> for BookingPatch {
    type Error = ApiError;

    fn try_from(r: UpdateBookingRequest) -> Result<Self, ApiError> {
        let room_id = present(r.room_id)
            .filter(|v| v.trim() != "null")
            .map(|v| parse_id(v.trim()))
            .transpose()?;
        let start = present(r.start_time)
            .map(|v| parse_time("start_time", &v))
            .transpose()?;
        let end = present(r.end_time)
            .map(|v| parse_time("end_time", &v))
            .transpose()?;
        let status = present(r.status)
            .map(|v| v.trim().parse::<BookingStatus>().map_err(ApiError::BadRequest))
            .transpose()?;
        Ok(BookingPatch {
            room_id,
            start,
            end,
            status,
            purpose: r.purpose,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBookingsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub room_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BookingResponse {
    pub id: Ulid,
    pub room_id: Ulid,
    pub room_name: String,
    pub user_name: String,
    pub user_email: String,
    pub purpose: String,
    pub attendees: u32,
    pub start_time: String,
    pub end_time: String,
    pub status: BookingStatus,
    pub created_at: String,
    pub is_overtime: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overtime_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_until: Option<String>,
    /// Delete-by-token link for the QR code; only while overtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

impl From<BookingView> for BookingResponse {
    fn from(v: BookingView) -> Self {
        let is_overtime = v.is_overtime();
        let b = v.booking;
        BookingResponse {
            id: b.id,
            room_id: b.room_id,
            room_name: v.room_name,
            user_name: b.user_name,
            user_email: b.user_email,
            purpose: b.purpose,
            attendees: b.attendees,
            start_time: to_rfc3339(b.span.start),
            end_time: to_rfc3339(b.span.end),
            status: b.status,
            created_at: to_rfc3339(b.created_at),
            is_overtime,
            overtime_minutes: v.overtime.map(|o| o.minutes),
            extended_until: v.overtime.map(|o| to_rfc3339(o.extended_until)),
            checkout_url: v.checkout_url,
        }
    }
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capacity: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoomRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<u32>,
}

impl From<UpdateRoomRequest> for RoomPatch {
    fn from(r: UpdateRoomRequest) -> Self {
        RoomPatch {
            name: r.name,
            description: r.description,
            capacity: r.capacity,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRoomsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    pub capacity: u32,
}

impl From<Room> for RoomResponse {
    fn from(r: Room) -> Self {
        RoomResponse {
            id: r.id,
            name: r.name,
            description: r.description,
            capacity: r.capacity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoomDetailResponse {
    #[serde(flatten)]
    pub room: RoomResponse,
    pub bookings: Vec<BookingResponse>,
}

impl From<RoomDetail> for RoomDetailResponse {
    fn from(d: RoomDetail) -> Self {
        RoomDetailResponse {
            room: d.room.into(),
            bookings: d.bookings.into_iter().map(Into::into).collect(),
        }
    }
}

// ── Admins ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminResponse {
    pub id: Ulid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<Admin> for AdminResponse {
    fn from(a: Admin) -> Self {
        AdminResponse {
            id: a.id,
            username: a.username,
            email: a.email,
            role: a.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub admin: AdminResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_roundtrip_through_ms() {
        let t: DateTime<Utc> = "2026-01-01T10:00:00+07:00".parse().unwrap();
        let ms = to_ms(t);
        assert_eq!(ms, 1_767_236_400_000);
        assert_eq!(to_rfc3339(ms), "2026-01-01T03:00:00Z");
    }

    #[test]
    fn overtime_fields_present_only_when_overtime() {
        let booking = Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_name: "Tari".into(),
            user_email: "tari@example.com".into(),
            purpose: "demo".into(),
            attendees: 3,
            span: Span::new(1_767_225_600_000, 1_767_229_200_000),
            status: BookingStatus::Approved,
            checkout_token: "tok".into(),
            created_at: 1_767_225_000_000,
        };
        let now = booking.span.end + 5 * MINUTE_MS;
        let view = BookingView {
            overtime: booking.overtime(now),
            checkout_url: Some("http://localhost:8080/api/bookings/delete/tok".into()),
            room_name: "Room A".into(),
            booking: booking.clone(),
        };
        let json = serde_json::to_value(BookingResponse::from(view)).unwrap();
        assert_eq!(json["is_overtime"], true);
        assert_eq!(json["overtime_minutes"], 5);
        assert_eq!(json["status"], "approved");
        assert_eq!(json["extended_until"], "2026-01-01T01:05:00Z");
        assert!(json.get("checkout_token").is_none());

        let quiet = BookingView {
            overtime: None,
            checkout_url: None,
            room_name: "Room A".into(),
            booking,
        };
        let json = serde_json::to_value(BookingResponse::from(quiet)).unwrap();
        assert_eq!(json["is_overtime"], false);
        assert!(json.get("overtime_minutes").is_none());
        assert!(json.get("checkout_url").is_none());
    }

    #[test]
    fn blank_update_fields_leave_booking_unchanged() {
        let body: UpdateBookingRequest = serde_json::from_value(serde_json::json!({
            "room_id": "",
            "start_time": " ",
            "end_time": "",
            "status": "",
            "purpose": "x",
        }))
        .unwrap();
        let patch = BookingPatch::try_from(body).unwrap();
        assert_eq!(patch.room_id, None);
        assert_eq!(patch.start, None);
        assert_eq!(patch.end, None);
        assert_eq!(patch.status, None);
        assert_eq!(patch.purpose.as_deref(), Some("x"));

        let body: UpdateBookingRequest =
            serde_json::from_value(serde_json::json!({"room_id": "null"})).unwrap();
        assert_eq!(BookingPatch::try_from(body).unwrap().room_id, None);
    }

    #[test]
    fn present_update_fields_are_parsed() {
        let room = Ulid::new();
        let body: UpdateBookingRequest = serde_json::from_value(serde_json::json!({
            "room_id": room.to_string(),
            "start_time": "2026-01-01T10:00:00+07:00",
            "status": "approved",
        }))
        .unwrap();
        let patch = BookingPatch::try_from(body).unwrap();
        assert_eq!(patch.room_id, Some(room));
        assert_eq!(patch.start, Some(1_767_236_400_000));
        assert_eq!(patch.end, None);
        assert_eq!(patch.status, Some(BookingStatus::Approved));
    }

    #[test]
    fn malformed_update_fields_are_bad_requests() {
        for body in [
            serde_json::json!({"status": "maybe"}),
            serde_json::json!({"room_id": "not-an-id"}),
            serde_json::json!({"end_time": "tomorrow"}),
        ] {
            let body: UpdateBookingRequest = serde_json::from_value(body).unwrap();
            let err = BookingPatch::try_from(body).unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)), "{err:?}");
        }
    }

    #[test]
    fn error_envelope_has_no_data() {
        let json = serde_json::to_value(Envelope::error("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "message": "nope"}));
    }
}
