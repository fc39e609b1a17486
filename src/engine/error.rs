use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    /// Unknown booking id.
    NotFound(Ulid),
    RoomNotFound(Ulid),
    /// No booking carries this checkout token.
    TokenNotFound,
    /// Overlaps the given pending/approved booking.
    Conflict(Ulid),
    CapacityExceeded {
        attendees: u32,
        capacity: u32,
    },
    InvalidSpan {
        start: Ms,
        end: Ms,
    },
    Validation(String),
    AlreadyApproved(Ulid),
    AlreadyRejected(Ulid),
    /// A unique field (room name, username, email) is taken.
    AlreadyExists(String),
    InvalidCredentials,
    InvalidOtp,
    LimitExceeded(&'static str),
    WalError(String),
    Internal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::TokenNotFound => write!(f, "no booking for this checkout token"),
            EngineError::Conflict(id) => write!(f, "time slot conflicts with booking {id}"),
            EngineError::CapacityExceeded {
                attendees,
                capacity,
            } => write!(
                f,
                "{attendees} attendees exceed room capacity of {capacity}"
            ),
            EngineError::InvalidSpan { start, end } => {
                write!(f, "invalid time range [{start}, {end})")
            }
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::AlreadyApproved(id) => write!(f, "booking {id} is already approved"),
            EngineError::AlreadyRejected(id) => write!(f, "booking {id} is already rejected"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::InvalidCredentials => write!(f, "invalid credentials"),
            EngineError::InvalidOtp => write!(f, "invalid or expired reset code"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
