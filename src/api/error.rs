use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::api::dto::Envelope;
use crate::auth::AuthError;
use crate::engine::EngineError;
use crate::rate_limit::RateLimited;

/// Everything a handler can fail with. Rendered as the standard envelope
/// with `success: false`.
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Auth(AuthError),
    RateLimited(RateLimited),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<RateLimited> for ApiError {
    fn from(e: RateLimited) -> Self {
        ApiError::RateLimited(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::NotFound(_) | EngineError::RoomNotFound(_) | EngineError::TokenNotFound => {
            StatusCode::NOT_FOUND
        }
        EngineError::Conflict(_) | EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
        EngineError::CapacityExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        EngineError::InvalidSpan { .. }
        | EngineError::Validation(_)
        | EngineError::AlreadyApproved(_)
        | EngineError::AlreadyRejected(_)
        | EngineError::InvalidOtp
        | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
        EngineError::WalError(_) | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => engine_status(e),
            ApiError::Auth(AuthError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("request failed: {self:?}");
            "internal server error".to_string()
        } else {
            debug!("request refused with {status}: {self:?}");
            match &self {
                ApiError::Engine(e) => e.to_string(),
                ApiError::Auth(_) => "unauthorized".to_string(),
                ApiError::RateLimited(e) => e.to_string(),
                ApiError::BadRequest(msg) => msg.clone(),
            }
        };

        let mut response = (status, Json(Envelope::error(message))).into_response();
        if let ApiError::RateLimited(e) = &self {
            let secs = (e.retry_after_ms + 999) / 1000;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
