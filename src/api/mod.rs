//! HTTP surface: axum router, handlers, wire types and error mapping.

pub mod admin;
pub mod bookings;
pub mod dto;
pub mod error;
pub mod extract;
pub mod rooms;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use tower_http::LatencyUnit;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use ulid::Ulid;

use crate::auth::AccessGate;
use crate::engine::Engine;
use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::rate_limit::RateLimiter;

use dto::Envelope;
use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gate: Arc<AccessGate>,
    /// Guards the unauthenticated write endpoints.
    pub limiter: Arc<RateLimiter>,
}

pub type ApiResult<T> = Result<(StatusCode, Json<Envelope<T>>), ApiError>;

pub(crate) fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id: {raw}")))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/admin/register", post(admin::register))
        .route("/admin/login", post(admin::login))
        .route("/admin/forgot-password", post(admin::forgot_password))
        .route("/admin/reset-password", post(admin::reset_password))
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route(
            "/rooms/{id}",
            get(rooms::room_detail)
                .put(rooms::update_room)
                .delete(rooms::delete_room),
        )
        .route(
            "/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route(
            "/bookings/{id}",
            get(bookings::get_booking)
                .put(bookings::update_booking)
                .delete(bookings::delete_booking),
        )
        .route("/bookings/{id}/approve", patch(bookings::approve_booking))
        .route("/bookings/{id}/reject", patch(bookings::reject_booking))
        .route("/bookings/delete/{token}", delete(bookings::delete_by_token));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .fallback(not_found)
        .layer(middleware::from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Envelope<()>> {
    Json(Envelope::message("ok"))
}

async fn not_found() -> (StatusCode, Json<Envelope<()>>) {
    (StatusCode::NOT_FOUND, Json(Envelope::error("no such route")))
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method)
        .record(started.elapsed().as_secs_f64());
    response
}
