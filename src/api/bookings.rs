use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use tracing::info;

use crate::api::dto::*;
use crate::api::error::ApiError;
use crate::api::extract::{AdminAuth, Admitted};
use crate::api::{ApiResult, AppState, parse_id};
use crate::model::{BookingFilter, BookingPatch, BookingStatus, Page};

pub async fn list_bookings(
    State(state): State<AppState>,
    query: Result<Query<ListBookingsQuery>, QueryRejection>,
) -> ApiResult<PageResponse<BookingResponse>> {
    let Query(query) = query?;
    let filter = BookingFilter {
        room_id: query
            .room_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(parse_id)
            .transpose()?,
        status: query
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<BookingStatus>().map_err(ApiError::BadRequest))
            .transpose()?,
    };
    let page = Page::new(query.page, query.limit);
    let items = state
        .engine
        .list_bookings(filter, page)
        .await
        .into_iter()
        .map(Into::into)
        .collect();
    Ok((
        StatusCode::OK,
        Json(Envelope::ok(
            "bookings retrieved",
            PageResponse {
                items,
                page: page.page,
                limit: page.limit,
            },
        )),
    ))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BookingResponse> {
    let view = state.engine.get_booking(parse_id(&id)?).await?;
    Ok((StatusCode::OK, Json(Envelope::ok("booking retrieved", view.into()))))
}

pub async fn create_booking(
    Admitted(ip): Admitted,
    State(state): State<AppState>,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> ApiResult<BookingResponse> {
    let Json(body) = body?;
    let booking = state.engine.create_booking(body.into()).await?;
    info!(booking = %booking.id, client = %ip, "booking requested");
    let view = state.engine.view(&booking, state.engine.now());
    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok("booking created, awaiting approval", view.into())),
    ))
}

pub async fn approve_booking(
    AdminAuth(admin): AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BookingResponse> {
    let booking = state.engine.approve(parse_id(&id)?).await?;
    info!(booking = %booking.id, admin = %admin.id, "approved");
    let view = state.engine.view(&booking, state.engine.now());
    Ok((StatusCode::OK, Json(Envelope::ok("booking approved", view.into()))))
}

pub async fn reject_booking(
    AdminAuth(admin): AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BookingResponse> {
    let booking = state.engine.reject(parse_id(&id)?).await?;
    info!(booking = %booking.id, admin = %admin.id, "rejected");
    let view = state.engine.view(&booking, state.engine.now());
    Ok((StatusCode::OK, Json(Envelope::ok("booking rejected", view.into()))))
}

pub async fn update_booking(
    AdminAuth(_): AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateBookingRequest>, JsonRejection>,
) -> ApiResult<BookingResponse> {
    let id = parse_id(&id)?;
    let Json(body) = body?;
    let patch = BookingPatch::try_from(body)?;
    let booking = state.engine.update_booking(id, patch).await?;
    let view = state.engine.view(&booking, state.engine.now());
    Ok((StatusCode::OK, Json(Envelope::ok("booking updated", view.into()))))
}

pub async fn delete_booking(
    AdminAuth(_): AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.engine.delete_booking(parse_id(&id)?).await?;
    Ok((StatusCode::OK, Json(Envelope::message("booking deleted"))))
}

/// The QR checkout path: the token alone authorizes the release.
pub async fn delete_by_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<()> {
    let booking = state.engine.delete_by_token(&token).await?;
    info!(booking = %booking.id, "checked out");
    Ok((
        StatusCode::OK,
        Json(Envelope::message("booking released, room is free")),
    ))
}
