use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use tracing::info;

use crate::api::dto::*;
use crate::api::extract::AdminAuth;
use crate::api::{ApiResult, AppState, parse_id};
use crate::model::Page;

pub async fn list_rooms(
    State(state): State<AppState>,
    query: Result<Query<ListRoomsQuery>, QueryRejection>,
) -> ApiResult<PageResponse<RoomResponse>> {
    let Query(query) = query?;
    let page = Page::new(query.page, query.limit);
    let name = query.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let items = state
        .engine
        .list_rooms(name, page)
        .into_iter()
        .map(Into::into)
        .collect();
    Ok((
        StatusCode::OK,
        Json(Envelope::ok(
            "rooms retrieved",
            PageResponse {
                items,
                page: page.page,
                limit: page.limit,
            },
        )),
    ))
}

pub async fn room_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RoomDetailResponse> {
    let detail = state.engine.room_detail(parse_id(&id)?).await?;
    Ok((StatusCode::OK, Json(Envelope::ok("room retrieved", detail.into()))))
}

pub async fn create_room(
    AdminAuth(admin): AdminAuth,
    State(state): State<AppState>,
    body: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> ApiResult<RoomResponse> {
    let Json(body) = body?;
    let room = state
        .engine
        .create_room(body.name, body.description, body.capacity)
        .await?;
    info!(room = %room.id, admin = %admin.id, "room created");
    Ok((StatusCode::CREATED, Json(Envelope::ok("room created", room.into()))))
}

pub async fn update_room(
    AdminAuth(_): AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateRoomRequest>, JsonRejection>,
) -> ApiResult<RoomResponse> {
    let id = parse_id(&id)?;
    let Json(body) = body?;
    let room = state.engine.update_room(id, body.into()).await?;
    Ok((StatusCode::OK, Json(Envelope::ok("room updated", room.into()))))
}

pub async fn delete_room(
    AdminAuth(admin): AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let id = parse_id(&id)?;
    state.engine.delete_room(id).await?;
    info!(room = %id, admin = %admin.id, "room deleted");
    Ok((StatusCode::OK, Json(Envelope::message("room deleted"))))
}
