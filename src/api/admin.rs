use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use tracing::info;

use crate::api::dto::*;
use crate::api::extract::{AdminAuth, Admitted};
use crate::api::{ApiResult, AppState};

/// Only an existing admin may add another; the first one comes from
/// `ROOMBOOK_BOOTSTRAP_ADMIN`.
pub async fn register(
    AdminAuth(by): AdminAuth,
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<AdminResponse> {
    let Json(body) = body?;
    let admin = state
        .engine
        .register_admin(body.username, body.email, body.password)
        .await?;
    info!(admin = %admin.id, by = %by.id, "admin registered");
    Ok((StatusCode::CREATED, Json(Envelope::ok("admin registered", admin.into()))))
}

pub async fn login(
    Admitted(_): Admitted,
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(body) = body?;
    let admin = state.engine.login(&body.username, &body.password).await?;
    let token = state.gate.issue(&admin)?;
    Ok((
        StatusCode::OK,
        Json(Envelope::ok(
            "login successful",
            LoginResponse {
                token,
                token_type: "Bearer".into(),
                expires_in: state.gate.token_ttl_secs(),
                admin: admin.into(),
            },
        )),
    ))
}

/// Same answer whether or not the address belongs to an admin.
pub async fn forgot_password(
    Admitted(_): Admitted,
    State(state): State<AppState>,
    body: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Json(body) = body?;
    state.engine.request_password_reset(&body.email).await?;
    Ok((
        StatusCode::OK,
        Json(Envelope::message(
            "if the address belongs to an admin, a reset code has been sent",
        )),
    ))
}

pub async fn reset_password(
    Admitted(_): Admitted,
    State(state): State<AppState>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Json(body) = body?;
    state
        .engine
        .reset_password(&body.email, &body.otp, body.new_password)
        .await?;
    Ok((StatusCode::OK, Json(Envelope::message("password has been reset"))))
}
