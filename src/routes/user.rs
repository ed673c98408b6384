/**
 * User Routes
 * Registration, login and the auth probe
 */
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// POST /user/registration
pub async fn registration(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload?;
    state
        .users
        .register(&payload.email, &payload.password)
        .await?;
    Ok(StatusCode::CREATED)
}

/// POST /user/login
///
/// Only checks the credentials; no session or token is issued.
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload?;
    state.users.login(&payload.email, &payload.password).await?;
    Ok(StatusCode::OK)
}

/// GET /user/check
pub async fn check() -> StatusCode {
    StatusCode::OK
}
