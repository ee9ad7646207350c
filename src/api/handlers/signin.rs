use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::instrument;

use super::types::Credentials;
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        AppState,
    },
    auth::session_cookie,
    store::User,
};

// Same reason for unknown names and wrong passwords.
const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[utoipa::path(
    post,
    path = "/api/signin",
    request_body = Credentials,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = User),
        (status = 400, description = "Malformed body", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Storage or session failure", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn signin(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = payload?;

    let Some(record) = state.store.user_by_name(&credentials.name).await? else {
        // Pay for a full verification so an unknown name is as slow as a wrong password.
        state
            .hasher
            .verify_decoy_blocking(credentials.password)
            .await;
        return Err(ApiError::Unauthenticated(INVALID_CREDENTIALS));
    };

    if !state
        .hasher
        .verify_blocking(record.password_hash.clone(), credentials.password)
        .await
    {
        return Err(ApiError::Unauthenticated(INVALID_CREDENTIALS));
    }

    let session = state.sessions.create(record.id).await?;
    let cookie = session_cookie(&session).context("failed to build session cookie")?;

    Ok((StatusCode::OK, [(SET_COOKIE, cookie)], Json(record.public())).into_response())
}
