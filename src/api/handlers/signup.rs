//! Account creation.
//!
//! The user is created first; the session is a convenience on top. If the
//! session cannot be issued the account still exists, so the response is
//! `201` without a cookie and the client signs in afterwards.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, instrument};

use super::types::Credentials;
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        AppState,
    },
    auth::session_cookie,
    store::{CreateUserOutcome, User},
};

#[utoipa::path(
    post,
    path = "/api/signup",
    request_body = Credentials,
    responses(
        (status = 201, description = "Account created; session cookie set when available", body = User),
        (status = 400, description = "Malformed body or missing fields", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse),
        (status = 500, description = "Storage or hashing failure", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = payload?;
    if !credentials.is_complete() {
        return Err(ApiError::Validation(
            "Name and password are required".to_string(),
        ));
    }

    let password_hash = state.hasher.hash_blocking(credentials.password).await?;

    let user = match state
        .store
        .create_user(&credentials.name, &password_hash)
        .await?
    {
        CreateUserOutcome::Created(user) => user,
        CreateUserOutcome::Conflict => {
            return Err(ApiError::Conflict("Name is already taken".to_string()));
        }
    };

    let mut response = (StatusCode::CREATED, Json(&user)).into_response();

    match state.sessions.create(user.id).await {
        Ok(session) => match session_cookie(&session) {
            Ok(cookie) => {
                response.headers_mut().insert(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build session cookie: {err}"),
        },
        Err(err) => error!(user_id = user.id, "Failed to create session after signup: {err:#}"),
    }

    Ok(response)
}
