use axum::Json;

use crate::{
    api::{error::ErrorResponse, middleware::CurrentUser},
    store::User,
};

#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "The signed-in user", body = User),
        (status = 401, description = "No valid session", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
