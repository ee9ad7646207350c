use utoipa::OpenApi;

use super::{
    error::ErrorResponse,
    handlers::{health, me, signin, signup, Credentials},
};
use crate::store::User;

/// Title, version, description, contact and license come from Cargo metadata.
#[derive(OpenApi)]
#[openapi(
    paths(health::health, signup::signup, signin::signin, me::me),
    components(schemas(Credentials, User, ErrorResponse, health::Health)),
    tags(
        (name = "puyo", description = "Game server"),
        (name = "auth", description = "Signup, signin and the session cookie")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
