use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::{api::AppState, git_commit_hash};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    build: String,
    store: String,
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Store is reachable", body = Health),
        (status = 503, description = "Store is unreachable", body = Health)
    ),
    tag = "puyo"
)]
pub async fn health(method: Method, State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(err) => {
            error!("Store health check failed: {err:#}");
            false
        }
    };

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: git_commit_hash().to_string(),
        store: if store_ok {
            state.store.kind().to_string()
        } else {
            "error".to_string()
        },
    };

    let short_hash = if health.build.len() > 7 {
        &health.build[0..7]
    } else {
        ""
    };
    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {:?}", value);
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    let body = if method == Method::HEAD {
        Body::empty().into_response()
    } else {
        Json(&health).into_response()
    };

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, body)
}
