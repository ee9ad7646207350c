//! HTTP surface.
//!
//! Routes:
//! - `POST /api/signup`, `POST /api/signin`: issue a session cookie.
//! - `GET /api/me`: protected; the signed-in user.
//! - `GET /api/health`: store liveness and build info.
//! - `GET /ws`: WebSocket echo, not authenticated.
//! - optional static files as the fallback.

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Router,
};
use std::{future::Future, net::SocketAddr, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, services::ServeDir, set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use crate::{
    auth::{CredentialHasher, SessionManager},
    store::Store,
};

pub mod error;
pub mod handlers;
pub mod middleware;
mod openapi;

#[cfg(test)]
mod test_support;

pub use error::ApiError;
pub use middleware::{compose, CurrentUser, Stage};
pub use openapi::openapi;

/// Dependencies shared by every handler, injected at construction.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionManager>,
    pub hasher: CredentialHasher,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, sessions: SessionManager, hasher: CredentialHasher) -> Self {
        Self {
            store,
            sessions: Arc::new(sessions),
            hasher,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let protected = compose(
        Router::new().route("/api/me", get(handlers::me::me)),
        &[Stage::RequireIdentity],
        &state,
    );

    let mut app = protected
        .route("/api/signup", post(handlers::signup::signup))
        .route("/api/signin", post(handlers::signin::signin))
        .route("/api/health", get(handlers::health::health))
        .route("/ws", get(handlers::ws::ws));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    compose(app, &[Stage::Observe, Stage::Authenticate], &state)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span)),
        )
}

/// Start the server on `[::]:port` and run until ctrl-c.
/// # Errors
/// Returns an error if the port cannot be bound or the server fails.
pub async fn new(port: u16, state: AppState, static_dir: Option<&Path>) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    serve(listener, router(state, static_dir), async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await
}

/// Serve `app` on an already bound listener until `shutdown` resolves.
/// # Errors
/// Returns an error if the server fails.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
