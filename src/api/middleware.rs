//! Request pipeline stages.
//!
//! Flow Overview:
//! 1) `Observe` measures the whole request and writes one access-log event
//!    once the final status is known, including statuses set by inner stages.
//!    Panics below it become a generic `500`.
//! 2) `Authenticate` resolves the `session_id` cookie. It only ever attaches
//!    an identity and never rejects a request.
//! 3) `RequireIdentity` (protected routes only) answers `401` when no identity
//!    is attached, without calling the handler.
//!
//! [`compose`] applies a list of stages so the first one listed is outermost.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use opentelemetry::trace::TraceContextExt;
use std::{any::Any, net::SocketAddr, time::Instant};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info, Level, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::{
    error::{ApiError, DependencyFailure},
    AppState,
};
use crate::{
    auth::{identity_from_extensions, identity_of, session_token, with_identity, Resolution},
    store::User,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Observe,
    Authenticate,
    RequireIdentity,
}

/// Wrap `router` in `stages`, outermost first.
pub fn compose(router: Router<AppState>, stages: &[Stage], state: &AppState) -> Router<AppState> {
    stages
        .iter()
        .rev()
        .fold(router, |router, stage| match stage {
            Stage::Observe => router
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(middleware::from_fn(observe)),
            Stage::Authenticate => {
                router.layer(middleware::from_fn_with_state(state.clone(), authenticate))
            }
            Stage::RequireIdentity => router.route_layer(middleware::from_fn(require_identity)),
        })
}

/// Access log for one request.
pub async fn observe(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.to_string());
    let trace_id = trace_id(&request);

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    if outcome_level(status) == Level::ERROR {
        let cause = response
            .extensions()
            .get::<DependencyFailure>()
            .map_or_else(String::new, |failure| format!("{:#}", failure.0));
        error!(
            %method,
            %path,
            %remote_addr,
            status = status.as_u16(),
            duration_ms,
            %trace_id,
            error = %cause,
            "request failed"
        );
    } else {
        info!(
            %method,
            %path,
            %remote_addr,
            status = status.as_u16(),
            duration_ms,
            %trace_id,
            "request completed"
        );
    }

    response
}

/// Attach the session owner, if the cookie names a live session.
pub async fn authenticate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(token) = session_token(request.headers()) else {
        return next.run(request).await;
    };

    let request = match state.sessions.resolve(&token).await {
        Ok(Resolution::Valid(user)) => with_identity(request, user),
        Ok(Resolution::NotFound | Resolution::Expired) => request,
        Err(err) => {
            error!("Failed to resolve session: {err:#}");
            request
        }
    };

    next.run(request).await
}

/// Reject requests without an identity.
pub async fn require_identity(request: Request, next: Next) -> Response {
    if identity_of(&request).is_none() {
        return ApiError::Unauthenticated("Authentication required").into_response();
    }
    next.run(request).await
}

/// Extractor for the identity attached by [`authenticate`].
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_extensions(&parts.extensions)
            .cloned()
            .map(CurrentUser)
            .ok_or(ApiError::Unauthenticated("Authentication required"))
    }
}

#[must_use]
pub fn outcome_level(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else {
        Level::INFO
    }
}

/// OpenTelemetry trace id when exporting, else the request id.
fn trace_id(request: &Request) -> String {
    let context = Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    if span_context.is_valid() {
        return span_context.trace_id().to_string();
    }

    request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
        .to_string()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError::Dependency(anyhow::anyhow!("handler panicked: {message}")).into_response()
}
