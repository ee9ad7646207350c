//! HTTP error taxonomy.
//!
//! Client errors carry a short reason. Dependency failures answer with a
//! generic body; the cause is attached to the response as a
//! [`DependencyFailure`] extension for the access log and never reaches the
//! client.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error(transparent)]
    Dependency(#[from] anyhow::Error),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// Cause of a `500` response, left for the observability stage to log.
#[derive(Clone, Debug)]
pub struct DependencyFailure(pub Arc<anyhow::Error>);

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Dependency(err) => {
                let mut response = (
                    status,
                    Json(ErrorResponse {
                        error: INTERNAL_ERROR_MESSAGE.to_string(),
                    }),
                )
                    .into_response();
                response
                    .extensions_mut()
                    .insert(DependencyFailure(Arc::new(err)));
                response
            }
            other => (
                status,
                Json(ErrorResponse {
                    error: other.to_string(),
                }),
            )
                .into_response(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}
