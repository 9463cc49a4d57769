//! Caller identity extraction
//!
//! Authentication itself is an external collaborator; by the time a
//! request reaches this service the gateway has resolved the caller and
//! forwards their opaque id in `x-user-id`. Requests without it are
//! rejected as unauthorized.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use clipflow_core::AppError;

use crate::error::HttpAppError;

pub const CALLER_HEADER: &str = "x-user-id";

/// The authenticated caller's opaque user id.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Uuid);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                HttpAppError(AppError::Unauthorized("missing caller identity".into()))
            })?;

        let id = value.parse::<Uuid>().map_err(|_| {
            HttpAppError(AppError::Unauthorized("malformed caller identity".into()))
        })?;
        Ok(Caller(id))
    }
}
