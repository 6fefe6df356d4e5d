//! Caller identity.
//!
//! Authentication happens upstream: the proxy in front of this service
//! validates the session and forwards the numeric user id in `x-user-id`.
//! Requests without a usable id are refused outright.

use crate::{errors::AppError, models::UserId};
use axum::{extract::FromRequestParts, http::request::Parts};

pub const USER_ID_HEADER: &str = "x-user-id";

/// The user every storage handler acts for.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub UserId);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|id| AuthenticatedUser(UserId(id)))
            .ok_or_else(|| AppError::unauthorized("Invalid user identity"))
    }
}
