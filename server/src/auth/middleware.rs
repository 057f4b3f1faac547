//! Bearer token extraction.
//!
//! The token is the owner identity. Verifying it against an identity
//! provider is out of scope for the reference server.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use marksync_engine::OwnerId;

use crate::error::AppError;
use crate::AppState;

/// Authenticated owner extracted from the request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub owner_id: OwnerId,
}

impl AuthUser {
    /// Fail with `Forbidden` unless `owner_id` is the authenticated owner.
    pub fn ensure_owner(&self, owner_id: &str) -> Result<(), AppError> {
        if self.owner_id == owner_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{} may not access records of {}",
                self.owner_id, owner_id
            )))
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthorized("Missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized("Invalid authorization header format"))?
            .trim();

        if token.is_empty() {
            return Err(AppError::Unauthorized("Empty bearer token"));
        }

        Ok(AuthUser {
            owner_id: token.to_string(),
        })
    }
}
