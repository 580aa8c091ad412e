//! Admin bearer-token gate for the `/v1` routes.
//!
//! The settings UI is the only intended client; it authenticates with the
//! single token from `GLYPHKIT_ADMIN_TOKEN`. Authorization design proper is
//! the host platform's concern, not this service's.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::state::AppState;

/// Proof that the request carried the admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminToken;

impl FromRequestParts<AppState> for AdminToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| AppError::Unauthorized {
            message: "missing 'Authorization: Bearer <token>' header".to_string(),
        })?;

        if token == state.admin_token {
            Ok(AdminToken)
        } else {
            Err(AppError::Unauthorized {
                message: "invalid admin token".to_string(),
            })
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
