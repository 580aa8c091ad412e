use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use glyphkit_core::error::ApiError;

use crate::auth::AdminToken;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/metadata", post(metadata_query))
}

/// Proxy a query document to the Glyphkit metadata service
///
/// The raw body is the query document; the upstream JSON response is relayed
/// verbatim. The settings UI uses this to list kits and icon versions
/// without talking to the metadata service directly.
#[utoipa::path(
    post,
    path = "/v1/metadata",
    request_body = String,
    responses(
        (status = 200, description = "Upstream response, relayed verbatim"),
        (status = 400, description = "Metadata service rejected the query", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 500, description = "Metadata service unavailable", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "metadata"
)]
pub async fn metadata_query(
    State(state): State<AppState>,
    _admin: AdminToken,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let response = state.metadata.query(&body).await?;
    Ok(Json(response))
}
