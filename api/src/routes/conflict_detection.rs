//! The conflict-detection REST surface.
//!
//! Four operations over one persisted record, all sharing the reconciler's
//! outcome protocol: 204 when the request changes nothing observable, 200
//! with the delta when it does. Idempotent resubmission of any payload is
//! expected to resolve to 204 through the diff, not through errors.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{Json, Router};
use serde_json::Value;

use glyphkit_core::error::ApiError;
use glyphkit_core::reconciler::{Outcome, Reconciler};

use crate::auth::AdminToken;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::{self, PgSettingsStore};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/conflict-detection/until", put(update_detection_window))
        .route(
            "/v1/conflict-detection/conflicts",
            post(report_conflicts).delete(delete_conflicts),
        )
        .route(
            "/v1/conflict-detection/conflicts/blocklist",
            put(update_blocklist),
        )
}

fn reconciler(state: &AppState) -> Reconciler<PgSettingsStore> {
    Reconciler::new(PgSettingsStore::new(state.db.clone()))
}

fn outcome_response<T: serde::Serialize>(outcome: Outcome<T>) -> Response {
    match outcome {
        Outcome::NoChange => StatusCode::NO_CONTENT.into_response(),
        Outcome::Updated(payload) => (StatusCode::OK, Json(payload)).into_response(),
    }
}

/// Report detected conflicts
///
/// The body maps each tag's content hash to its observed attributes; entries
/// overwrite any previous report for the same hash. Returns 404 while the
/// detection window is closed.
#[utoipa::path(
    post,
    path = "/v1/conflict-detection/conflicts",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Registry updated; body is the new client map"),
        (status = 204, description = "Report changed nothing"),
        (status = 400, description = "Body is not a valid client map", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Conflict detection is not active", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "conflict-detection"
)]
pub async fn report_conflicts(
    State(state): State<AppState>,
    _admin: AdminToken,
    AppJson(body): AppJson<Value>,
) -> Result<Response, AppError> {
    let store = PgSettingsStore::new(state.db.clone());
    let active = store::detection_active(&store).await?;

    let outcome = reconciler(&state).report(&body, active).await?;
    if let Outcome::Updated(clients) = &outcome {
        tracing::info!(clients = clients.len(), "conflict report updated registry");
    }
    Ok(outcome_response(outcome))
}

/// Forget previously detected conflicts
///
/// The body is an array of content hashes to remove; unknown hashes are
/// ignored.
#[utoipa::path(
    delete,
    path = "/v1/conflict-detection/conflicts",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Registry updated; body is the new client map"),
        (status = 204, description = "Nothing to remove"),
        (status = 400, description = "Body is not an array of content hashes", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "conflict-detection"
)]
pub async fn delete_conflicts(
    State(state): State<AppState>,
    _admin: AdminToken,
    AppJson(body): AppJson<Value>,
) -> Result<Response, AppError> {
    let outcome = reconciler(&state).delete(&body).await?;
    Ok(outcome_response(outcome))
}

/// Open, move, or clear the detection window
///
/// The body is a Unix timestamp as raw text; `0` clears the window.
#[utoipa::path(
    put,
    path = "/v1/conflict-detection/until",
    request_body = String,
    responses(
        (status = 200, description = "Window updated; body is the new timestamp"),
        (status = 204, description = "Window already had this value"),
        (status = 400, description = "Body is not an integer timestamp", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "conflict-detection"
)]
pub async fn update_detection_window(
    State(state): State<AppState>,
    _admin: AdminToken,
    body: String,
) -> Result<Response, AppError> {
    let outcome = reconciler(&state).set_detection_window(&body).await?;
    if let Outcome::Updated(until) = outcome {
        tracing::info!(until, "detection window updated");
    }
    Ok(outcome_response(outcome))
}

/// Replace the blocklist
///
/// The body is the complete new blocklist as an array of content hashes;
/// every registered client not listed is unblocked. Returns the resulting
/// blocklist view, not the client map.
#[utoipa::path(
    put,
    path = "/v1/conflict-detection/conflicts/blocklist",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Blocklist updated; body is the new blocklist"),
        (status = 204, description = "Blocklist already matched"),
        (status = 400, description = "Body is not an array of content hashes", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "conflict-detection"
)]
pub async fn update_blocklist(
    State(state): State<AppState>,
    _admin: AdminToken,
    AppJson(body): AppJson<Value>,
) -> Result<Response, AppError> {
    let outcome = reconciler(&state).set_blocklist(&body).await?;
    if let Outcome::Updated(blocklist) = &outcome {
        tracing::info!(blocked = blocklist.len(), "blocklist updated");
    }
    Ok(outcome_response(outcome))
}
