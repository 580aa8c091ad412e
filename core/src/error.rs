use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response body, shared by every endpoint. The settings UI
/// branches on `error`, never on the message text.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "schema_invalid", "not_active")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Request ID for tracing and debugging
    pub request_id: String,
}

/// Error codes used across the API
pub mod codes {
    pub const SCHEMA_INVALID: &str = "schema_invalid";
    pub const NOT_ACTIVE: &str = "not_active";
    pub const PERSIST_FAILED: &str = "persist_failed";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const UPSTREAM_REJECTED: &str = "upstream_rejected";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
