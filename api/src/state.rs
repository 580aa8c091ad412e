use sqlx::PgPool;

use crate::metadata::MetadataClient;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub metadata: MetadataClient,
    pub admin_token: String,
}
