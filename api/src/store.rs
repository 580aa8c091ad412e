//! Postgres-backed settings store.
//!
//! One `settings` row per named record, whole-blob reads and writes — the
//! reconciler owns all merge logic, the store stays a dumb key/value shelf.

use glyphkit_core::conflicts::{CONFLICT_DETECTION_KEY, ConflictDetectionSettings};
use glyphkit_core::reconciler::{SettingsStore, StoreError};
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SettingsStore for PgSettingsStore {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        sqlx::query_scalar::<_, serde_json::Value>("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError(format!("settings load failed: {e}")))
    }

    async fn save(&self, key: &str, value: serde_json::Value) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError(format!("settings save failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}

/// Detection-mode oracle: whether the persisted window is still open.
pub async fn detection_active(store: &PgSettingsStore) -> Result<bool, StoreError> {
    let settings = match store.load(CONFLICT_DETECTION_KEY).await? {
        Some(value) => serde_json::from_value::<ConflictDetectionSettings>(value)
            .map_err(|e| StoreError(format!("undecodable settings record: {e}")))?,
        None => ConflictDetectionSettings::default(),
    };
    Ok(settings.detection_active(chrono::Utc::now().timestamp()))
}
