//! The conflict registry reconciler.
//!
//! Four operations over the single persisted conflict-detection record, each
//! following the same read-modify-write cycle: load the current snapshot,
//! derive a candidate, diff, and either persist and return the delta or
//! report no change. The store handle is injected; the reconciler holds no
//! ambient state and performs no locking — concurrent writers race at the
//! read-modify-write boundary exactly as the plugin always has.

use serde_json::Value;

use crate::conflicts::{
    self, CONFLICT_DETECTION_KEY, ConflictDetectionSettings, SchemaViolation, UnregisteredClients,
};

/// Failure inside the persistence backend. The api crate wraps its driver
/// errors into this so the core stays free of any SQL concern.
#[derive(Debug, thiserror::Error)]
#[error("settings store failure: {0}")]
pub struct StoreError(pub String);

/// Whole-record load/save of one named settings blob.
///
/// `save` distinguishes the store *rejecting* the write (`Ok(false)`) from
/// the store itself failing (`Err`); the former is the caller's 400, the
/// latter a 500.
pub trait SettingsStore: Send + Sync {
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;
    fn save(
        &self,
        key: &str,
        value: Value,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// A significant non-error outcome: either nothing observable changed (the
/// transport maps this to 204) or the record was persisted and `T` is the
/// response payload (200).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    NoChange,
    Updated(T),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Malformed or out-of-contract input — the caller's fault.
    #[error("invalid request body: {0}")]
    Schema(#[from] SchemaViolation),
    /// The operation requires detection mode to be open.
    #[error("conflict detection is not active")]
    NotActive,
    /// The store rejected the write.
    #[error("failed to persist conflict detection settings")]
    PersistFailed,
    /// Unexpected backend fault.
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Reconciler<S> {
    store: S,
}

impl<S: SettingsStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn load_settings(&self) -> Result<ConflictDetectionSettings, ReconcileError> {
        match self.store.load(CONFLICT_DETECTION_KEY).await? {
            Some(value) => {
                // Settings are read leniently; a shape this fails on is one
                // serde_json itself cannot treat as a JSON value.
                serde_json::from_value(value)
                    .map_err(|e| StoreError(format!("undecodable settings record: {e}")).into())
            }
            None => Ok(ConflictDetectionSettings::default()),
        }
    }

    async fn persist(&self, settings: &ConflictDetectionSettings) -> Result<(), ReconcileError> {
        let value = serde_json::to_value(settings)
            .map_err(|e| StoreError(format!("unencodable settings record: {e}")))?;
        if self.store.save(CONFLICT_DETECTION_KEY, value).await? {
            Ok(())
        } else {
            Err(ReconcileError::PersistFailed)
        }
    }

    async fn persist_clients(
        &self,
        mut settings: ConflictDetectionSettings,
        clients: UnregisteredClients,
    ) -> Result<Outcome<UnregisteredClients>, ReconcileError> {
        if !conflicts::has_changes(&settings.unregistered_clients, &clients) {
            return Ok(Outcome::NoChange);
        }
        settings.unregistered_clients = clients.clone();
        self.persist(&settings).await?;
        Ok(Outcome::Updated(clients))
    }

    /// Report detected conflicts: add and/or overwrite unregistered clients.
    ///
    /// Gated on detection mode being open; when it is closed the store is
    /// never touched. Each validated entry replaces its predecessor
    /// wholesale, except that a previously set `blocked` flag is carried
    /// over — re-noticing a tag must not unblock it.
    pub async fn report(
        &self,
        body: &Value,
        detection_active: bool,
    ) -> Result<Outcome<UnregisteredClients>, ReconcileError> {
        if !detection_active {
            return Err(ReconcileError::NotActive);
        }
        let incoming = conflicts::validate_report_body(body)?;

        let settings = self.load_settings().await?;
        let mut candidate = settings.unregistered_clients.clone();
        for (hash, mut entry) in incoming {
            if let Some(previous) = settings.unregistered_clients.get(&hash) {
                entry.blocked = previous.blocked;
            }
            candidate.insert(hash, entry);
        }
        self.persist_clients(settings, candidate).await
    }

    /// Forget previously detected conflicts. Hashes absent from the registry
    /// are silently ignored; an empty list is a valid no-op.
    pub async fn delete(
        &self,
        body: &Value,
    ) -> Result<Outcome<UnregisteredClients>, ReconcileError> {
        let hashes = conflicts::validate_hash_list(body)?;

        let settings = self.load_settings().await?;
        let mut candidate = settings.unregistered_clients.clone();
        for hash in &hashes {
            candidate.remove(hash);
        }
        self.persist_clients(settings, candidate).await
    }

    /// Open, move, or clear the detection window. The body is the raw
    /// request text; `"0"` is the documented way to clear the window.
    pub async fn set_detection_window(
        &self,
        raw_body: &str,
    ) -> Result<Outcome<i64>, ReconcileError> {
        let until: i64 = raw_body
            .trim()
            .parse()
            .map_err(|_| SchemaViolation::NotATimestamp(raw_body.to_owned()))?;

        let mut settings = self.load_settings().await?;
        if settings.detect_conflicts_until == Some(until) {
            return Ok(Outcome::NoChange);
        }
        settings.detect_conflicts_until = Some(until);
        self.persist(&settings).await?;
        Ok(Outcome::Updated(until))
    }

    /// Replace the blocklist: every *existing* entry's `blocked` becomes its
    /// membership in the given hash list. Unknown hashes create nothing.
    /// The success payload is the derived blocklist view rather than the raw
    /// client map — the UI renders the two from different calls.
    pub async fn set_blocklist(
        &self,
        body: &Value,
    ) -> Result<Outcome<Vec<String>>, ReconcileError> {
        let hashes = conflicts::validate_hash_list(body)?;

        let settings = self.load_settings().await?;
        let mut candidate = settings.unregistered_clients.clone();
        for (hash, entry) in candidate.iter_mut() {
            entry.blocked = Some(hashes.contains(hash));
        }
        match self.persist_clients(settings, candidate).await? {
            Outcome::NoChange => Ok(Outcome::NoChange),
            Outcome::Updated(clients) => Ok(Outcome::Updated(conflicts::blocklist(&clients))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::ClientEntry;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory store double: one record, call counters, switchable save
    /// rejection.
    #[derive(Default)]
    struct MemoryStore {
        record: Mutex<Option<Value>>,
        loads: Mutex<usize>,
        saves: Mutex<usize>,
        reject_saves: bool,
    }

    impl MemoryStore {
        fn with_record(value: Value) -> Self {
            Self {
                record: Mutex::new(Some(value)),
                ..Default::default()
            }
        }

        fn record(&self) -> Option<Value> {
            self.record.lock().unwrap().clone()
        }

        fn calls(&self) -> (usize, usize) {
            (*self.loads.lock().unwrap(), *self.saves.lock().unwrap())
        }
    }

    impl SettingsStore for &MemoryStore {
        async fn load(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            *self.loads.lock().unwrap() += 1;
            Ok(self.record.lock().unwrap().clone())
        }

        async fn save(&self, _key: &str, value: Value) -> Result<bool, StoreError> {
            *self.saves.lock().unwrap() += 1;
            if self.reject_saves {
                return Ok(false);
            }
            *self.record.lock().unwrap() = Some(value);
            Ok(true)
        }
    }

    fn hash(c: char) -> String {
        std::iter::repeat_n(c, 32).collect()
    }

    fn script_report(c: char) -> Value {
        json!({ hash(c): { "tagName": "script", "src": "https://example.com/icons.js" } })
    }

    #[tokio::test]
    async fn report_persists_then_repeats_as_no_change() {
        let store = MemoryStore::default();
        let reconciler = Reconciler::new(&store);

        let first = reconciler.report(&script_report('a'), true).await.unwrap();
        let Outcome::Updated(clients) = first else {
            panic!("first report must update");
        };
        assert_eq!(clients[&hash('a')].tag_name.as_deref(), Some("script"));

        let second = reconciler.report(&script_report('a'), true).await.unwrap();
        assert_eq!(second, Outcome::NoChange);
        assert_eq!(store.calls().1, 1, "a no-op must not write");
    }

    #[tokio::test]
    async fn report_when_inactive_never_touches_store() {
        let store = MemoryStore::default();
        let reconciler = Reconciler::new(&store);

        let err = reconciler.report(&script_report('a'), false).await.unwrap_err();
        assert!(matches!(err, ReconcileError::NotActive));
        assert_eq!(store.calls(), (0, 0));
    }

    #[tokio::test]
    async fn report_drops_bogus_attributes_before_persisting() {
        let store = MemoryStore::default();
        let reconciler = Reconciler::new(&store);

        let body = json!({ hash('a'): { "tagName": "script", "bogus": "x" } });
        let Outcome::Updated(clients) = reconciler.report(&body, true).await.unwrap() else {
            panic!("expected update");
        };
        assert_eq!(
            clients[&hash('a')],
            ClientEntry { tag_name: Some("script".into()), ..Default::default() }
        );
        let persisted = store.record().unwrap();
        assert_eq!(
            persisted["unregisteredClients"][hash('a')],
            json!({ "tagName": "script" })
        );
    }

    #[tokio::test]
    async fn report_preserves_blocked_flag_across_overwrite() {
        let store = MemoryStore::with_record(json!({
            "unregisteredClients": {
                hash('a'): { "tagName": "script", "blocked": true }
            }
        }));
        let reconciler = Reconciler::new(&store);

        let body = json!({ hash('a'): { "tagName": "link", "href": "https://x/icons.css" } });
        let Outcome::Updated(clients) = reconciler.report(&body, true).await.unwrap() else {
            panic!("expected update");
        };
        let entry = &clients[&hash('a')];
        assert_eq!(entry.tag_name.as_deref(), Some("link"));
        assert_eq!(entry.src, None, "overwrite is wholesale, not field-merged");
        assert_eq!(entry.blocked, Some(true));
    }

    #[tokio::test]
    async fn report_rejects_bad_schema() {
        let store = MemoryStore::default();
        let reconciler = Reconciler::new(&store);

        for body in [json!({}), json!([]), json!({ "tooshort": {} })] {
            let err = reconciler.report(&body, true).await.unwrap_err();
            assert!(matches!(err, ReconcileError::Schema(_)), "body: {body}");
        }
        assert_eq!(store.calls().1, 0);
    }

    #[tokio::test]
    async fn operations_leave_unrelated_record_keys_untouched() {
        let store = MemoryStore::with_record(json!({
            "detectConflictsUntil": 4102444800i64,
            "kitToken": "abc123",
            "unregisteredClients": {}
        }));
        let reconciler = Reconciler::new(&store);

        reconciler.report(&script_report('a'), true).await.unwrap();
        let persisted = store.record().unwrap();
        assert_eq!(persisted["kitToken"], json!("abc123"));
        assert_eq!(persisted["detectConflictsUntil"], json!(4102444800i64));
    }

    #[tokio::test]
    async fn delete_removes_listed_and_ignores_unknown() {
        let store = MemoryStore::with_record(json!({
            "unregisteredClients": { hash('a'): { "tagName": "script" } }
        }));
        let reconciler = Reconciler::new(&store);

        let outcome = reconciler
            .delete(&json!([hash('a'), hash('f')]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Updated(UnregisteredClients::new()));
        assert_eq!(
            store.record().unwrap()["unregisteredClients"],
            json!({})
        );
    }

    #[tokio::test]
    async fn delete_of_unknown_hashes_is_no_change() {
        let store = MemoryStore::with_record(json!({
            "unregisteredClients": { hash('a'): { "tagName": "script" } }
        }));
        let reconciler = Reconciler::new(&store);

        assert_eq!(
            reconciler.delete(&json!([hash('b')])).await.unwrap(),
            Outcome::NoChange
        );
        assert_eq!(
            reconciler.delete(&json!([])).await.unwrap(),
            Outcome::NoChange
        );
        assert_eq!(store.calls().1, 0);
    }

    #[tokio::test]
    async fn delete_rejects_malformed_lists() {
        let store = MemoryStore::default();
        let reconciler = Reconciler::new(&store);

        for body in [json!("x"), json!(["short"]), json!([hash('A')]), json!([1])] {
            let err = reconciler.delete(&body).await.unwrap_err();
            assert!(matches!(err, ReconcileError::Schema(_)), "body: {body}");
        }
    }

    #[tokio::test]
    async fn window_update_and_idempotent_resubmission() {
        let store = MemoryStore::default();
        let reconciler = Reconciler::new(&store);

        assert_eq!(
            reconciler.set_detection_window("4102444800").await.unwrap(),
            Outcome::Updated(4102444800)
        );
        assert_eq!(
            reconciler.set_detection_window("4102444800").await.unwrap(),
            Outcome::NoChange
        );
        assert_eq!(store.calls().1, 1);
    }

    #[tokio::test]
    async fn window_zero_is_valid_and_empty_is_not() {
        let store = MemoryStore::default();
        let reconciler = Reconciler::new(&store);

        assert_eq!(
            reconciler.set_detection_window("0").await.unwrap(),
            Outcome::Updated(0)
        );
        for body in ["", "soon", "123abc"] {
            let err = reconciler.set_detection_window(body).await.unwrap_err();
            assert!(matches!(err, ReconcileError::Schema(_)), "body: {body:?}");
        }
    }

    #[tokio::test]
    async fn window_update_leaves_clients_untouched() {
        let store = MemoryStore::with_record(json!({
            "unregisteredClients": { hash('a'): { "tagName": "script" } }
        }));
        let reconciler = Reconciler::new(&store);

        reconciler.set_detection_window("4102444800").await.unwrap();
        let persisted = store.record().unwrap();
        assert_eq!(
            persisted["unregisteredClients"][hash('a')],
            json!({ "tagName": "script" })
        );
    }

    #[tokio::test]
    async fn blocklist_flags_members_and_unflags_the_rest() {
        let store = MemoryStore::with_record(json!({
            "unregisteredClients": {
                hash('a'): { "tagName": "script" },
                hash('b'): { "tagName": "link", "blocked": true }
            }
        }));
        let reconciler = Reconciler::new(&store);

        let outcome = reconciler.set_blocklist(&json!([hash('a')])).await.unwrap();
        assert_eq!(outcome, Outcome::Updated(vec![hash('a')]));

        let persisted = store.record().unwrap();
        assert_eq!(persisted["unregisteredClients"][hash('a')]["blocked"], json!(true));
        assert_eq!(persisted["unregisteredClients"][hash('b')]["blocked"], json!(false));
    }

    #[tokio::test]
    async fn blocklist_ignores_unknown_hashes() {
        let store = MemoryStore::with_record(json!({
            "unregisteredClients": { hash('a'): { "tagName": "script" } }
        }));
        let reconciler = Reconciler::new(&store);

        let outcome = reconciler
            .set_blocklist(&json!([hash('a'), hash('f')]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Updated(vec![hash('a')]));
        let persisted = store.record().unwrap();
        assert!(persisted["unregisteredClients"].get(hash('f')).is_none());
    }

    #[tokio::test]
    async fn empty_blocklist_clears_then_resubmits_as_no_change() {
        let store = MemoryStore::with_record(json!({
            "unregisteredClients": {
                hash('a'): { "tagName": "script", "blocked": true },
                hash('b'): { "tagName": "link" }
            }
        }));
        let reconciler = Reconciler::new(&store);

        // First pass flags everything false, which is itself a change.
        assert_eq!(
            reconciler.set_blocklist(&json!([])).await.unwrap(),
            Outcome::Updated(Vec::new())
        );
        // Now everything already carries blocked=false.
        assert_eq!(
            reconciler.set_blocklist(&json!([])).await.unwrap(),
            Outcome::NoChange
        );
    }

    #[tokio::test]
    async fn rejected_save_surfaces_as_persist_failed() {
        let store = MemoryStore {
            reject_saves: true,
            ..Default::default()
        };
        let reconciler = Reconciler::new(&store);

        let err = reconciler.report(&script_report('a'), true).await.unwrap_err();
        assert!(matches!(err, ReconcileError::PersistFailed));
    }
}
