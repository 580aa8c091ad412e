//! Types and pure helpers for the conflict-detection registry.
//!
//! The registry is a single persisted record: an optional detection-window
//! timestamp plus a map of "unregistered clients" — third-party script/link
//! tags the browser-side scanner found that look like Glyphkit's own loading
//! tags — keyed by the 32-char hex content hash the scanner computes over a
//! tag's observable attributes. The server validates hash shape but never
//! recomputes it.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// The well-known settings key the whole record is persisted under.
pub const CONFLICT_DETECTION_KEY: &str = "glyphkit_conflict_detection";

static CONTENT_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{32}$").expect("valid content hash regex"));

/// Map of content hash → detected client.
pub type UnregisteredClients = BTreeMap<String, ClientEntry>;

/// One detected third-party tag. Only the attributes the scanner hashes over
/// are stored; anything else a client submits is dropped during validation.
/// `blocked` is managed exclusively by the blocklist operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientEntry {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

/// The single persisted conflict-detection record.
///
/// Unknown top-level keys round-trip through `extra` untouched so the record
/// can carry data owned by other parts of the plugin. The two keys this
/// module owns are read leniently: a non-integer `detectConflictsUntil` is
/// treated as absent and a non-object `unregisteredClients` as empty, as the
/// original plugin did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetectionSettings {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_timestamp"
    )]
    pub detect_conflicts_until: Option<i64>,
    #[serde(default, deserialize_with = "lenient_clients")]
    pub unregistered_clients: UnregisteredClients,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ConflictDetectionSettings {
    /// Whether detection mode is open at `now` (Unix seconds).
    pub fn detection_active(&self, now: i64) -> bool {
        match self.detect_conflicts_until {
            Some(until) => until > now,
            None => false,
        }
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_i64())
}

fn lenient_clients<'de, D>(deserializer: D) -> Result<UnregisteredClients, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(map) = value else {
        return Ok(UnregisteredClients::new());
    };
    let mut clients = UnregisteredClients::new();
    for (hash, entry) in map {
        clients.insert(hash, project_entry(&entry));
    }
    Ok(clients)
}

/// Project an arbitrary JSON value down to the attributes a `ClientEntry`
/// carries, ignoring everything else. Used for lenient reads of persisted
/// data; incoming report bodies go through the stricter [`validate_report_body`].
fn project_entry(value: &Value) -> ClientEntry {
    let Value::Object(attrs) = value else {
        return ClientEntry::default();
    };
    let field = |name: &str| attrs.get(name).and_then(Value::as_str).map(str::to_owned);
    ClientEntry {
        kind: field("type"),
        technology: field("technology"),
        href: field("href"),
        src: field("src"),
        inner_text: field("innerText"),
        tag_name: field("tagName"),
        blocked: attrs.get("blocked").and_then(Value::as_bool),
    }
}

/// True iff `hash` is a 32-char lowercase hex content hash.
pub fn is_content_hash(hash: &str) -> bool {
    CONTENT_HASH_RE.is_match(hash)
}

/// Why a request body failed validation. Rendered into the 400 response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("request body must be a non-empty JSON object keyed by content hash")]
    NotAClientMap,
    #[error("request body must be a JSON array of content hashes")]
    NotAHashList,
    #[error("'{0}' is not a 32-character hex content hash")]
    BadHash(String),
    #[error("entry '{0}' must be a JSON object of tag attributes")]
    EntryNotAnObject(String),
    #[error("attribute '{attr}' of entry '{hash}' must be a string")]
    AttrNotAString { hash: String, attr: String },
    #[error("'{0}' is not an integer timestamp")]
    NotATimestamp(String),
}

const ALLOWED_ATTRS: &[&str] = &["type", "technology", "href", "src", "innerText", "tagName"];

/// Validate a report body: a non-empty object mapping content hashes to
/// attribute objects. Allowed attributes must be strings; attributes outside
/// the allowed set are silently dropped, not rejected. `blocked` is outside
/// the report schema and is likewise dropped.
pub fn validate_report_body(body: &Value) -> Result<UnregisteredClients, SchemaViolation> {
    let Value::Object(map) = body else {
        return Err(SchemaViolation::NotAClientMap);
    };
    if map.is_empty() {
        return Err(SchemaViolation::NotAClientMap);
    }

    let mut validated = UnregisteredClients::new();
    for (hash, attrs) in map {
        if !is_content_hash(hash) {
            return Err(SchemaViolation::BadHash(hash.clone()));
        }
        let Value::Object(attrs) = attrs else {
            return Err(SchemaViolation::EntryNotAnObject(hash.clone()));
        };

        let mut entry = ClientEntry::default();
        for (name, value) in attrs {
            if !ALLOWED_ATTRS.contains(&name.as_str()) {
                continue;
            }
            let Some(text) = value.as_str() else {
                return Err(SchemaViolation::AttrNotAString {
                    hash: hash.clone(),
                    attr: name.clone(),
                });
            };
            let text = Some(text.to_owned());
            match name.as_str() {
                "type" => entry.kind = text,
                "technology" => entry.technology = text,
                "href" => entry.href = text,
                "src" => entry.src = text,
                "innerText" => entry.inner_text = text,
                "tagName" => entry.tag_name = text,
                _ => unreachable!("allowed attrs are matched exhaustively"),
            }
        }
        validated.insert(hash.clone(), entry);
    }
    Ok(validated)
}

/// Validate a delete/blocklist body: an array (possibly empty) of content
/// hashes. Every element is checked; hashes unknown to the registry are the
/// caller's concern, not a schema error.
pub fn validate_hash_list(body: &Value) -> Result<Vec<String>, SchemaViolation> {
    let Value::Array(items) = body else {
        return Err(SchemaViolation::NotAHashList);
    };
    let mut hashes = Vec::with_capacity(items.len());
    for item in items {
        let hash = item
            .as_str()
            .filter(|h| is_content_hash(h))
            .ok_or_else(|| SchemaViolation::BadHash(item.to_string()))?;
        hashes.push(hash.to_owned());
    }
    Ok(hashes)
}

/// Two-level structural diff over the client map: true iff a key was added
/// or removed, or a shared key's entry differs. Ordering never matters.
pub fn has_changes(old: &UnregisteredClients, new: &UnregisteredClients) -> bool {
    if old.len() != new.len() {
        return true;
    }
    old.iter()
        .any(|(hash, entry)| new.get(hash) != Some(entry))
}

/// Derived blocklist view: the hashes whose entry is currently blocked.
pub fn blocklist(clients: &UnregisteredClients) -> Vec<String> {
    clients
        .iter()
        .filter(|(_, entry)| entry.blocked == Some(true))
        .map(|(hash, _)| hash.clone())
        .collect()
}
