//! Test fixtures for fleet testing.
//!
//! Payload builders for the entity kinds the tests use most, plus a helper
//! to build stored entities with controlled timestamps.

use chrono::{Duration, SubsecRound, Utc};
use serde_json::{Value, json};

use nimbus_persistence::types::{EntityKind, StoredEntity, new_entity_id};

/// Payload for a file owned by `owner`.
pub fn file_payload(owner: &str, name: &str, size: u64) -> Value {
    json!({
        "ownerId": owner,
        "name": name,
        "filePath": format!("blobs/{owner}/{name}"),
        "provider": "local",
        "size": size,
        "mimeType": "application/octet-stream"
    })
}

/// Payload for a folder owned by `owner`.
pub fn folder_payload(owner: &str, name: &str) -> Value {
    json!({"ownerId": owner, "name": name})
}

/// Payload for a system notification addressed to `owner`.
pub fn notification_payload(owner: &str, message: &str) -> Value {
    json!({"ownerId": owner, "category": "system", "message": message})
}

/// A stored file created `minutes_ago` minutes in the past.
pub fn file_at(owner: &str, name: &str, minutes_ago: i64) -> StoredEntity {
    let at = (Utc::now() - Duration::minutes(minutes_ago)).trunc_subsecs(6);
    StoredEntity::from_storage(
        EntityKind::File,
        new_entity_id(),
        owner,
        json!({"name": name, "filePath": format!("blobs/{owner}/{name}"), "size": 10}),
        at,
        at,
        None,
    )
}
