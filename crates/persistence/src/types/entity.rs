//! Stored entity types.
//!
//! This module defines [`StoredEntity`], the form every logical entity takes
//! inside a backend, and [`EntityKind`], which carries the per-kind rules
//! (ordering, soft-delete support, ownership).

use std::cmp::Ordering;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StorageResult, ValidationError};

/// Payload keys that hold entity metadata rather than kind-specific data.
const METADATA_KEYS: [&str; 5] = ["id", "ownerId", "createdAt", "updatedAt", "deletedAt"];

/// The logical entity kinds stored in the fleet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// An account.
    User,
    /// A folder owned by a user.
    Folder,
    /// A file record pointing into blob storage.
    File,
    /// A share offer; owned by its recipient.
    Share,
    /// A notification for a user.
    Notification,
    /// A login session.
    Session,
}

/// The natural ordering of merged listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOrdering {
    /// `created_at` descending.
    NewestFirst,
    /// Display name ascending, case-insensitive.
    NameAscending,
}

impl EntityKind {
    /// Every kind, in declaration order.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::User,
        EntityKind::Folder,
        EntityKind::File,
        EntityKind::Share,
        EntityKind::Notification,
        EntityKind::Session,
    ];

    /// Returns the storage name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Folder => "folder",
            EntityKind::File => "file",
            EntityKind::Share => "share",
            EntityKind::Notification => "notification",
            EntityKind::Session => "session",
        }
    }

    /// Returns the ordering merged listings of this kind follow.
    pub fn ordering(&self) -> EntityOrdering {
        match self {
            EntityKind::File
            | EntityKind::Notification
            | EntityKind::Share
            | EntityKind::Session => EntityOrdering::NewestFirst,
            EntityKind::Folder | EntityKind::User => EntityOrdering::NameAscending,
        }
    }

    /// Only files carry a soft-delete marker; everything else is hard-deleted.
    pub fn supports_soft_delete(&self) -> bool {
        matches!(self, EntityKind::File)
    }

    /// A user owns itself.
    pub fn owner_is_self(&self) -> bool {
        matches!(self, EntityKind::User)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::InvalidEntity {
                message: format!("unknown entity kind: {s}"),
            })
    }
}

impl EntityOrdering {
    /// Compares two entities; ties fall back to the id so merges are deterministic.
    pub fn compare(&self, a: &StoredEntity, b: &StoredEntity) -> Ordering {
        let primary = match self {
            EntityOrdering::NewestFirst => b.created_at.cmp(&a.created_at),
            EntityOrdering::NameAscending => a
                .name()
                .unwrap_or_default()
                .to_lowercase()
                .cmp(&b.name().unwrap_or_default().to_lowercase()),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Mints a new entity id.
///
/// Ids are random v4 UUIDs so the same id space is valid on every backend.
pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time at microsecond precision, which every backend can store exactly.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// An entity with persistence metadata.
///
/// The kind-specific fields live in `data` as a JSON object; `id`, owner and
/// timestamps are held separately so every backend can index them.
///
/// # Examples
///
/// ```
/// use nimbus_persistence::types::{EntityKind, StoredEntity};
/// use serde_json::json;
///
/// let folder = StoredEntity::from_payload(
///     EntityKind::Folder,
///     json!({"ownerId": "u-1", "name": "Photos"}),
/// )
/// .unwrap();
///
/// assert_eq!(folder.owner_id(), "u-1");
/// assert_eq!(folder.name(), Some("Photos"));
/// assert_eq!(folder.document()["id"], folder.id());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    /// The entity kind.
    kind: EntityKind,

    /// Globally unique id.
    id: String,

    /// The owning user's id.
    owner_id: String,

    /// Kind-specific fields as a JSON object.
    data: Value,

    /// When the entity was created.
    created_at: DateTime<Utc>,

    /// When the entity was last modified.
    updated_at: DateTime<Utc>,

    /// If the entity is in the trash, when it was put there.
    deleted_at: Option<DateTime<Utc>>,
}

impl StoredEntity {
    /// Creates a new entity with timestamps set to now.
    pub fn new(
        kind: EntityKind,
        id: impl Into<String>,
        owner_id: impl Into<String>,
        data: Value,
    ) -> Self {
        let now = now();
        Self {
            kind,
            id: id.into(),
            owner_id: owner_id.into(),
            data,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Builds an entity from a request payload.
    ///
    /// `id` is taken from the payload or minted; `ownerId` is required except
    /// for users, which own themselves. A valid RFC 3339 `createdAt` is kept,
    /// other metadata keys are dropped.
    pub fn from_payload(kind: EntityKind, payload: Value) -> StorageResult<Self> {
        let Value::Object(mut map) = payload else {
            return Err(ValidationError::InvalidEntity {
                message: format!("{kind} payload must be a JSON object"),
            }
            .into());
        };

        let id = match map.remove("id") {
            None | Some(Value::Null) => new_entity_id(),
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(_) => {
                return Err(ValidationError::InvalidEntity {
                    message: "id must be a non-empty string".to_string(),
                }
                .into());
            }
        };

        let owner_id = match map.remove("ownerId") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ if kind.owner_is_self() => id.clone(),
            _ => {
                return Err(ValidationError::MissingRequiredField {
                    field: "ownerId".to_string(),
                }
                .into());
            }
        };

        let created_at = map
            .remove("createdAt")
            .and_then(|v| v.as_str().map(str::to_owned))
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(6));

        strip_metadata(&mut map);

        let mut entity = Self::new(kind, id, owner_id, Value::Object(map));
        if let Some(created_at) = created_at {
            entity.created_at = created_at;
        }
        Ok(entity)
    }

    /// Creates a stored entity from existing data (e.g., loaded from database).
    pub fn from_storage(
        kind: EntityKind,
        id: impl Into<String>,
        owner_id: impl Into<String>,
        data: Value,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            owner_id: owner_id.into(),
            data,
            created_at,
            updated_at,
            deleted_at,
        }
    }

    /// Returns the entity kind.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns the entity id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the owner id.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Returns the kind-specific data.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Returns when the entity was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the entity was last modified.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns when the entity was trashed, if it was.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Returns true if the entity is in the trash.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The display name used for name-ordered listings.
    pub fn name(&self) -> Option<&str> {
        self.data
            .get("name")
            .or_else(|| self.data.get("username"))
            .and_then(Value::as_str)
    }

    /// File size in bytes; zero for non-file entities.
    pub fn size_bytes(&self) -> u64 {
        if self.kind != EntityKind::File {
            return 0;
        }
        self.data.get("size").and_then(Value::as_u64).unwrap_or(0)
    }

    /// Returns the full JSON document: `data` plus the metadata fields.
    pub fn document(&self) -> Value {
        let mut map = match &self.data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        map.insert("id".to_string(), Value::String(self.id.clone()));
        if !self.kind.owner_is_self() {
            map.insert("ownerId".to_string(), Value::String(self.owner_id.clone()));
        }
        map.insert(
            "createdAt".to_string(),
            Value::String(self.created_at.to_rfc3339()),
        );
        map.insert(
            "updatedAt".to_string(),
            Value::String(self.updated_at.to_rfc3339()),
        );
        map.insert(
            "deletedAt".to_string(),
            self.deleted_at
                .map(|dt| Value::String(dt.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        Value::Object(map)
    }

    /// Applies an RFC 7396 merge patch to `data` and bumps `updated_at`.
    ///
    /// `id` and `ownerId` cannot be patched; other metadata keys are ignored.
    pub fn apply_patch(&mut self, patch: &Value) -> StorageResult<()> {
        let Value::Object(patch_map) = patch else {
            return Err(ValidationError::InvalidPatch {
                message: "patch must be a JSON object".to_string(),
            }
            .into());
        };
        for field in ["id", "ownerId"] {
            if patch_map.contains_key(field) {
                return Err(ValidationError::InvalidPatch {
                    message: format!("{field} cannot be changed"),
                }
                .into());
            }
        }

        let mut patch_map = patch_map.clone();
        strip_metadata(&mut patch_map);
        json_patch::merge(&mut self.data, &Value::Object(patch_map));
        self.touch();
        Ok(())
    }

    /// Moves the entity to the trash.
    pub fn mark_deleted(&mut self) -> StorageResult<()> {
        self.require_soft_delete("soft delete")?;
        self.touch();
        self.deleted_at = Some(self.updated_at);
        Ok(())
    }

    /// Takes the entity out of the trash.
    pub fn restore(&mut self) -> StorageResult<()> {
        self.require_soft_delete("restore")?;
        self.deleted_at = None;
        self.touch();
        Ok(())
    }

    /// Builds an independent copy for another owner.
    ///
    /// The copy gets a fresh id and fresh timestamps. File copies record the
    /// source's name as `originalName` and the source id as `copiedFrom`, and
    /// keep the same blob pointers.
    pub fn copy_for_owner(&self, new_owner_id: impl Into<String>) -> Self {
        let mut data = self.data.clone();
        if self.kind == EntityKind::File
            && let Value::Object(map) = &mut data
        {
            if let Some(name) = map.get("name").cloned() {
                map.insert("originalName".to_string(), name);
            }
            map.insert("copiedFrom".to_string(), Value::String(self.id.clone()));
        }
        Self::new(self.kind, new_entity_id(), new_owner_id, data)
    }

    /// Advances `updated_at`, always past its previous value.
    ///
    /// Backends use `updated_at` as the compare-and-set token for updates, so
    /// two revisions of a row never share one.
    fn touch(&mut self) {
        let next = self.updated_at + chrono::Duration::microseconds(1);
        self.updated_at = now().max(next);
    }

    fn require_soft_delete(&self, operation: &str) -> StorageResult<()> {
        if self.kind.supports_soft_delete() {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedOperation {
                kind: self.kind,
                operation: operation.to_string(),
            }
            .into())
        }
    }
}

fn strip_metadata(map: &mut Map<String, Value>) {
    for key in METADATA_KEYS {
        map.remove(key);
    }
}
