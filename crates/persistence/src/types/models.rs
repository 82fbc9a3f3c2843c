//! Typed views over stored entities.
//!
//! Each model maps to one [`EntityKind`] and converts to and from
//! [`StoredEntity`] through the [`Entity`] trait. Field names serialize in
//! camelCase, matching the documents the request layer sends.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageResult, ValidationError};
use crate::types::{EntityKind, StoredEntity};

/// A typed entity.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// The kind this model is stored as.
    const KIND: EntityKind;

    /// Serializes the model into a creation payload.
    fn to_payload(&self) -> StorageResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Reads the model back from a stored entity.
    fn from_stored(stored: &StoredEntity) -> StorageResult<Self> {
        if stored.kind() != Self::KIND {
            return Err(ValidationError::InvalidEntity {
                message: format!(
                    "entity {} is a {}, not a {}",
                    stored.id(),
                    stored.kind(),
                    Self::KIND
                ),
            }
            .into());
        }
        Ok(serde_json::from_value(stored.document())?)
    }
}

/// An account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Entity id, also the owner id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Name shown in the UI.
    pub display_name: Option<String>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;
}

/// A folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    /// Entity id.
    pub id: String,
    /// Owning user.
    pub owner_id: String,
    /// Folder name.
    pub name: String,
    /// Enclosing folder; `None` at the root.
    pub parent_id: Option<String>,
    /// When the folder was created.
    pub created_at: DateTime<Utc>,
}

impl Entity for Folder {
    const KIND: EntityKind = EntityKind::Folder;
}

/// A file record. The bytes live in blob storage at `file_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Entity id.
    pub id: String,
    /// Owning user.
    pub owner_id: String,
    /// File name.
    pub name: String,
    /// Enclosing folder; `None` at the root.
    pub folder_id: Option<String>,
    /// Blob key.
    pub file_path: String,
    /// Blob store holding the bytes.
    pub provider: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Content type.
    pub mime_type: Option<String>,
    /// Name of the source file when this entry is a share copy.
    pub original_name: Option<String>,
    /// Id of the source file when this entry is a share copy.
    pub copied_from: Option<String>,
    /// When the file was uploaded.
    pub created_at: DateTime<Utc>,
    /// When the file was moved to the trash.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity for FileEntry {
    const KIND: EntityKind = EntityKind::File;
}

/// Lifecycle of a share offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    /// Waiting for the recipient.
    Pending,
    /// The recipient took a copy.
    Accepted,
    /// The recipient turned it down.
    Declined,
}

/// A share offer. The owner is the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    /// Entity id.
    pub id: String,
    /// The recipient.
    pub owner_id: String,
    /// The shared file.
    pub file_id: String,
    /// The user offering the file.
    pub shared_by: String,
    /// Name of the file when it was shared.
    pub file_name: String,
    /// Where the offer stands.
    pub status: ShareStatus,
    /// Id of the recipient's copy once accepted.
    pub accepted_file_id: Option<String>,
    /// When the offer was made.
    pub created_at: DateTime<Utc>,
}

impl Entity for Share {
    const KIND: EntityKind = EntityKind::Share;
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// A file was shared with the user.
    ShareReceived,
    /// A recipient accepted the user's share.
    ShareAccepted,
    /// A recipient declined the user's share.
    ShareDeclined,
    /// Anything else.
    System,
}

/// A notification for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Entity id.
    pub id: String,
    /// Addressee.
    pub owner_id: String,
    /// What the notification is about.
    pub category: NotificationCategory,
    /// Display text.
    pub message: String,
    /// Whether the user has seen it.
    #[serde(default)]
    pub read: bool,
    /// Entity the notification refers to.
    pub related_id: Option<String>,
    /// When it was raised.
    pub created_at: DateTime<Utc>,
}

impl Entity for Notification {
    const KIND: EntityKind = EntityKind::Notification;
}

/// A login session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    /// Session token id.
    pub id: String,
    /// The signed-in user.
    pub owner_id: String,
    /// End of validity.
    pub expires_at: DateTime<Utc>,
    /// Client that opened the session.
    pub user_agent: Option<String>,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
}

impl Entity for UserSession {
    const KIND: EntityKind = EntityKind::Session;
}

impl UserSession {
    /// Returns true if the session has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
