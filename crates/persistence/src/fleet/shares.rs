//! File sharing between users.
//!
//! A share is owned by its recipient, so incoming shares list like any other
//! owned entity. Accepting one copies the file into the recipient's account
//! on the current primary; original and copy are independent afterwards.

use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::error::{ResourceError, StorageError, StorageResult, ValidationError};
use crate::types::entity::now;
use crate::types::{
    Entity, FileEntry, Notification, NotificationCategory, Share, ShareStatus, StoredEntity,
    new_entity_id,
};

use super::Fleet;

impl Fleet {
    /// Offers a file to another user.
    ///
    /// Creates a pending share owned by the recipient and notifies them.
    #[instrument(skip(self))]
    pub async fn share_file(
        &self,
        file_id: &str,
        from_user: &str,
        to_user: &str,
    ) -> StorageResult<Share> {
        let file: FileEntry =
            self.find_entity(file_id)
                .await?
                .ok_or_else(|| ResourceError::NotFound {
                    id: file_id.to_string(),
                })?;

        if file.owner_id != from_user {
            return Err(not_permitted(from_user, "share", file_id));
        }
        if file.deleted_at.is_some() {
            return Err(ResourceError::Gone {
                kind: FileEntry::KIND,
                id: file.id,
                deleted_at: file.deleted_at,
            }
            .into());
        }

        let share = self
            .create_entity(&Share {
                id: new_entity_id(),
                owner_id: to_user.to_string(),
                file_id: file.id.clone(),
                shared_by: from_user.to_string(),
                file_name: file.name.clone(),
                status: ShareStatus::Pending,
                accepted_file_id: None,
                created_at: now(),
            })
            .await?;

        self.notify(
            to_user,
            NotificationCategory::ShareReceived,
            format!("{from_user} shared \"{}\" with you", file.name),
            &share.id,
        )
        .await?;

        info!(share = %share.id, file = %file.id, to = %to_user, "File shared");
        Ok(share)
    }

    /// Accepts a pending share and returns the recipient's copy of the file.
    ///
    /// The share is claimed first: it flips to accepted only if it is still
    /// pending, so concurrent or repeated accepts produce one copy. If the copy
    /// cannot be stored the share goes back to pending.
    #[instrument(skip(self))]
    pub async fn accept_share(&self, share_id: &str, recipient: &str) -> StorageResult<FileEntry> {
        let share = self.pending_share(share_id, recipient, "accept").await?;
        let copy = self.prepare_copy(&share.file_id, recipient).await?;

        self.transition_share(
            &share.id,
            json!({"status": ShareStatus::Accepted, "acceptedFileId": copy.id()}),
        )
        .await?;

        if let Err(e) = self.insert_into_primary(&copy).await {
            warn!(share = %share.id, error = %e, "Copy failed, returning share to pending");
            let revert = json!({"status": ShareStatus::Pending, "acceptedFileId": null});
            let reverted = self
                .modify(&share.id, |entity| {
                    entity.apply_patch(&revert)?;
                    Ok(true)
                })
                .await;
            if let Err(revert_error) = reverted {
                warn!(share = %share.id, error = %revert_error, "Failed to return share to pending");
            }
            return Err(e);
        }
        let copy = FileEntry::from_stored(&copy)?;

        self.notify(
            &share.shared_by,
            NotificationCategory::ShareAccepted,
            format!("{recipient} accepted \"{}\"", share.file_name),
            &share.id,
        )
        .await?;

        info!(share = %share.id, copy = %copy.id, "Share accepted");
        Ok(copy)
    }

    /// Declines a pending share.
    #[instrument(skip(self))]
    pub async fn decline_share(&self, share_id: &str, recipient: &str) -> StorageResult<Share> {
        let share = self.pending_share(share_id, recipient, "decline").await?;

        let updated = self
            .transition_share(&share.id, json!({"status": ShareStatus::Declined}))
            .await?;

        self.notify(
            &share.shared_by,
            NotificationCategory::ShareDeclined,
            format!("{recipient} declined \"{}\"", share.file_name),
            &share.id,
        )
        .await?;

        Share::from_stored(&updated)
    }

    /// Applies `patch` to a share only while it is still pending.
    async fn transition_share(&self, share_id: &str, patch: Value) -> StorageResult<StoredEntity> {
        self.modify(share_id, |entity| {
            if Share::from_stored(entity)?.status != ShareStatus::Pending {
                return Err(no_longer_pending(share_id));
            }
            entity.apply_patch(&patch)?;
            Ok(true)
        })
        .await?
        .ok_or_else(|| {
            ResourceError::NotFound {
                id: share_id.to_string(),
            }
            .into()
        })
    }

    async fn pending_share(
        &self,
        share_id: &str,
        recipient: &str,
        operation: &str,
    ) -> StorageResult<Share> {
        let share: Share =
            self.find_entity(share_id)
                .await?
                .ok_or_else(|| ResourceError::NotFound {
                    id: share_id.to_string(),
                })?;

        if share.owner_id != recipient {
            return Err(not_permitted(recipient, operation, share_id));
        }
        if share.status != ShareStatus::Pending {
            return Err(no_longer_pending(share_id));
        }
        Ok(share)
    }

    async fn notify(
        &self,
        user: &str,
        category: NotificationCategory,
        message: String,
        related_id: &str,
    ) -> StorageResult<Notification> {
        self.create_entity(&Notification {
            id: new_entity_id(),
            owner_id: user.to_string(),
            category,
            message,
            read: false,
            related_id: Some(related_id.to_string()),
            created_at: now(),
        })
        .await
    }
}

fn no_longer_pending(share_id: &str) -> StorageError {
    ValidationError::InvalidEntity {
        message: format!("share {share_id} is no longer pending"),
    }
    .into()
}

fn not_permitted(actor: &str, operation: &str, id: &str) -> StorageError {
    ValidationError::NotPermitted {
        actor: actor.to_string(),
        operation: operation.to_string(),
        id: id.to_string(),
    }
    .into()
}
