//! EntityStorage implementation for PostgreSQL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;

use crate::core::{EntityStorage, TrashFilter};
use crate::error::{BackendError, ResourceError, StorageError, StorageResult};
use crate::types::{BackendStatistics, EntityKind, StorageUsage, StoredEntity};

use super::PostgresBackend;

const ENTITY_COLUMNS: &str =
    "id, kind, owner_id, data, created_at, updated_at, deleted_at";

fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "postgres".to_string(),
        message,
        source: None,
    })
}

fn serialization_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::SerializationError { message })
}

fn row_to_entity(row: &Row) -> StorageResult<StoredEntity> {
    let kind: String = row.get(1);
    let kind: EntityKind = kind
        .parse()
        .map_err(|e: crate::error::ValidationError| serialization_error(e.to_string()))?;
    let created_at: DateTime<Utc> = row.get(4);
    let updated_at: DateTime<Utc> = row.get(5);
    let deleted_at: Option<DateTime<Utc>> = row.get(6);
    let data: Value = row.get(3);

    Ok(StoredEntity::from_storage(
        kind,
        row.get::<_, String>(0),
        row.get::<_, String>(2),
        data,
        created_at,
        updated_at,
        deleted_at,
    ))
}

fn trash_clause(filter: TrashFilter) -> &'static str {
    match filter {
        TrashFilter::Live => " AND deleted_at IS NULL",
        TrashFilter::Trashed => " AND deleted_at IS NOT NULL",
        TrashFilter::All => "",
    }
}

#[async_trait]
impl EntityStorage for PostgresBackend {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, entity: &StoredEntity) -> StorageResult<StoredEntity> {
        let client = self.get_client().await?;
        let size_bytes = entity.size_bytes() as i64;

        client
            .execute(
                "INSERT INTO entities (id, kind, owner_id, sort_name, size_bytes, data, created_at, updated_at, deleted_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &entity.id(),
                    &entity.kind().as_str(),
                    &entity.owner_id(),
                    &entity.name(),
                    &size_bytes,
                    entity.data(),
                    &entity.created_at(),
                    &entity.updated_at(),
                    &entity.deleted_at(),
                ],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StorageError::Resource(ResourceError::AlreadyExists {
                        kind: entity.kind(),
                        id: entity.id().to_string(),
                    })
                } else {
                    internal_error(format!("Failed to insert entity: {}", e))
                }
            })?;

        Ok(entity.clone())
    }

    async fn read(&self, id: &str) -> StorageResult<Option<StoredEntity>> {
        let client = self.get_client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = $1"),
                &[&id],
            )
            .await
            .map_err(|e| internal_error(format!("Failed to read entity: {}", e)))?;

        row.as_ref().map(row_to_entity).transpose()
    }

    async fn list_by_owner(
        &self,
        kind: EntityKind,
        owner_id: &str,
        filter: TrashFilter,
    ) -> StorageResult<Vec<StoredEntity>> {
        let client = self.get_client().await?;
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE kind = $1 AND owner_id = $2{}",
            trash_clause(filter)
        );
        let rows = client
            .query(&sql, &[&kind.as_str(), &owner_id])
            .await
            .map_err(|e| internal_error(format!("Failed to list entities: {}", e)))?;

        rows.iter().map(row_to_entity).collect()
    }

    async fn update(
        &self,
        entity: &StoredEntity,
        expected_updated_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let client = self.get_client().await?;
        let size_bytes = entity.size_bytes() as i64;

        let changed = client
            .execute(
                "UPDATE entities
                 SET owner_id = $1, sort_name = $2, size_bytes = $3, data = $4,
                     updated_at = $5, deleted_at = $6
                 WHERE id = $7 AND updated_at = $8",
                &[
                    &entity.owner_id(),
                    &entity.name(),
                    &size_bytes,
                    entity.data(),
                    &entity.updated_at(),
                    &entity.deleted_at(),
                    &entity.id(),
                    &expected_updated_at,
                ],
            )
            .await
            .map_err(|e| internal_error(format!("Failed to update entity: {}", e)))?;

        Ok(changed > 0)
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        let client = self.get_client().await?;
        let changed = client
            .execute("DELETE FROM entities WHERE id = $1", &[&id])
            .await
            .map_err(|e| internal_error(format!("Failed to delete entity: {}", e)))?;
        Ok(changed > 0)
    }

    async fn usage(&self, owner_id: &str) -> StorageResult<StorageUsage> {
        let client = self.get_client().await?;
        let row = client
            .query_one(
                "SELECT
                    COUNT(*) FILTER (WHERE deleted_at IS NULL),
                    COALESCE(SUM(size_bytes) FILTER (WHERE deleted_at IS NULL), 0)::BIGINT,
                    COUNT(*) FILTER (WHERE deleted_at IS NOT NULL),
                    COALESCE(SUM(size_bytes) FILTER (WHERE deleted_at IS NOT NULL), 0)::BIGINT
                 FROM entities WHERE kind = 'file' AND owner_id = $1",
                &[&owner_id],
            )
            .await
            .map_err(|e| internal_error(format!("Failed to compute usage: {}", e)))?;

        Ok(StorageUsage {
            file_count: row.get::<_, i64>(0) as u64,
            total_bytes: row.get::<_, i64>(1) as u64,
            trashed_count: row.get::<_, i64>(2) as u64,
            trashed_bytes: row.get::<_, i64>(3) as u64,
        })
    }

    async fn statistics(&self) -> StorageResult<BackendStatistics> {
        let client = self.get_client().await?;
        let rows = client
            .query(
                "SELECT kind, COUNT(*), COALESCE(SUM(size_bytes), 0)::BIGINT FROM entities GROUP BY kind",
                &[],
            )
            .await
            .map_err(|e| internal_error(format!("Failed to count entities: {}", e)))?;

        let mut entity_counts = BTreeMap::new();
        let mut total_file_bytes = 0;
        for row in rows {
            let kind: String = row.get(0);
            let Ok(kind) = kind.parse::<EntityKind>() else {
                continue;
            };
            if kind == EntityKind::File {
                total_file_bytes = row.get::<_, i64>(2) as u64;
            }
            entity_counts.insert(kind, row.get::<_, i64>(1) as u64);
        }

        Ok(BackendStatistics {
            entity_counts,
            total_file_bytes,
        })
    }
}
