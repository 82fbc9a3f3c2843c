//! EntityStorage implementation for SQLite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{ErrorCode, OptionalExtension, Row, params};

use crate::core::{EntityStorage, TrashFilter};
use crate::error::{BackendError, ResourceError, StorageError, StorageResult};
use crate::types::{BackendStatistics, EntityKind, StorageUsage, StoredEntity};

use super::SqliteBackend;

const ENTITY_COLUMNS: &str =
    "id, kind, owner_id, data, created_at, updated_at, deleted_at";

fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

fn serialization_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::SerializationError { message })
}

/// Fixed-width UTC timestamps, so text order matches time order.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| serialization_error(format!("Invalid timestamp {s}: {e}")))
}

/// Raw column values of one `entities` row.
struct EntityRow {
    id: String,
    kind: String,
    owner_id: String,
    data: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl EntityRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            owner_id: row.get(2)?,
            data: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            deleted_at: row.get(6)?,
        })
    }

    fn into_entity(self) -> StorageResult<StoredEntity> {
        let kind: EntityKind = self
            .kind
            .parse()
            .map_err(|e: crate::error::ValidationError| serialization_error(e.to_string()))?;
        let data = serde_json::from_str(&self.data)
            .map_err(|e| serialization_error(format!("Failed to parse entity data: {}", e)))?;
        let deleted_at = self.deleted_at.as_deref().map(parse_timestamp).transpose()?;

        Ok(StoredEntity::from_storage(
            kind,
            self.id,
            self.owner_id,
            data,
            parse_timestamp(&self.created_at)?,
            parse_timestamp(&self.updated_at)?,
            deleted_at,
        ))
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn trash_clause(filter: TrashFilter) -> &'static str {
    match filter {
        TrashFilter::Live => " AND deleted_at IS NULL",
        TrashFilter::Trashed => " AND deleted_at IS NOT NULL",
        TrashFilter::All => "",
    }
}

#[async_trait]
impl EntityStorage for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, entity: &StoredEntity) -> StorageResult<StoredEntity> {
        let data = serde_json::to_string(entity.data())
            .map_err(|e| serialization_error(format!("Failed to serialize entity: {}", e)))?;
        let row = entity.clone();

        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO entities (id, kind, owner_id, sort_name, size_bytes, data, created_at, updated_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id(),
                    row.kind().as_str(),
                    row.owner_id(),
                    row.name(),
                    row.size_bytes() as i64,
                    data,
                    format_timestamp(row.created_at()),
                    format_timestamp(row.updated_at()),
                    row.deleted_at().map(format_timestamp),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Resource(ResourceError::AlreadyExists {
                        kind: row.kind(),
                        id: row.id().to_string(),
                    })
                } else {
                    internal_error(format!("Failed to insert entity: {}", e))
                }
            })?;
            Ok(row)
        })
        .await
    }

    async fn read(&self, id: &str) -> StorageResult<Option<StoredEntity>> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
                    params![id],
                    EntityRow::from_row,
                )
                .optional()
                .map_err(|e| internal_error(format!("Failed to read entity: {}", e)))?;

            row.map(EntityRow::into_entity).transpose()
        })
        .await
    }

    async fn list_by_owner(
        &self,
        kind: EntityKind,
        owner_id: &str,
        filter: TrashFilter,
    ) -> StorageResult<Vec<StoredEntity>> {
        let owner_id = owner_id.to_string();
        self.run_blocking(move |conn| {
            let sql = format!(
                "SELECT {ENTITY_COLUMNS} FROM entities WHERE kind = ?1 AND owner_id = ?2{}",
                trash_clause(filter)
            );

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| internal_error(format!("Failed to prepare query: {}", e)))?;
            let rows = stmt
                .query_map(params![kind.as_str(), owner_id], EntityRow::from_row)
                .map_err(|e| internal_error(format!("Failed to list entities: {}", e)))?;

            let mut entities = Vec::new();
            for row in rows {
                let row = row.map_err(|e| internal_error(format!("Failed to read row: {}", e)))?;
                entities.push(row.into_entity()?);
            }
            Ok(entities)
        })
        .await
    }

    async fn update(
        &self,
        entity: &StoredEntity,
        expected_updated_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let data = serde_json::to_string(entity.data())
            .map_err(|e| serialization_error(format!("Failed to serialize entity: {}", e)))?;
        let row = entity.clone();

        let changed = self
            .run_blocking(move |conn| {
                conn.execute(
                    "UPDATE entities
                     SET owner_id = ?1, sort_name = ?2, size_bytes = ?3, data = ?4,
                         updated_at = ?5, deleted_at = ?6
                     WHERE id = ?7 AND updated_at = ?8",
                    params![
                        row.owner_id(),
                        row.name(),
                        row.size_bytes() as i64,
                        data,
                        format_timestamp(row.updated_at()),
                        row.deleted_at().map(format_timestamp),
                        row.id(),
                        format_timestamp(expected_updated_at),
                    ],
                )
                .map_err(|e| internal_error(format!("Failed to update entity: {}", e)))
            })
            .await?;

        Ok(changed > 0)
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let changed = conn
                .execute("DELETE FROM entities WHERE id = ?1", params![id])
                .map_err(|e| internal_error(format!("Failed to delete entity: {}", e)))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn usage(&self, owner_id: &str) -> StorageResult<StorageUsage> {
        let owner_id = owner_id.to_string();
        let (file_count, total_bytes, trashed_count, trashed_bytes): (i64, i64, i64, i64) = self
            .run_blocking(move |conn| {
                conn.query_row(
                    "SELECT
                        COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN size_bytes ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN size_bytes ELSE 0 END), 0)
                     FROM entities WHERE kind = 'file' AND owner_id = ?1",
                    params![owner_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .map_err(|e| internal_error(format!("Failed to compute usage: {}", e)))
            })
            .await?;

        Ok(StorageUsage {
            file_count: file_count as u64,
            total_bytes: total_bytes as u64,
            trashed_count: trashed_count as u64,
            trashed_bytes: trashed_bytes as u64,
        })
    }

    async fn statistics(&self) -> StorageResult<BackendStatistics> {
        let rows: Vec<(String, i64, i64)> = self
            .run_blocking(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT kind, COUNT(*), COALESCE(SUM(size_bytes), 0) FROM entities GROUP BY kind",
                    )
                    .map_err(|e| internal_error(format!("Failed to prepare query: {}", e)))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                    .map_err(|e| internal_error(format!("Failed to count entities: {}", e)))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| internal_error(format!("Failed to read row: {}", e)))
            })
            .await?;

        let mut entity_counts = BTreeMap::new();
        let mut total_file_bytes = 0;
        for (kind, count, bytes) in rows {
            let Ok(kind) = kind.parse::<EntityKind>() else {
                continue;
            };
            if kind == EntityKind::File {
                total_file_bytes = bytes as u64;
            }
            entity_counts.insert(kind, count as u64);
        }

        Ok(BackendStatistics {
            entity_counts,
            total_file_bytes,
        })
    }
}
