//! MetadataRegistry: durable FileObject records in SQLite.
//!
//! State transitions are single conditional `UPDATE`s (`WHERE state IN ...`),
//! so two writers racing on the same id cannot both win a transition.
//! `create` is the commit point: the row is inserted directly as `stored`.

use crate::models::{FileObject, FileState, ListQuery, ListScope};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{Sqlite, SqlitePoolOptions},
    FromRow, QueryBuilder, SqlitePool,
};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const COLUMNS: &str = "id, owner_id, project_id, original_name, stored_key, folder, size_bytes, \
     mime_type, category, backend, visibility, created_at, metadata, state";

/// Expression for `folder/stored_key`, matching `FileObject::logical_path`.
const LOGICAL_PATH_SQL: &str =
    "CASE WHEN folder IS NULL OR folder = '' THEN stored_key ELSE folder || '/' || stored_key END";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("file `{0}` not found")]
    NotFound(Uuid),

    #[error("registry conflict: {0}")]
    Conflict(String),

    #[error("corrupt registry record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait MetadataRegistry: Send + Sync {
    /// Commit a pending object as `stored`. Must follow a successful backend store.
    async fn create(&self, object: &FileObject) -> RegistryResult<Uuid>;

    async fn get(&self, id: Uuid) -> RegistryResult<FileObject>;

    /// Mark a stored object as awaiting backend deletion. Idempotent.
    async fn tombstone(&self, id: Uuid) -> RegistryResult<FileObject>;

    /// Move a stored or tombstoned object to `purged`. False when nothing changed.
    async fn delete(&self, id: Uuid) -> RegistryResult<bool>;

    /// Remove the row entirely. Only used to compensate a failed upload.
    async fn discard(&self, id: Uuid) -> RegistryResult<()>;

    /// Stored objects in the requested scope, newest first.
    async fn list(&self, query: &ListQuery) -> RegistryResult<Vec<FileObject>>;

    /// Oldest tombstoned objects first.
    async fn list_tombstoned(&self, limit: usize) -> RegistryResult<Vec<FileObject>>;

    async fn ping(&self) -> RegistryResult<()>;
}

#[derive(FromRow)]
struct FileObjectRow {
    id: String,
    owner_id: String,
    project_id: Option<String>,
    original_name: String,
    stored_key: String,
    folder: Option<String>,
    size_bytes: i64,
    mime_type: String,
    category: String,
    backend: String,
    visibility: String,
    created_at: DateTime<Utc>,
    metadata: String,
    state: String,
}

impl TryFrom<FileObjectRow> for FileObject {
    type Error = RegistryError;

    fn try_from(row: FileObjectRow) -> RegistryResult<Self> {
        let corrupt = |e: &dyn std::fmt::Display| RegistryError::Corrupt(format!("{}: {}", row.id, e));

        let metadata: BTreeMap<String, String> =
            serde_json::from_str(&row.metadata).map_err(|e| corrupt(&e))?;

        Ok(FileObject {
            id: Uuid::parse_str(&row.id).map_err(|e| corrupt(&e))?,
            size_bytes: u64::try_from(row.size_bytes).map_err(|e| corrupt(&e))?,
            category: row.category.parse().map_err(|e| corrupt(&e))?,
            backend: row.backend.parse().map_err(|e| corrupt(&e))?,
            visibility: row.visibility.parse().map_err(|e| corrupt(&e))?,
            state: row.state.parse().map_err(|e| corrupt(&e))?,
            owner_id: row.owner_id,
            project_id: row.project_id,
            original_name: row.original_name,
            stored_key: row.stored_key,
            folder: row.folder,
            mime_type: row.mime_type,
            created_at: row.created_at,
            metadata,
        })
    }
}

#[derive(Clone)]
pub struct SqliteRegistry {
    db: Arc<SqlitePool>,
}

impl SqliteRegistry {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Single-connection in-memory registry with the schema applied.
    pub async fn in_memory() -> RegistryResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let registry = Self::new(Arc::new(pool));
        registry.migrate().await?;
        Ok(registry)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> RegistryResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("running {} migration statements", statements.len());
        for stmt in statements {
            debug!("executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> RegistryResult<Option<FileObject>> {
        let row = sqlx::query_as::<_, FileObjectRow>(&format!(
            "SELECT {} FROM file_objects WHERE id = ?",
            COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&*self.db)
        .await?;

        row.map(FileObject::try_from).transpose()
    }

    /// Conditional transition; returns the number of rows changed.
    async fn transition(&self, id: Uuid, to: FileState, from: &[FileState]) -> RegistryResult<u64> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE file_objects SET state = ");
        qb.push_bind(to.as_str())
            .push(", updated_at = ")
            .push_bind(Utc::now())
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND state IN (");
        let mut separated = qb.separated(", ");
        for state in from {
            separated.push_bind(state.as_str());
        }
        separated.push_unseparated(")");

        let result = qb.build().execute(&*self.db).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MetadataRegistry for SqliteRegistry {
    async fn create(&self, object: &FileObject) -> RegistryResult<Uuid> {
        if object.state != FileState::Pending {
            return Err(RegistryError::Conflict(format!(
                "file `{}` is {}, expected pending",
                object.id,
                object.state.as_str()
            )));
        }

        let size_bytes = i64::try_from(object.size_bytes)
            .map_err(|_| RegistryError::Conflict(format!("size {} out of range", object.size_bytes)))?;
        let metadata = serde_json::to_string(&object.metadata)
            .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO file_objects (
                id, owner_id, project_id, original_name, stored_key, folder, size_bytes,
                mime_type, category, backend, visibility, created_at, updated_at, metadata, state
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(object.id.to_string())
        .bind(&object.owner_id)
        .bind(&object.project_id)
        .bind(&object.original_name)
        .bind(&object.stored_key)
        .bind(&object.folder)
        .bind(size_bytes)
        .bind(&object.mime_type)
        .bind(object.category.as_str())
        .bind(object.backend.as_str())
        .bind(object.visibility.as_str())
        .bind(object.created_at)
        .bind(now)
        .bind(metadata)
        .bind(FileState::Stored.as_str())
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {
                debug!(id = %object.id, key = %object.stored_key, "registry record stored");
                Ok(object.id)
            }
            Err(err) if is_unique_violation(&err) => Err(RegistryError::Conflict(format!(
                "key `{}` already registered on {}",
                object.stored_key, object.backend
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, id: Uuid) -> RegistryResult<FileObject> {
        self.fetch(id).await?.ok_or(RegistryError::NotFound(id))
    }

    async fn tombstone(&self, id: Uuid) -> RegistryResult<FileObject> {
        let changed = self
            .transition(id, FileState::Tombstoned, &[FileState::Stored, FileState::Tombstoned])
            .await?;
        let object = self.get(id).await?;
        if changed == 0 {
            return Err(RegistryError::Conflict(format!(
                "file `{}` is {}, cannot tombstone",
                id,
                object.state.as_str()
            )));
        }
        debug!(id = %id, "registry record tombstoned");
        Ok(object)
    }

    async fn delete(&self, id: Uuid) -> RegistryResult<bool> {
        let changed = self
            .transition(id, FileState::Purged, &[FileState::Stored, FileState::Tombstoned])
            .await?;
        if changed > 0 {
            debug!(id = %id, "registry record purged");
        }
        Ok(changed > 0)
    }

    async fn discard(&self, id: Uuid) -> RegistryResult<()> {
        sqlx::query("DELETE FROM file_objects WHERE id = ?")
            .bind(id.to_string())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn list(&self, query: &ListQuery) -> RegistryResult<Vec<FileObject>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM file_objects WHERE state = ",
            COLUMNS
        ));
        qb.push_bind(FileState::Stored.as_str());

        match &query.scope {
            ListScope::Owner(owner) => qb.push(" AND owner_id = ").push_bind(owner.clone()),
            ListScope::Project(project) => qb.push(" AND project_id = ").push_bind(project.clone()),
        };

        if let Some(provider) = query.provider {
            qb.push(" AND backend = ").push_bind(provider.as_str());
        }

        if let Some(prefix) = query.prefix.as_deref().filter(|p| !p.is_empty()) {
            qb.push(format!(" AND substr({}, 1, ", LOGICAL_PATH_SQL))
                .push_bind(prefix.chars().count() as i64)
                .push(") = ")
                .push_bind(prefix.to_string());
        }

        qb.push(" ORDER BY created_at DESC, id");

        let rows = qb
            .build_query_as::<FileObjectRow>()
            .fetch_all(&*self.db)
            .await?;
        rows.into_iter().map(FileObject::try_from).collect()
    }

    async fn list_tombstoned(&self, limit: usize) -> RegistryResult<Vec<FileObject>> {
        let rows = sqlx::query_as::<_, FileObjectRow>(&format!(
            "SELECT {} FROM file_objects WHERE state = ? ORDER BY updated_at, id LIMIT ?",
            COLUMNS
        ))
        .bind(FileState::Tombstoned.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(FileObject::try_from).collect()
    }

    async fn ping(&self) -> RegistryResult<()> {
        sqlx::query("SELECT 1").execute(&*self.db).await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendKind, Category, Visibility};

    fn pending(owner: &str, folder: Option<&str>, key: &str) -> FileObject {
        FileObject {
            id: Uuid::new_v4(),
            owner_id: owner.into(),
            project_id: Some("p1".into()),
            original_name: "report.pdf".into(),
            stored_key: key.into(),
            folder: folder.map(str::to_string),
            size_bytes: 2_000_000,
            mime_type: "application/pdf".into(),
            category: Category::Document,
            backend: BackendKind::Local,
            visibility: Visibility::Private,
            created_at: Utc::now(),
            metadata: BTreeMap::from([("originalName".to_string(), "report.pdf".to_string())]),
            state: FileState::Pending,
        }
    }

    fn owner_query(owner: &str, prefix: Option<&str>) -> ListQuery {
        ListQuery {
            scope: ListScope::Owner(owner.into()),
            prefix: prefix.map(str::to_string),
            provider: None,
        }
    }

    #[tokio::test]
    async fn create_commits_as_stored_and_get_round_trips() {
        let registry = SqliteRegistry::in_memory().await.unwrap();
        let object = pending("u1", Some("users/u1"), "report-1.pdf");

        let id = registry.create(&object).await.unwrap();
        let loaded = registry.get(id).await.unwrap();

        assert_eq!(loaded.state, FileState::Stored);
        assert_eq!(loaded.stored_key, object.stored_key);
        assert_eq!(loaded.size_bytes, 2_000_000);
        assert_eq!(loaded.metadata.get("originalName").map(String::as_str), Some("report.pdf"));
        assert_eq!(loaded.created_at.timestamp_millis(), object.created_at.timestamp_millis());
    }

    #[tokio::test]
    async fn create_rejects_non_pending_and_duplicate_keys() {
        let registry = SqliteRegistry::in_memory().await.unwrap();

        let mut stored = pending("u1", None, "a-1.pdf");
        stored.state = FileState::Stored;
        assert!(matches!(registry.create(&stored).await, Err(RegistryError::Conflict(_))));

        registry.create(&pending("u1", None, "a-2.pdf")).await.unwrap();
        assert!(matches!(
            registry.create(&pending("u2", None, "a-2.pdf")).await,
            Err(RegistryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let registry = SqliteRegistry::in_memory().await.unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(registry.get(id).await, Err(RegistryError::NotFound(_))));
        assert!(!registry.delete(id).await.unwrap());
        assert!(matches!(registry.tombstone(id).await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_lifecycle_moves_through_tombstone_to_purged() {
        let registry = SqliteRegistry::in_memory().await.unwrap();
        let id = registry.create(&pending("u1", None, "b-1.pdf")).await.unwrap();

        let tombstoned = registry.tombstone(id).await.unwrap();
        assert_eq!(tombstoned.state, FileState::Tombstoned);
        registry.tombstone(id).await.unwrap();

        let pending_purge = registry.list_tombstoned(10).await.unwrap();
        assert_eq!(pending_purge.len(), 1);
        assert!(registry.list(&owner_query("u1", None)).await.unwrap().is_empty());

        assert!(registry.delete(id).await.unwrap());
        assert!(!registry.delete(id).await.unwrap());
        assert_eq!(registry.get(id).await.unwrap().state, FileState::Purged);
        assert!(matches!(registry.tombstone(id).await, Err(RegistryError::Conflict(_))));
    }

    #[tokio::test]
    async fn discard_removes_the_row() {
        let registry = SqliteRegistry::in_memory().await.unwrap();
        let id = registry.create(&pending("u1", None, "c-1.pdf")).await.unwrap();
        registry.discard(id).await.unwrap();
        registry.discard(id).await.unwrap();
        assert!(matches!(registry.get(id).await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_filters_by_scope_prefix_and_provider() {
        let registry = SqliteRegistry::in_memory().await.unwrap();
        registry.create(&pending("u1", Some("users/u1"), "one-1.pdf")).await.unwrap();
        registry.create(&pending("u1", Some("users/u1/invoices"), "two-1.pdf")).await.unwrap();
        registry.create(&pending("u2", Some("users/u2"), "three-1.pdf")).await.unwrap();
        let mut remote = pending("u1", Some("users/u1"), "four-1.pdf");
        remote.backend = BackendKind::ObjectStore;
        registry.create(&remote).await.unwrap();

        assert_eq!(registry.list(&owner_query("u1", None)).await.unwrap().len(), 3);
        let invoices = registry
            .list(&owner_query("u1", Some("users/u1/invoices/")))
            .await
            .unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].stored_key, "two-1.pdf");

        let mut by_provider = owner_query("u1", None);
        by_provider.provider = Some(BackendKind::ObjectStore);
        assert_eq!(registry.list(&by_provider).await.unwrap().len(), 1);

        let project = ListQuery {
            scope: ListScope::Project("p1".into()),
            prefix: None,
            provider: None,
        };
        assert_eq!(registry.list(&project).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn ping_succeeds_on_live_pool() {
        let registry = SqliteRegistry::in_memory().await.unwrap();
        registry.ping().await.unwrap();
    }
}
