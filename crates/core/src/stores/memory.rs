//! In-process stores for tests, dry runs and local development.
//!
//! Both stores keep their data behind `std::sync::RwLock`; no lock is held
//! across an await point.

use crate::models::{IndexedRow, NewVectorRow, ObjectInfo, UploadOptions};
use crate::store::RowFilter;
use crate::traits::{ObjectStore, VectorStore};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

fn poisoned() -> StoreError {
    StoreError::Request("in-memory store lock poisoned".to_string())
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    updated_at: DateTime<Utc>,
    content_type: Option<String>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object with an explicit modification time.
    pub fn put_at(
        &self,
        path: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.write()?.insert(
            path.into(),
            StoredObject {
                bytes: bytes.into(),
                updated_at,
                content_type: None,
            },
        );
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read()
            .map(|objects| objects.contains_key(path))
            .unwrap_or(false)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, StoredObject>>, StoreError> {
        self.objects.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, StoredObject>>, StoreError> {
        self.objects.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let objects = self.read()?;
        Ok(objects
            .iter()
            .filter_map(|(path, object)| {
                let name = path.strip_prefix(prefix)?;
                if name.is_empty() || name.contains('/') {
                    return None;
                }
                Some(ObjectInfo {
                    name: name.to_string(),
                    updated_at: object.updated_at,
                    size: Some(object.bytes.len() as u64),
                    content_type: object.content_type.clone(),
                })
            })
            .collect())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.read()?
            .get(path)
            .map(|object| object.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StoreError> {
        let mut objects = self.write()?;
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<(), StoreError> {
        let mut objects = self.write()?;
        if !options.overwrite && objects.contains_key(path) {
            return Err(StoreError::Request(format!("object already exists: {path}")));
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                updated_at: Utc::now(),
                content_type: options.content_type,
            },
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoredVectorRow {
    pub row: IndexedRow,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Default)]
pub struct MemoryVectorStore {
    rows: RwLock<Vec<StoredVectorRow>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts rows stamped with `created_at` instead of the current time.
    pub fn insert_rows_at(
        &self,
        rows: &[NewVectorRow],
        created_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut stored = self.rows.write().map_err(|_| poisoned())?;
        for row in rows {
            stored.push(StoredVectorRow {
                row: IndexedRow {
                    client_id: row.client_id.clone(),
                    ..IndexedRow::new(row.metadata.clone(), created_at)
                },
                content: row.content.clone(),
                embedding: row.embedding.clone(),
            });
        }
        Ok(rows.len())
    }

    pub fn rows(&self, filter: &RowFilter) -> Vec<StoredVectorRow> {
        self.rows
            .read()
            .map(|rows| {
                rows.iter()
                    .filter(|stored| filter.matches(&stored.row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn insert_rows(&self, rows: &[NewVectorRow]) -> Result<usize, StoreError> {
        self.insert_rows_at(rows, Utc::now())
    }

    async fn delete_where(&self, filter: &RowFilter) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let before = rows.len();
        rows.retain(|stored| !filter.matches(&stored.row));
        Ok((before - rows.len()) as u64)
    }

    async fn select_where(&self, filter: &RowFilter) -> Result<Vec<IndexedRow>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .iter()
            .filter(|stored| filter.matches(&stored.row))
            .map(|stored| stored.row.clone())
            .collect())
    }
}
