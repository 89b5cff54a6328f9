use crate::models::{IndexedRow, NewVectorRow, ObjectInfo, UploadOptions};
use crate::store::RowFilter;
use crate::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// Per-client source file storage. Paths are `{client_id}/{file_name}`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists the objects directly under `prefix`; names are relative to it.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    async fn remove(&self, paths: &[String]) -> Result<(), StoreError>;

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<(), StoreError>;
}

/// The vector table. `created_at` is assigned by the store on insert.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts all rows as one write; returns the number of rows written.
    async fn insert_rows(&self, rows: &[NewVectorRow]) -> Result<usize, StoreError>;

    /// Returns the number of rows removed.
    async fn delete_where(&self, filter: &RowFilter) -> Result<u64, StoreError>;

    async fn select_where(&self, filter: &RowFilter) -> Result<Vec<IndexedRow>, StoreError>;
}

pub type SharedObjectStore = Arc<dyn ObjectStore>;
pub type SharedVectorStore = Arc<dyn VectorStore>;

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        (**self).list(prefix).await
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        (**self).download(path).await
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StoreError> {
        (**self).remove(paths).await
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<(), StoreError> {
        (**self).upload(path, bytes, options).await
    }
}

#[async_trait]
impl<T: VectorStore + ?Sized> VectorStore for Arc<T> {
    async fn insert_rows(&self, rows: &[NewVectorRow]) -> Result<usize, StoreError> {
        (**self).insert_rows(rows).await
    }

    async fn delete_where(&self, filter: &RowFilter) -> Result<u64, StoreError> {
        (**self).delete_where(filter).await
    }

    async fn select_where(&self, filter: &RowFilter) -> Result<Vec<IndexedRow>, StoreError> {
        (**self).select_where(filter).await
    }
}
