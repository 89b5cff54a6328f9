//! Keeps the vector table in step with source file removals.

use crate::error::IngestError;
use crate::ingest::validate_file_name;
use crate::models::{client_prefix, object_path};
use crate::store::RowFilter;
use crate::traits::{ObjectStore, VectorStore};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionOptions {
    /// Retry with the percent-encoded name when an exact delete on a name
    /// containing a space removes nothing. Rows written by older uploaders
    /// stored encoded names.
    pub legacy_encoded_fallback: bool,
}

impl Default for DeletionOptions {
    fn default() -> Self {
        Self {
            legacy_encoded_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionOutcome {
    pub exact_rows: u64,
    /// Set only when the encoded fallback ran.
    pub encoded_rows: Option<u64>,
}

impl DeletionOutcome {
    pub fn total(&self) -> u64 {
        self.exact_rows + self.encoded_rows.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub rows_deleted: Option<u64>,
    pub files_removed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub orphaned_files: Vec<String>,
    pub rows_deleted: u64,
    pub errors: Vec<String>,
}

/// Percent-encodes like `encodeURIComponent`: `!'()*` stay literal.
pub fn encode_uri_component(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}

pub struct DeletionSynchronizer<O, V> {
    objects: O,
    vectors: V,
    options: DeletionOptions,
}

impl<O: ObjectStore, V: VectorStore> DeletionSynchronizer<O, V> {
    pub fn new(objects: O, vectors: V) -> Self {
        Self::with_options(objects, vectors, DeletionOptions::default())
    }

    pub fn with_options(objects: O, vectors: V, options: DeletionOptions) -> Self {
        Self {
            objects,
            vectors,
            options,
        }
    }

    /// Deletes every row indexed for the file. Safe to call when none exist.
    pub async fn delete_embeddings(
        &self,
        client_id: &str,
        file_name: &str,
    ) -> Result<DeletionOutcome, IngestError> {
        require_client(client_id)?;
        if file_name.trim().is_empty() {
            return Err(IngestError::Validation("Missing fileName".to_string()));
        }

        let exact_rows = self
            .vectors
            .delete_where(&RowFilter::file(client_id, file_name))
            .await?;
        info!(client_id, file = file_name, rows = exact_rows, "deleted embeddings");

        let mut outcome = DeletionOutcome {
            exact_rows,
            encoded_rows: None,
        };

        if exact_rows == 0 && file_name.contains(' ') && self.options.legacy_encoded_fallback {
            let encoded = encode_uri_component(file_name);
            match self
                .vectors
                .delete_where(&RowFilter::file(client_id, encoded.as_str()))
                .await
            {
                Ok(rows) => {
                    if rows > 0 {
                        info!(client_id, file = %encoded, rows, "deleted embeddings stored under encoded name");
                    }
                    outcome.encoded_rows = Some(rows);
                }
                Err(error) => {
                    warn!(client_id, file = %encoded, %error, "encoded-name delete failed");
                }
            }
        }

        Ok(outcome)
    }

    /// Removes the source object, then its embeddings.
    pub async fn remove_file(
        &self,
        client_id: &str,
        file_name: &str,
    ) -> Result<DeletionOutcome, IngestError> {
        require_client(client_id)?;
        validate_file_name(file_name)?;

        self.objects
            .remove(&[object_path(client_id, file_name)])
            .await?;
        info!(client_id, file = file_name, "removed source file");

        self.delete_embeddings(client_id, file_name).await
    }

    /// Deletes every row and every source object of a client. Each step is
    /// attempted even when the previous one failed.
    pub async fn purge_client(&self, client_id: &str) -> Result<PurgeReport, IngestError> {
        require_client(client_id)?;
        let mut report = PurgeReport::default();

        match self.vectors.delete_where(&RowFilter::client(client_id)).await {
            Ok(rows) => {
                info!(client_id, rows, "deleted client embeddings");
                report.rows_deleted = Some(rows);
            }
            Err(error) => {
                warn!(client_id, %error, "deleting client embeddings failed");
                report.errors.push(format!("Embedding delete failed: {error}"));
            }
        }

        match self.objects.list(&client_prefix(client_id)).await {
            Ok(files) if files.is_empty() => {}
            Ok(files) => {
                let paths = files
                    .iter()
                    .map(|file| object_path(client_id, &file.name))
                    .collect::<Vec<_>>();
                match self.objects.remove(&paths).await {
                    Ok(()) => {
                        info!(client_id, files = paths.len(), "removed client files");
                        report.files_removed = paths.len();
                    }
                    Err(error) => {
                        warn!(client_id, %error, "removing client files failed");
                        report.errors.push(format!("Storage delete failed: {error}"));
                    }
                }
            }
            Err(error) => {
                warn!(client_id, %error, "listing client files failed");
                report.errors.push(format!("Storage list failed: {error}"));
            }
        }

        Ok(report)
    }

    /// Deletes rows whose filename matches no source file, neither literally
    /// nor after percent-decoding.
    pub async fn reap_orphans(&self, client_id: &str) -> Result<ReapReport, IngestError> {
        require_client(client_id)?;

        let present = self
            .objects
            .list(&client_prefix(client_id))
            .await?
            .into_iter()
            .map(|file| file.name)
            .collect::<HashSet<_>>();
        let indexed = self
            .vectors
            .select_where(&RowFilter::client(client_id))
            .await?
            .into_iter()
            .map(|row| row.metadata.filename)
            .collect::<BTreeSet<_>>();

        let mut report = ReapReport::default();
        for filename in indexed {
            if is_present(&present, &filename) {
                continue;
            }
            match self
                .vectors
                .delete_where(&RowFilter::file(client_id, filename.as_str()))
                .await
            {
                Ok(rows) => {
                    info!(client_id, file = %filename, rows, "reaped orphaned embeddings");
                    report.rows_deleted += rows;
                    report.orphaned_files.push(filename);
                }
                Err(error) => {
                    warn!(client_id, file = %filename, %error, "reaping orphaned embeddings failed");
                    report
                        .errors
                        .push(format!("Orphan delete failed for {filename}: {error}"));
                }
            }
        }

        Ok(report)
    }
}

fn require_client(client_id: &str) -> Result<(), IngestError> {
    if client_id.trim().is_empty() {
        return Err(IngestError::Validation("Missing clientId".to_string()));
    }
    Ok(())
}

fn is_present(present: &HashSet<String>, filename: &str) -> bool {
    if present.contains(filename) {
        return true;
    }
    match urlencoding::decode(filename) {
        Ok(decoded) => decoded != filename && present.contains(decoded.as_ref()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewVectorRow, ObjectInfo, RowMetadata, UploadOptions};
    use crate::stores::{MemoryObjectStore, MemoryVectorStore};
    use crate::StoreError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;

    fn row(client_id: &str, filename: &str) -> NewVectorRow {
        NewVectorRow {
            content: format!("chunk of {filename}"),
            embedding: vec![0.0; 4],
            client_id: client_id.to_string(),
            metadata: RowMetadata {
                client_id: client_id.to_string(),
                filename: filename.to_string(),
                source: "admin-upload".to_string(),
            },
        }
    }

    async fn seed_rows(store: &MemoryVectorStore, client_id: &str, filename: &str, count: usize) {
        let rows = (0..count).map(|_| row(client_id, filename)).collect::<Vec<_>>();
        store.insert_rows(&rows).await.expect("seed rows");
    }

    fn seed_file(store: &MemoryObjectStore, client_id: &str, name: &str) {
        store
            .put_at(object_path(client_id, name), b"text".to_vec(), Utc::now())
            .expect("seed file");
    }

    #[test]
    fn encoding_matches_encode_uri_component() {
        assert_eq!(encode_uri_component("price list.pdf"), "price%20list.pdf");
        assert_eq!(encode_uri_component("Q&A (v2)!.txt"), "Q%26A%20(v2)!.txt");
        assert_eq!(encode_uri_component("it's*new~.md"), "it's*new~.md");
        assert_eq!(encode_uri_component("café.txt"), "caf%C3%A9.txt");
    }

    #[tokio::test]
    async fn literal_name_with_space_is_deleted_exactly() {
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_rows(&vectors, "c-1", "price list.pdf", 3).await;
        let sync = DeletionSynchronizer::new(MemoryObjectStore::new(), vectors.clone());

        let outcome = sync
            .delete_embeddings("c-1", "price list.pdf")
            .await
            .expect("delete");

        assert_eq!(outcome.exact_rows, 3);
        assert_eq!(outcome.encoded_rows, None);
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn encoded_rows_are_deleted_by_fallback() {
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_rows(&vectors, "c-1", "price%20list.pdf", 2).await;
        let sync = DeletionSynchronizer::new(MemoryObjectStore::new(), vectors.clone());

        let outcome = sync
            .delete_embeddings("c-1", "price list.pdf")
            .await
            .expect("delete");

        assert_eq!(outcome.exact_rows, 0);
        assert_eq!(outcome.encoded_rows, Some(2));
        assert_eq!(outcome.total(), 2);
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn fallback_can_be_switched_off() {
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_rows(&vectors, "c-1", "price%20list.pdf", 2).await;
        let sync = DeletionSynchronizer::with_options(
            MemoryObjectStore::new(),
            vectors.clone(),
            DeletionOptions {
                legacy_encoded_fallback: false,
            },
        );

        let outcome = sync
            .delete_embeddings("c-1", "price list.pdf")
            .await
            .expect("delete");

        assert_eq!(outcome.total(), 0);
        assert_eq!(vectors.len(), 2);
    }

    #[tokio::test]
    async fn deleting_nothing_is_not_an_error() {
        let sync = DeletionSynchronizer::new(MemoryObjectStore::new(), MemoryVectorStore::new());
        let outcome = sync.delete_embeddings("c-1", "menu.pdf").await.expect("delete");
        assert_eq!(outcome, DeletionOutcome::default());
    }

    #[tokio::test]
    async fn deletion_is_scoped_to_the_client() {
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_rows(&vectors, "c-1", "menu.pdf", 1).await;
        seed_rows(&vectors, "c-2", "menu.pdf", 1).await;
        let sync = DeletionSynchronizer::new(MemoryObjectStore::new(), vectors.clone());

        sync.delete_embeddings("c-1", "menu.pdf").await.expect("delete");

        assert_eq!(vectors.rows(&RowFilter::client("c-2")).len(), 1);
        assert!(vectors.rows(&RowFilter::client("c-1")).is_empty());
    }

    #[tokio::test]
    async fn remove_file_drops_object_and_rows() {
        let objects = Arc::new(MemoryObjectStore::new());
        seed_file(&objects, "c-1", "menu.pdf");
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_rows(&vectors, "c-1", "menu.pdf", 2).await;
        let sync = DeletionSynchronizer::new(objects.clone(), vectors.clone());

        let outcome = sync.remove_file("c-1", "menu.pdf").await.expect("remove");

        assert_eq!(outcome.exact_rows, 2);
        assert!(!objects.contains("c-1/menu.pdf"));
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn purge_removes_everything_for_one_client() {
        let objects = Arc::new(MemoryObjectStore::new());
        seed_file(&objects, "c-1", "menu.pdf");
        seed_file(&objects, "c-1", "faq.txt");
        seed_file(&objects, "c-2", "faq.txt");
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_rows(&vectors, "c-1", "menu.pdf", 2).await;
        seed_rows(&vectors, "c-1", "faq.txt", 1).await;
        seed_rows(&vectors, "c-2", "faq.txt", 1).await;
        let sync = DeletionSynchronizer::new(objects.clone(), vectors.clone());

        let report = sync.purge_client("c-1").await.expect("purge");

        assert_eq!(report.rows_deleted, Some(3));
        assert_eq!(report.files_removed, 2);
        assert!(report.errors.is_empty());
        assert!(objects.contains("c-2/faq.txt"));
        assert_eq!(vectors.len(), 1);
    }

    struct BrokenListing;

    #[async_trait]
    impl ObjectStore for BrokenListing {
        async fn list(&self, _prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
            Err(StoreError::Request("storage unavailable".to_string()))
        }

        async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::NotFound(path.to_string()))
        }

        async fn remove(&self, _paths: &[String]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn upload(
            &self,
            _path: &str,
            _bytes: Vec<u8>,
            _options: UploadOptions,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn purge_keeps_going_when_storage_fails() {
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_rows(&vectors, "c-1", "menu.pdf", 2).await;
        let sync = DeletionSynchronizer::new(BrokenListing, vectors.clone());

        let report = sync.purge_client("c-1").await.expect("purge");

        assert_eq!(report.rows_deleted, Some(2));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Storage list failed"));
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn reaper_only_deletes_rows_without_source_file() {
        let objects = Arc::new(MemoryObjectStore::new());
        seed_file(&objects, "c-1", "menu.pdf");
        seed_file(&objects, "c-1", "price list.pdf");
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_rows(&vectors, "c-1", "menu.pdf", 2).await;
        seed_rows(&vectors, "c-1", "price%20list.pdf", 1).await;
        seed_rows(&vectors, "c-1", "old notes.txt", 3).await;
        seed_rows(&vectors, "c-2", "old notes.txt", 1).await;
        let sync = DeletionSynchronizer::new(objects, vectors.clone());

        let report = sync.reap_orphans("c-1").await.expect("reap");

        assert_eq!(report.orphaned_files, vec!["old notes.txt".to_string()]);
        assert_eq!(report.rows_deleted, 3);
        assert_eq!(vectors.rows(&RowFilter::client("c-1")).len(), 3);
        assert_eq!(vectors.rows(&RowFilter::client("c-2")).len(), 1);
    }

    #[tokio::test]
    async fn blank_client_is_rejected() {
        let sync = DeletionSynchronizer::new(MemoryObjectStore::new(), MemoryVectorStore::new());
        assert!(matches!(
            sync.purge_client(" ").await,
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            sync.delete_embeddings("c-1", "").await,
            Err(IngestError::Validation(_))
        ));
    }

    #[test]
    fn presence_check_accepts_decoded_names() {
        let present = HashSet::from(["price list.pdf".to_string()]);
        assert!(is_present(&present, "price list.pdf"));
        assert!(is_present(&present, "price%20list.pdf"));
        assert!(!is_present(&present, "menu.pdf"));
    }
}
