use crate::error::IngestError;
use crate::models::{NewVectorRow, RowMetadata};
use crate::store::RowFilter;
use crate::traits::VectorStore;
use crate::StoreError;
use std::time::Duration;
use tracing::{debug, warn};

/// Writes one file's rows: a full reset for the `(client, filename)` pair,
/// then batch inserts.
pub struct IndexWriter<V> {
    store: V,
    source_tag: String,
    reset_attempts: usize,
    reset_backoff: Duration,
}

impl<V: VectorStore> IndexWriter<V> {
    pub fn new(store: V, source_tag: impl Into<String>) -> Self {
        Self {
            store,
            source_tag: source_tag.into(),
            reset_attempts: 1,
            reset_backoff: Duration::ZERO,
        }
    }

    pub fn with_reset_retries(mut self, attempts: usize, backoff: Duration) -> Self {
        self.reset_attempts = attempts.max(1);
        self.reset_backoff = backoff;
        self
    }

    pub fn store(&self) -> &V {
        &self.store
    }

    /// Deletes every row for the pair, retrying transient failures. Returns
    /// the number of rows removed by the successful attempt.
    pub async fn reset_file(&self, client_id: &str, file_name: &str) -> Result<u64, StoreError> {
        let filter = RowFilter::file(client_id, file_name);
        let mut attempt = 1;
        loop {
            match self.store.delete_where(&filter).await {
                Ok(removed) => {
                    debug!(client_id, file = file_name, removed, "cleared previous rows");
                    return Ok(removed);
                }
                Err(error) if attempt < self.reset_attempts => {
                    warn!(client_id, file = file_name, attempt, %error, "clearing previous rows failed, retrying");
                    tokio::time::sleep(self.reset_backoff * attempt as u32).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    pub fn build_rows(
        &self,
        client_id: &str,
        file_name: &str,
        chunks: &[String],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Vec<NewVectorRow>, IngestError> {
        if chunks.len() != embeddings.len() {
            return Err(IngestError::IndexWrite(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        Ok(chunks
            .iter()
            .zip(embeddings)
            .map(|(content, embedding)| NewVectorRow {
                content: content.clone(),
                embedding,
                client_id: client_id.to_string(),
                metadata: RowMetadata {
                    client_id: client_id.to_string(),
                    filename: file_name.to_string(),
                    source: self.source_tag.clone(),
                },
            })
            .collect())
    }

    /// Inserts one batch as a single store write; returns rows written.
    pub async fn write_batch(
        &self,
        client_id: &str,
        file_name: &str,
        chunks: &[String],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<usize, IngestError> {
        let rows = self.build_rows(client_id, file_name, chunks, embeddings)?;
        self.store
            .insert_rows(&rows)
            .await
            .map_err(|error| IngestError::IndexWrite(error.to_string()))
    }
}
