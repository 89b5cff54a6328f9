use crate::chunking::chunk_text;
use crate::embeddings::{Embedder, EmbeddingClient};
use crate::extractor::{extract_text, EMPTY_TEXT_REASON};
use crate::index_writer::IndexWriter;
use crate::ingest::{FileReport, IngestRequest, IngestionReport};
use crate::models::{object_path, IngestionOptions};
use crate::traits::{ObjectStore, VectorStore};
use crate::IngestError;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

/// Drives training runs: for each requested file, clear its rows, download,
/// extract, chunk, then embed and write batch by batch.
pub struct IngestionOrchestrator<O, V, E>
where
    O: ObjectStore,
    V: VectorStore,
    E: Embedder,
{
    objects: O,
    writer: IndexWriter<V>,
    embeddings: EmbeddingClient<E>,
    options: IngestionOptions,
}

impl<O, V, E> IngestionOrchestrator<O, V, E>
where
    O: ObjectStore,
    V: VectorStore,
    E: Embedder,
{
    pub fn new(
        objects: O,
        vectors: V,
        embedder: E,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        options.chunking.validate()?;
        if options.embedding_batch_size == 0 {
            return Err(IngestError::Validation(
                "embedding batch size must be at least 1".to_string(),
            ));
        }

        let writer = IndexWriter::new(vectors, options.source_tag.clone())
            .with_reset_retries(options.reset_attempts, options.reset_backoff);
        let embeddings = EmbeddingClient::new(embedder, options.embedding_batch_size);

        Ok(Self {
            objects,
            writer,
            embeddings,
            options,
        })
    }

    /// Runs one training request. Only request-level problems (bad input,
    /// missing provider credentials) are returned as `Err`; everything scoped
    /// to a file or batch lands in the report.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestionReport, IngestError> {
        let file_names = request.validated_file_names()?;
        self.embeddings.embedder().ensure_configured()?;

        let client_id = request.client_id.as_str();
        info!(
            client_id,
            files = file_names.len(),
            model = self.embeddings.embedder().model_name(),
            batch_size = self.embeddings.batch_size(),
            "starting training run"
        );

        let files = stream::iter(file_names.into_iter().map(str::to_string))
            .map(|file_name| async move { self.ingest_file(client_id, &file_name).await })
            .buffered(self.options.max_concurrent_files.max(1))
            .collect::<Vec<_>>()
            .await;

        let report = IngestionReport::from_files(files);
        info!(
            client_id,
            chunks = report.chunks_processed,
            errors = report.errors.len(),
            "training run completed"
        );
        Ok(report)
    }

    async fn ingest_file(&self, client_id: &str, file_name: &str) -> FileReport {
        let mut report = FileReport::new(file_name);

        // The reset must finish before any insert for this file.
        match self.writer.reset_file(client_id, file_name).await {
            Ok(removed) => report.rows_cleared = Some(removed),
            Err(error) => {
                warn!(client_id, file = file_name, %error, "could not clear old chunks, stale rows may remain");
            }
        }

        let bytes = match self.objects.download(&object_path(client_id, file_name)).await {
            Ok(bytes) => bytes,
            Err(error) => {
                let message = format!("Download failed for {file_name}: {error}");
                error!(client_id, file = file_name, "{message}");
                return report.fail(message);
            }
        };

        let text = match extract_off_thread(bytes, file_name).await {
            Ok(text) => text,
            Err(IngestError::Extraction { reason, .. }) if reason == EMPTY_TEXT_REASON => {
                warn!(client_id, file = file_name, "file has no text");
                return report.fail(format!("File {file_name} is empty"));
            }
            Err(error) => {
                let reason = match error {
                    IngestError::Extraction { reason, .. } => reason,
                    other => other.to_string(),
                };
                let message = format!("Parsing failed for {file_name}: {reason}");
                error!(client_id, file = file_name, "{message}");
                return report.fail(message);
            }
        };

        let chunks = match chunk_text(&text, self.options.chunking) {
            Ok(chunks) => chunks,
            Err(error) => return report.fail(format!("Chunking failed for {file_name}: {error}")),
        };
        report.chunks_total = chunks.len();
        info!(client_id, file = file_name, chunks = chunks.len(), "chunked file");

        for (batch_index, batch) in self.embeddings.batches(&chunks).enumerate() {
            let vectors = match self.embeddings.embed_batch(batch).await {
                Ok(vectors) => vectors,
                Err(error) => {
                    error!(client_id, file = file_name, batch = batch_index, %error, "embedding batch failed");
                    report
                        .errors
                        .push(format!("Batch processing failed for {file_name}: {error}"));
                    continue;
                }
            };

            match self
                .writer
                .write_batch(client_id, file_name, batch, vectors)
                .await
            {
                Ok(written) => report.chunks_written += written,
                Err(error) => {
                    error!(client_id, file = file_name, batch = batch_index, %error, "batch insert failed");
                    report
                        .errors
                        .push(format!("Batch insert failed for {file_name}: {error}"));
                }
            }
        }

        report.finish()
    }
}

async fn extract_off_thread(bytes: Vec<u8>, file_name: &str) -> Result<String, IngestError> {
    let name = file_name.to_string();
    tokio::task::spawn_blocking(move || extract_text(&bytes, &name))
        .await
        .map_err(|error| IngestError::extraction(file_name, error.to_string()))?
}
