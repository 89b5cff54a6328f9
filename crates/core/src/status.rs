use crate::error::IngestError;
use crate::models::{
    client_prefix, FileStatus, IndexedRow, ObjectInfo, TrainingStatus,
    DEFAULT_STALENESS_TOLERANCE_MS,
};
use crate::store::RowFilter;
use crate::traits::{ObjectStore, VectorStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
struct FileIndexSummary {
    last_created_at: Option<DateTime<Utc>>,
    rows: usize,
}

/// Classifies every source file against the rows indexed for it.
///
/// A file is trained when its newest row is no older than the file's
/// `updated_at` minus `tolerance`.
pub fn reconcile(files: &[ObjectInfo], rows: &[IndexedRow], tolerance: Duration) -> Vec<FileStatus> {
    let mut summaries: HashMap<&str, FileIndexSummary> = HashMap::new();
    for row in rows {
        let summary = summaries.entry(row.metadata.filename.as_str()).or_default();
        summary.rows += 1;
        summary.last_created_at = Some(match summary.last_created_at {
            Some(current) => current.max(row.created_at),
            None => row.created_at,
        });
    }

    files
        .iter()
        .map(|file| {
            let summary = summaries.get(file.name.as_str());
            let last_trained_at = summary.and_then(|summary| summary.last_created_at);
            let status = match last_trained_at {
                Some(created_at) if created_at >= file.updated_at - tolerance => {
                    TrainingStatus::Trained
                }
                _ => TrainingStatus::NotTrained,
            };

            FileStatus {
                name: file.name.clone(),
                updated_at: file.updated_at,
                status,
                last_trained_at,
                indexed_chunks: summary.map_or(0, |summary| summary.rows),
            }
        })
        .collect()
}

/// Read-only view joining the object store listing with the vector table.
pub struct StatusReconciler<O, V> {
    objects: O,
    vectors: V,
    tolerance: Duration,
}

impl<O: ObjectStore, V: VectorStore> StatusReconciler<O, V> {
    pub fn new(objects: O, vectors: V) -> Self {
        Self {
            objects,
            vectors,
            tolerance: Duration::milliseconds(DEFAULT_STALENESS_TOLERANCE_MS),
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub async fn status(&self, client_id: &str) -> Result<Vec<FileStatus>, IngestError> {
        let files = self.objects.list(&client_prefix(client_id)).await?;
        let rows = self.vectors.select_where(&RowFilter::client(client_id)).await?;
        debug!(client_id, files = files.len(), rows = rows.len(), "reconciling training status");
        Ok(reconcile(&files, &rows, self.tolerance))
    }
}
