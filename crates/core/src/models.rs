use crate::chunking::ChunkingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const ADMIN_UPLOAD_SOURCE: &str = "admin-upload";
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 20;
pub const DEFAULT_STALENESS_TOLERANCE_MS: i64 = 1_000;

/// Object path of a source file inside the knowledge-base bucket.
pub fn object_path(client_id: &str, file_name: &str) -> String {
    format!("{client_id}/{file_name}")
}

pub fn client_prefix(client_id: &str) -> String {
    format!("{client_id}/")
}

/// Metadata stored alongside every vector row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowMetadata {
    pub client_id: String,
    pub filename: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewVectorRow {
    pub content: String,
    pub embedding: Vec<f32>,
    pub client_id: String,
    pub metadata: RowMetadata,
}

/// A persisted row as seen by reconciliation and cleanup; content and
/// embedding are not fetched back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedRow {
    pub id: String,
    pub client_id: String,
    pub metadata: RowMetadata,
    pub created_at: DateTime<Utc>,
}

impl IndexedRow {
    pub fn new(metadata: RowMetadata, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client_id: metadata.client_id.clone(),
            metadata,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectInfo {
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub overwrite: bool,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrainingStatus {
    #[serde(rename = "TRAINED")]
    Trained,
    #[serde(rename = "NOT TRAINED")]
    NotTrained,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trained => "TRAINED",
            Self::NotTrained => "NOT TRAINED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileStatus {
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub status: TrainingStatus,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub indexed_chunks: usize,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunking: ChunkingConfig,
    pub embedding_batch_size: usize,
    pub max_concurrent_files: usize,
    pub reset_attempts: usize,
    pub reset_backoff: Duration,
    pub source_tag: String,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            max_concurrent_files: 1,
            reset_attempts: 3,
            reset_backoff: Duration::from_millis(250),
            source_tag: ADMIN_UPLOAD_SOURCE.to_string(),
        }
    }
}
