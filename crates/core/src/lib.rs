pub mod chunking;
pub mod deletion;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index_writer;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod status;
pub mod store;
pub mod stores;
#[cfg(test)]
mod test_support;
pub mod traits;

pub use chunking::{chunk_text, normalize_whitespace, ChunkSpan, ChunkingConfig, TextChunks};
pub use deletion::{
    encode_uri_component, DeletionOptions, DeletionOutcome, DeletionSynchronizer, PurgeReport,
    ReapReport,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingClient, OpenAiConfig, OpenAiEmbedder,
    SharedEmbedder, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OPENAI_BASE_URL,
};
pub use error::{IngestError, Result, StoreError};
pub use extractor::{content_type_for, extract_text, DocumentKind};
pub use index_writer::IndexWriter;
pub use ingest::{FileOutcome, FileReport, IngestRequest, IngestionReport};
pub use models::{
    client_prefix, object_path, FileStatus, IndexedRow, IngestionOptions, NewVectorRow,
    ObjectInfo, RowMetadata, TrainingStatus, UploadOptions,
};
pub use orchestrator::IngestionOrchestrator;
pub use status::{reconcile, StatusReconciler};
pub use store::RowFilter;
pub use stores::{
    MemoryObjectStore, MemoryVectorStore, PostgrestVectorStore, SupabaseConnection,
    SupabaseStorage,
};
pub use traits::{ObjectStore, SharedObjectStore, SharedVectorStore, VectorStore};
