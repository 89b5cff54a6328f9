use super::supabase::{ensure_success, SupabaseConnection};
use crate::models::{IndexedRow, NewVectorRow, RowMetadata};
use crate::store::RowFilter;
use crate::traits::VectorStore;
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_RANGE};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

const SELECT_PAGE_SIZE: usize = 1_000;

/// Vector table exposed through PostgREST (e.g. Supabase `rag_documents`).
pub struct PostgrestVectorStore {
    connection: SupabaseConnection,
    table: String,
}

#[derive(Debug, Deserialize)]
struct SelectedRow {
    id: Value,
    client_id: String,
    created_at: DateTime<Utc>,
    metadata: Option<RowMetadataRecord>,
}

/// Metadata as persisted; older rows may miss keys.
#[derive(Debug, Deserialize)]
struct RowMetadataRecord {
    client_id: Option<String>,
    filename: Option<String>,
    source: Option<String>,
}

impl SelectedRow {
    fn into_indexed_row(self) -> Option<IndexedRow> {
        let metadata = self.metadata?;
        let filename = metadata.filename?;
        let id = match self.id {
            Value::String(id) => id,
            other => other.to_string(),
        };
        Some(IndexedRow {
            id,
            metadata: RowMetadata {
                client_id: metadata.client_id.unwrap_or_else(|| self.client_id.clone()),
                filename,
                source: metadata.source.unwrap_or_default(),
            },
            client_id: self.client_id,
            created_at: self.created_at,
        })
    }
}

impl PostgrestVectorStore {
    pub fn new(connection: SupabaseConnection, table: impl Into<String>) -> Self {
        Self {
            connection,
            table: table.into(),
        }
    }

    fn table_url(&self, filter: Option<&RowFilter>) -> Result<Url, StoreError> {
        let mut url = self.connection.url(&["rest", "v1", self.table.as_str()])?;
        if let Some(filter) = filter {
            apply_filter(&mut url, filter);
        }
        Ok(url)
    }
}

fn apply_filter(url: &mut Url, filter: &RowFilter) {
    let mut query = url.query_pairs_mut();
    query.append_pair("client_id", &format!("eq.{}", filter.client_id));
    if let Some(filename) = &filter.filename {
        query.append_pair("metadata->>filename", &format!("eq.{filename}"));
    }
}

/// Reads the total from a `Content-Range: 0-9/10` (or `*/10`) header.
fn exact_count(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .parse()
        .ok()
}

#[async_trait]
impl VectorStore for PostgrestVectorStore {
    async fn insert_rows(&self, rows: &[NewVectorRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let url = self.table_url(None)?;
        let request = self
            .connection
            .client()
            .post(url)
            .header("prefer", "return=minimal")
            .json(rows);
        let response = self.connection.authorize(request).send().await?;
        ensure_success("postgrest", response).await?;
        Ok(rows.len())
    }

    async fn delete_where(&self, filter: &RowFilter) -> Result<u64, StoreError> {
        let url = self.table_url(Some(filter))?;
        let request = self
            .connection
            .client()
            .delete(url)
            .header("prefer", "return=minimal, count=exact");
        let response = self.connection.authorize(request).send().await?;
        let response = ensure_success("postgrest", response).await?;

        exact_count(response.headers()).ok_or_else(|| StoreError::BackendResponse {
            backend: "postgrest".to_string(),
            details: "delete response carried no exact count".to_string(),
        })
    }

    async fn select_where(&self, filter: &RowFilter) -> Result<Vec<IndexedRow>, StoreError> {
        let mut rows = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut url = self.table_url(Some(filter))?;
            url.query_pairs_mut()
                .append_pair("select", "id,client_id,created_at,metadata")
                .append_pair("order", "created_at.asc,id.asc")
                .append_pair("limit", &SELECT_PAGE_SIZE.to_string())
                .append_pair("offset", &offset.to_string());

            let request = self.connection.client().get(url);
            let response = self.connection.authorize(request).send().await?;
            let page: Vec<SelectedRow> = ensure_success("postgrest", response)
                .await?
                .json()
                .await?;

            let fetched = page.len();
            rows.extend(page.into_iter().filter_map(SelectedRow::into_indexed_row));

            if fetched < SELECT_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        Ok(rows)
    }
}
