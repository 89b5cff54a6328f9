use crate::models::{ObjectInfo, UploadOptions};
use crate::traits::ObjectStore;
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

const LIST_PAGE_SIZE: usize = 1_000;
const FOLDER_PLACEHOLDER: &str = ".emptyFolderPlaceholder";

/// Connection details shared by the storage and table adapters.
#[derive(Clone)]
pub struct SupabaseConnection {
    base_url: Url,
    service_key: String,
    client: Client,
}

impl SupabaseConnection {
    pub fn new(base_url: &str, service_key: impl Into<String>) -> Result<Self, StoreError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            service_key: service_key.into(),
            client: Client::new(),
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Joins `segments` under the base URL, percent-encoding each one.
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Request(format!("base url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }
}

pub(crate) async fn ensure_success(backend: &str, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let details = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: backend.to_string(),
        details: format!("{status}: {details}"),
    })
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    id: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<ListedMetadata>,
}

#[derive(Debug, Deserialize)]
struct ListedMetadata {
    size: Option<u64>,
    mimetype: Option<String>,
}

impl ListedObject {
    /// Folders come back without an id; the placeholder keeps empty folders alive.
    fn into_object_info(self) -> Option<ObjectInfo> {
        if self.id.is_none() || self.name == FOLDER_PLACEHOLDER {
            return None;
        }
        let updated_at = self.updated_at.or(self.created_at)?;
        let (size, content_type) = match self.metadata {
            Some(metadata) => (metadata.size, metadata.mimetype),
            None => (None, None),
        };
        Some(ObjectInfo {
            name: self.name,
            updated_at,
            size,
            content_type,
        })
    }
}

/// Object store backed by the Supabase Storage REST API.
pub struct SupabaseStorage {
    connection: SupabaseConnection,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(connection: SupabaseConnection, bucket: impl Into<String>) -> Self {
        Self {
            connection,
            bucket: bucket.into(),
        }
    }

    fn object_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut segments = vec!["storage", "v1", "object", self.bucket.as_str()];
        segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        self.connection.url(&segments)
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let url = self
            .connection
            .url(&["storage", "v1", "object", "list", self.bucket.as_str()])?;
        let prefix = prefix.trim_end_matches('/');

        let mut objects = Vec::new();
        let mut offset = 0usize;
        loop {
            let request = self.connection.client().post(url.clone()).json(&json!({
                "prefix": prefix,
                "limit": LIST_PAGE_SIZE,
                "offset": offset,
                "sortBy": { "column": "name", "order": "asc" },
            }));
            let response = self.connection.authorize(request).send().await?;
            let page: Vec<ListedObject> = ensure_success("supabase-storage", response)
                .await?
                .json()
                .await?;

            let fetched = page.len();
            objects.extend(page.into_iter().filter_map(ListedObject::into_object_info));

            if fetched < LIST_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        Ok(objects)
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.object_url(path)?;
        let response = self
            .connection
            .authorize(self.connection.client().get(url))
            .send()
            .await?;

        // Storage reports missing objects as 400 or 404 depending on version.
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST) {
            return Err(StoreError::NotFound(path.to_string()));
        }

        let bytes = ensure_success("supabase-storage", response)
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StoreError> {
        if paths.is_empty() {
            return Ok(());
        }

        let url = self
            .connection
            .url(&["storage", "v1", "object", self.bucket.as_str()])?;
        let request = self
            .connection
            .client()
            .delete(url)
            .json(&json!({ "prefixes": paths }));
        let response = self.connection.authorize(request).send().await?;
        ensure_success("supabase-storage", response).await?;
        Ok(())
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<(), StoreError> {
        let url = self.object_url(path)?;
        let content_type = options
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let request = self
            .connection
            .client()
            .post(url)
            .header("content-type", content_type)
            .header("x-upsert", if options.overwrite { "true" } else { "false" })
            .body(bytes);
        let response = self.connection.authorize(request).send().await?;
        ensure_success("supabase-storage", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded {
        list_offsets: Arc<Mutex<Vec<u64>>>,
        upserts: Arc<Mutex<Vec<(String, String)>>>,
    }

    fn storage_api(recorded: Recorded) -> Router {
        Router::new()
            .route(
                "/storage/v1/object/list/knowledge_base",
                post(|State(recorded): State<Recorded>, Json(body): Json<Value>| async move {
                    let offset = body["offset"].as_u64().unwrap_or_default();
                    recorded.list_offsets.lock().expect("offsets lock").push(offset);
                    let count = if offset == 0 { LIST_PAGE_SIZE } else { 1 };
                    let page = (0..count)
                        .map(|index| {
                            json!({
                                "name": format!("file-{}.txt", offset as usize + index),
                                "id": "obj",
                                "updated_at": "2024-05-02T08:30:00.000Z",
                                "created_at": "2024-05-01T10:00:00.000Z",
                            })
                        })
                        .collect::<Vec<_>>();
                    Json(page)
                }),
            )
            .route(
                "/storage/v1/object/knowledge_base/{*path}",
                get(|Path(path): Path<String>| async move {
                    match path.as_str() {
                        "c-1/faq.txt" => (AxumStatus::OK, "hello").into_response(),
                        "c-1/old.txt" => (AxumStatus::BAD_REQUEST, "Object not found").into_response(),
                        "c-1/broken.txt" => AxumStatus::INTERNAL_SERVER_ERROR.into_response(),
                        _ => AxumStatus::NOT_FOUND.into_response(),
                    }
                })
                .post(
                    |State(recorded): State<Recorded>,
                     Path(path): Path<String>,
                     headers: HeaderMap,
                     _body: Bytes| async move {
                        let upsert = headers
                            .get("x-upsert")
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        recorded.upserts.lock().expect("upserts lock").push((path, upsert));
                        AxumStatus::OK
                    },
                ),
            )
            .with_state(recorded)
    }

    fn remote_storage(base: &str) -> SupabaseStorage {
        let connection = SupabaseConnection::new(base, "service-key").expect("valid url");
        SupabaseStorage::new(connection, "knowledge_base")
    }

    #[test]
    fn object_urls_percent_encode_each_segment() {
        let connection =
            SupabaseConnection::new("https://project.supabase.co", "key").expect("valid url");
        let storage = SupabaseStorage::new(connection, "knowledge_base");
        let url = storage
            .object_url("client-1/price list #2.pdf")
            .expect("url builds");
        assert_eq!(
            url.as_str(),
            "https://project.supabase.co/storage/v1/object/knowledge_base/client-1/price%20list%20%232.pdf"
        );
    }

    #[test]
    fn listing_skips_folders_and_placeholders() {
        let page: Vec<ListedObject> = serde_json::from_str(
            r#"[
                {"name": "nested", "id": null, "updated_at": null, "created_at": null, "metadata": null},
                {"name": ".emptyFolderPlaceholder", "id": "1", "updated_at": "2024-05-01T10:00:00.000Z", "created_at": "2024-05-01T10:00:00.000Z"},
                {"name": "faq.pdf", "id": "2", "updated_at": "2024-05-02T08:30:00.123Z", "created_at": "2024-05-01T10:00:00.000Z",
                 "metadata": {"size": 2048, "mimetype": "application/pdf"}}
            ]"#,
        )
        .expect("valid listing");

        let objects = page
            .into_iter()
            .filter_map(ListedObject::into_object_info)
            .collect::<Vec<_>>();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name, "faq.pdf");
        assert_eq!(objects[0].size, Some(2048));
        assert_eq!(objects[0].updated_at.to_rfc3339(), "2024-05-02T08:30:00.123+00:00");
    }

    #[tokio::test]
    async fn listing_follows_offsets_until_a_short_page() {
        let recorded = Recorded::default();
        let base = serve(storage_api(recorded.clone())).await;

        let objects = remote_storage(&base).list("c-1/").await.expect("list succeeds");

        assert_eq!(objects.len(), LIST_PAGE_SIZE + 1);
        assert_eq!(objects.last().map(|object| object.name.as_str()), Some("file-1000.txt"));
        assert_eq!(*recorded.list_offsets.lock().expect("offsets lock"), vec![0, 1000]);
    }

    #[tokio::test]
    async fn download_maps_missing_objects_to_not_found() {
        let storage = remote_storage(&serve(storage_api(Recorded::default())).await);

        assert_eq!(storage.download("c-1/faq.txt").await.expect("download"), b"hello");
        assert!(matches!(
            storage.download("c-1/gone.txt").await,
            Err(StoreError::NotFound(path)) if path == "c-1/gone.txt"
        ));
        assert!(matches!(
            storage.download("c-1/old.txt").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            storage.download("c-1/broken.txt").await,
            Err(StoreError::BackendResponse { .. })
        ));
    }

    #[tokio::test]
    async fn upload_sends_the_upsert_flag() {
        let recorded = Recorded::default();
        let storage = remote_storage(&serve(storage_api(recorded.clone())).await);

        for overwrite in [false, true] {
            storage
                .upload(
                    "c-1/faq.txt",
                    b"hello".to_vec(),
                    UploadOptions {
                        overwrite,
                        content_type: Some("text/plain".to_string()),
                    },
                )
                .await
                .expect("upload succeeds");
        }

        assert_eq!(
            *recorded.upserts.lock().expect("upserts lock"),
            vec![
                ("c-1/faq.txt".to_string(), "false".to_string()),
                ("c-1/faq.txt".to_string(), "true".to_string()),
            ]
        );
    }
}
